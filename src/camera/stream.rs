// src/camera/stream.rs
// Live camera stream backed by a capture subprocess writing MJPEG to stdout

use super::{CameraError, FramePayload, FrameSampler, MjpegSplitter};
use crate::config::CameraConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_CHUNK: usize = 64 * 1024;

pub struct CameraStream {
    device: String,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    latest: Arc<Mutex<Option<FramePayload>>>,
    alive: Arc<AtomicBool>,
}

impl CameraStream {
    /// Spawn the capture command and wait for its first frame
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let args = config.resolved_args();
        let mut child = Command::new(&config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CameraError::Unavailable(format!(
                    "Failed to launch capture command '{}': {}",
                    config.command, e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Unavailable("capture stdout not piped".to_string()))?;

        tracing::info!(
            "Camera capture started (pid: {:?}, device: {})",
            child.id(),
            config.device
        );

        let latest = Arc::new(Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));
        let first_frame = Arc::new(Notify::new());
        let reader = tokio::spawn(read_frames(
            stdout,
            latest.clone(),
            alive.clone(),
            first_frame.clone(),
        ));

        let stream = Self {
            device: config.device.clone(),
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
            latest,
            alive,
        };

        let waited = timeout(config.acquire_timeout(), first_frame.notified()).await;
        if stream.has_frame() {
            return Ok(stream);
        }

        stream.shutdown();
        match waited {
            Ok(()) => Err(CameraError::Unavailable(format!(
                "capture for {} exited before producing a frame",
                config.device
            ))),
            Err(_) => Err(CameraError::Unavailable(format!(
                "no frame from {} within {}ms",
                config.device, config.acquire_timeout_ms
            ))),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn has_frame(&self) -> bool {
        self.latest
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        if let Ok(mut guard) = self.latest.lock() {
            guard.take();
        }
    }
}

#[async_trait]
impl FrameSampler for CameraStream {
    async fn capture_frame(&self) -> Result<FramePayload, CameraError> {
        if !self.is_alive() {
            return Err(CameraError::StreamEnded);
        }

        let guard = self
            .latest
            .lock()
            .map_err(|_| CameraError::Unavailable("frame buffer poisoned".to_string()))?;
        guard.clone().ok_or(CameraError::NoFrame)
    }

    async fn release(&self) {
        self.shutdown();
        tracing::info!("Camera released: {}", self.device);
    }

    fn name(&self) -> &str {
        "MJPEG capture"
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_frames(
    mut stdout: ChildStdout,
    latest: Arc<Mutex<Option<FramePayload>>>,
    alive: Arc<AtomicBool>,
    first_frame: Arc<Notify>,
) {
    let mut splitter = MjpegSplitter::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut sequence = 0u64;

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for bytes in splitter.push(&chunk[..n]) {
                    sequence += 1;
                    let frame = FramePayload::jpeg(bytes, sequence);
                    if let Ok(mut guard) = latest.lock() {
                        let first = guard.is_none();
                        *guard = Some(frame);
                        if first {
                            first_frame.notify_one();
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Camera stream read failed: {}", e);
                break;
            }
        }
    }

    if alive.swap(false, Ordering::Relaxed) {
        tracing::warn!("Camera stream ended after {} frames", sequence);
    }
    first_frame.notify_one();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_camera(script: &str) -> CameraConfig {
        CameraConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            acquire_timeout_ms: 2_000,
            ..CameraConfig::default()
        }
    }

    #[tokio::test]
    async fn serves_latest_frame_from_stdout() {
        let config = shell_camera("printf '\\377\\330abc\\377\\331'; sleep 5");
        let camera = CameraStream::open(&config).await.unwrap();

        let frame = camera.capture_frame().await.unwrap();
        assert_eq!(frame.bytes, vec![0xFF, 0xD8, b'a', b'b', b'c', 0xFF, 0xD9]);
        assert_eq!(frame.sequence, 1);

        // Capturing is idempotent while no new frame arrives.
        let again = camera.capture_frame().await.unwrap();
        assert_eq!(again.sequence, 1);

        camera.release().await;
        assert!(matches!(
            camera.capture_frame().await,
            Err(CameraError::StreamEnded)
        ));
    }

    #[tokio::test]
    async fn exit_without_frames_is_unavailable() {
        let config = shell_camera("exit 0");
        let err = CameraStream::open(&config).await.err().unwrap();
        assert!(matches!(err, CameraError::Unavailable(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn missing_command_is_unavailable() {
        let config = CameraConfig {
            command: "/nonexistent/capture-binary".to_string(),
            ..CameraConfig::default()
        };
        let err = CameraStream::open(&config).await.err().unwrap();
        assert!(matches!(err, CameraError::Unavailable(_)));
    }
}
