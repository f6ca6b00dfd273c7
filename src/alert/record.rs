// src/alert/record.rs
// Microphone capture for recording new alert clips

use super::wav;
use crate::clips::{ClipError, ClipLibrary};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

const LOOPBACK_PATTERNS: [&str; 5] = ["stereo mix", "what u hear", "wave out", "loopback", "monitor"];

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("No input device available")]
    NoDevice,

    #[error("Input device error: {0}")]
    Device(String),

    #[error("Unsupported input format: {0}")]
    Unsupported(String),

    #[error("Nothing was recorded")]
    Empty,

    #[error(transparent)]
    Clip(#[from] ClipError),
}

/// Interleaved 16-bit samples as captured
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Recording {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// RMS level in [0.0, 1.0]
    pub fn level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f32 / i16::MAX as f32;
                v * v
            })
            .sum();
        (sum / self.samples.len() as f32).sqrt()
    }

    pub fn to_wav(&self) -> Vec<u8> {
        wav::encode_pcm16(&self.samples, self.sample_rate, self.channels)
    }

    fn append_f32(&mut self, input: &[f32]) {
        self.samples
            .extend(input.iter().map(|&x| (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16));
    }
}

pub struct MicRecorder {
    preferred_device: Option<String>,
}

impl MicRecorder {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device: preferred_device
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        }
    }

    pub fn list_input_devices() -> Result<Vec<String>, RecordError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| RecordError::Device(e.to_string()))?
            .map(|device| device_display_name(&device))
            .collect();
        Ok(devices)
    }

    /// Capture `length` of audio from the selected input
    pub async fn record(&self, length: Duration) -> Result<Recording, RecordError> {
        let preferred = self.preferred_device.clone();
        let (done_tx, done_rx) = oneshot::channel();

        // cpal streams stay on the thread that built them.
        std::thread::Builder::new()
            .name("clip-recording".to_string())
            .spawn(move || {
                let _ = done_tx.send(capture_blocking(preferred.as_deref(), length));
            })
            .map_err(|e| RecordError::Device(e.to_string()))?;

        let recording = done_rx
            .await
            .map_err(|_| RecordError::Device("recording thread exited".to_string()))??;

        tracing::info!(
            "Recorded {:.1}s at {}Hz x{} (level {:.2})",
            recording.duration().as_secs_f32(),
            recording.sample_rate,
            recording.channels,
            recording.level()
        );
        Ok(recording)
    }
}

/// Store a recording in the library under the usual upload naming rules
pub async fn save_recording(library: &ClipLibrary, name: &str, recording: &Recording) -> Result<String, RecordError> {
    if recording.samples.is_empty() {
        return Err(RecordError::Empty);
    }
    Ok(library.upload(name, &recording.to_wav()).await?)
}

fn capture_blocking(preferred: Option<&str>, length: Duration) -> Result<Recording, RecordError> {
    let host = cpal::default_host();
    let device = pick_input_device(&host, preferred).ok_or(RecordError::NoDevice)?;
    tracing::info!("Input device: {}", device_display_name(&device));

    let config = device
        .default_input_config()
        .map_err(|e| RecordError::Device(e.to_string()))?;
    let buffer = Arc::new(Mutex::new(Recording {
        samples: Vec::new(),
        sample_rate: config.sample_rate(),
        channels: config.channels(),
    }));

    let sink = buffer.clone();
    let err_fn = |err| tracing::error!("an error occurred on input stream: {}", err);
    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &_| {
                if let Ok(mut guard) = sink.lock() {
                    guard.samples.extend_from_slice(data);
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| {
                if let Ok(mut guard) = sink.lock() {
                    guard.append_f32(data);
                }
            },
            err_fn,
            None,
        ),
        other => return Err(RecordError::Unsupported(format!("{:?}", other))),
    }
    .map_err(|e| RecordError::Device(e.to_string()))?;

    stream.play().map_err(|e| RecordError::Device(e.to_string()))?;
    std::thread::sleep(length);
    drop(stream);

    let recording = buffer
        .lock()
        .map_err(|_| RecordError::Device("capture buffer poisoned".to_string()))?
        .clone();
    if recording.samples.is_empty() {
        return Err(RecordError::Empty);
    }
    Ok(recording)
}

fn pick_input_device(host: &cpal::Host, preferred: Option<&str>) -> Option<cpal::Device> {
    if let Some(name) = preferred {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| device_display_name(d) == name) {
                return Some(device);
            }
        }
        tracing::warn!("Preferred input device '{}' not found, falling back to default", name);
    }

    let default_device = host.default_input_device()?;
    let default_name = device_display_name(&default_device);
    if !looks_like_loopback(&default_name) {
        return Some(default_device);
    }

    tracing::warn!(
        "Default device '{}' looks like loopback, trying to pick a microphone input",
        default_name
    );
    host.input_devices()
        .ok()
        .and_then(|mut devices| devices.find(|d| !looks_like_loopback(&device_display_name(d))))
        .or(Some(default_device))
}

fn device_display_name(device: &cpal::Device) -> String {
    device
        .name()
        .or_else(|_| device.description().map(|d| d.name().to_string()))
        .unwrap_or_else(|_| "Unknown input".to_string())
}

fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    LOOPBACK_PATTERNS.iter().any(|p| lower.contains(p))
}
