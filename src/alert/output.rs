// src/alert/output.rs
// Audio output abstraction: an output opens a voice that is already playing

use super::external::ExternalOutput;
use super::native::NativeOutput;
use crate::config::{AlertsConfig, AudioBackend};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Unsupported audio: {0}")]
    Unsupported(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Failed to launch player: {0}")]
    Spawn(String),

    #[error("Failed to read clip: {0}")]
    Io(String),
}

/// An in-flight playback
pub trait Voice: Send {
    /// Natural length of the clip, when known
    fn duration(&self) -> Option<Duration>;

    /// Halt playback; calling it twice is harmless
    fn stop(&mut self);
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn Voice>, PlaybackError>;

    fn name(&self) -> &str;
}

/// WAV through the native device, other formats through the external player
pub struct AutoOutput {
    native: NativeOutput,
    external: ExternalOutput,
}

impl AutoOutput {
    pub fn new(native: NativeOutput, external: ExternalOutput) -> Self {
        Self { native, external }
    }
}

#[async_trait]
impl AudioOutput for AutoOutput {
    async fn open(&self, path: &Path) -> Result<Box<dyn Voice>, PlaybackError> {
        if is_wav(path) {
            self.native.open(path).await
        } else {
            self.external.open(path).await
        }
    }

    fn name(&self) -> &str {
        "Auto"
    }
}

pub fn output_from_config(config: &AlertsConfig) -> Arc<dyn AudioOutput> {
    let output: Arc<dyn AudioOutput> = match config.backend {
        AudioBackend::Native => Arc::new(NativeOutput::new()),
        AudioBackend::External => Arc::new(ExternalOutput::from_config(config)),
        AudioBackend::Auto => Arc::new(AutoOutput::new(
            NativeOutput::new(),
            ExternalOutput::from_config(config),
        )),
    };
    tracing::info!("Audio output: {}", output.name());
    output
}

pub(crate) fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}
