// src/camera/mod.rs
// Frame sampler - owns the camera stream and hands out still frames

pub mod mjpeg;
pub mod stream;

pub use mjpeg::MjpegSplitter;
pub use stream::CameraStream;

use async_trait::async_trait;
use std::time::Instant;
use thiserror::Error;

pub const JPEG_MIME: &str = "image/jpeg";

/// A single encoded still image
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl FramePayload {
    pub fn jpeg(bytes: Vec<u8>, sequence: u64) -> Self {
        Self {
            bytes,
            mime: JPEG_MIME,
            sequence,
            captured_at: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Camera stream ended")]
    StreamEnded,

    #[error("No frame captured yet")]
    NoFrame,

    #[error("Frame capture timed out")]
    Timeout,
}

impl CameraError {
    /// Terminal errors end the session; the rest skip a single tick
    pub fn is_terminal(&self) -> bool {
        matches!(self, CameraError::Unavailable(_) | CameraError::StreamEnded)
    }
}

#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Return the current frame without waiting on the device
    async fn capture_frame(&self) -> Result<FramePayload, CameraError>;

    /// Stop the underlying stream; later captures fail with `StreamEnded`
    async fn release(&self);

    fn name(&self) -> &str;
}
