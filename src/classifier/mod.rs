// src/classifier/mod.rs
// Detection client - sends a frame to the remote picking classifier

mod remote;
mod types;

pub use remote::RemoteClassifier;
pub use types::{ClassifyError, Verdict};

use crate::camera::FramePayload;
use async_trait::async_trait;

/// One round trip per call, no retries
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, frame: &FramePayload) -> Result<Verdict, ClassifyError>;

    /// Get provider name
    fn name(&self) -> &str;
}
