// src/classifier/types.rs
// Classifier verdict and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boolean classification result for a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub detected: bool,
}

impl Verdict {
    pub fn detected() -> Self {
        Self { detected: true }
    }

    pub fn clear() -> Self {
        Self { detected: false }
    }
}

/// Wire format returned by the detection backend
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DetectResponse {
    pub picking_detected: bool,
}

/// Classifier error types, split into transport and application failures
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl ClassifyError {
    /// True when the request never produced an HTTP response
    pub fn is_transport(&self) -> bool {
        matches!(self, ClassifyError::Network(_) | ClassifyError::Timeout)
    }
}
