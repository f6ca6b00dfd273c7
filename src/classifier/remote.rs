// src/classifier/remote.rs
// HTTP adapter for the hosted picking classifier

use super::types::DetectResponse;
use super::{Classifier, ClassifyError, Verdict};
use crate::camera::FramePayload;
use crate::config::ClassifierConfig;
use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use std::time::Duration;

const FRAME_FILE_NAME: &str = "image.jpg";
const FRAME_FIELD: &str = "file";

pub struct RemoteClassifier {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        tracing::info!("Remote classifier initialized: {}", config.url);

        Ok(Self {
            endpoint: config.url.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Map an HTTP status and body to a verdict
    pub(crate) fn parse_response(status: StatusCode, body: &str) -> Result<Verdict, ClassifyError> {
        if !status.is_success() {
            return Err(ClassifyError::Backend {
                status: status.as_u16(),
                body: body.trim().chars().take(200).collect(),
            });
        }

        let parsed: DetectResponse =
            serde_json::from_str(body).map_err(|e| ClassifyError::Malformed(e.to_string()))?;

        Ok(Verdict {
            detected: parsed.picking_detected,
        })
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, frame: &FramePayload) -> Result<Verdict, ClassifyError> {
        if frame.bytes.is_empty() {
            return Err(ClassifyError::InvalidFrame("empty frame".to_string()));
        }

        let part = multipart::Part::bytes(frame.bytes.clone())
            .file_name(FRAME_FILE_NAME)
            .mime_str(frame.mime)
            .map_err(|e| ClassifyError::InvalidFrame(e.to_string()))?;
        let form = multipart::Form::new().part(FRAME_FIELD, part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ClassifyError::Network(e.to_string()))?;
                Self::parse_response(status, &body)
            }
            Err(e) => {
                if e.is_timeout() {
                    Err(ClassifyError::Timeout)
                } else {
                    Err(ClassifyError::Network(e.to_string()))
                }
            }
        }
    }

    fn name(&self) -> &str {
        "Remote classifier"
    }
}
