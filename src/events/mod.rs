// src/events/mod.rs
// Event logger - append-only store of detected picking events

mod jsonl;
mod rest;

pub use jsonl::JsonlEventStore;
pub use rest::RestEventStore;

use crate::config::{EventsBackend, EventsConfig};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A logged occurrence of detected picking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp }
    }

    /// ISO-8601 instant with millisecond precision, e.g. `2024-05-01T09:30:00.250Z`
    pub fn iso_timestamp(&self) -> String {
        to_iso(self.timestamp)
    }
}

pub fn to_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store request failed: {0}")]
    Request(String),

    #[error("Store rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed store response: {0}")]
    Malformed(String),

    #[error("Store not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, timestamp: DateTime<Utc>) -> Result<(), StoreError>;

    /// Events with `start <= timestamp < end`, oldest first
    async fn select_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, StoreError>;

    fn name(&self) -> &str;
}

pub fn store_from_config(config: &EventsConfig) -> Result<Arc<dyn EventStore>, StoreError> {
    match config.backend {
        EventsBackend::Jsonl => Ok(Arc::new(JsonlEventStore::new(config.path.clone()))),
        EventsBackend::Rest => Ok(Arc::new(RestEventStore::new(config)?)),
    }
}

pub(crate) fn in_range(events: Vec<AlertEvent>, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AlertEvent> {
    let mut selected: Vec<AlertEvent> = events
        .into_iter()
        .filter(|event| event.timestamp >= start && event.timestamp < end)
        .collect();
    selected.sort();
    selected
}
