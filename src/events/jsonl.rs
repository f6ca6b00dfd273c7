// src/events/jsonl.rs
// Local JSON-lines event store

use super::{in_range, AlertEvent, EventStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as TokioMutex;

pub struct JsonlEventStore {
    path: PathBuf,
    // Serializes appends from concurrently spawned inserts.
    write_lock: TokioMutex<()>,
}

impl JsonlEventStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: TokioMutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<AlertEvent>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut events = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AlertEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    "Skipping malformed event at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn insert(&self, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        let event = AlertEvent::new(timestamp);
        let mut line = serde_json::json!({ "timestamp": event.iso_timestamp() }).to_string();
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| StoreError::Io(e.to_string()))?;

        tracing::debug!("Logged picking event at {}", event.iso_timestamp());
        Ok(())
    }

    async fn select_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let events = self.read_all().await?;
        Ok(in_range(events, start, end))
    }

    fn name(&self) -> &str {
        "JSON lines"
    }
}
