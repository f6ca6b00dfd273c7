// src/events/rest.rs
// PostgREST (Supabase) backed event store

use super::{in_range, to_iso, AlertEvent, EventStore, StoreError};
use crate::config::{mask_api_key, EventsConfig};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Row as returned by PostgREST, before the timestamp is interpreted
#[derive(Debug, Deserialize)]
struct EventRow {
    timestamp: String,
}

pub struct RestEventStore {
    table_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RestEventStore {
    pub fn new(config: &EventsConfig) -> Result<Self, StoreError> {
        let base = config
            .rest_url
            .as_deref()
            .ok_or_else(|| StoreError::NotConfigured("events.rest_url is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let api_key = config.api_key();
        tracing::info!(
            "REST event store initialized: {} (key: {})",
            base,
            api_key
                .as_deref()
                .map(mask_api_key)
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(Self {
            table_url: format!("{}/rest/v1/{}", base.trim_end_matches('/'), config.table),
            api_key,
            client,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    pub(crate) fn range_query(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(&'static str, String)> {
        vec![
            ("select", "timestamp".to_string()),
            ("timestamp", format!("gte.{}", to_iso(start))),
            ("timestamp", format!("lt.{}", to_iso(end))),
            ("order", "timestamp.asc".to_string()),
        ]
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body: body.trim().chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl EventStore for RestEventStore {
    async fn insert(&self, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        let body = serde_json::json!({ "timestamp": to_iso(timestamp) });
        let response = self
            .authorize(self.client.post(&self.table_url))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn select_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let response = self
            .authorize(self.client.get(&self.table_url))
            .query(&Self::range_query(start, end))
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let body = Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let events = parse_rows(&body)?;

        // The server already filters; re-applying keeps the contract exact.
        Ok(in_range(events, start, end))
    }

    fn name(&self) -> &str {
        "PostgREST"
    }
}

/// Decode a `select=timestamp` response. Rows from a `timestamp` column (no offset)
/// are read as UTC; rows that still fail to parse are skipped.
fn parse_rows(body: &str) -> Result<Vec<AlertEvent>, StoreError> {
    let rows: Vec<EventRow> = serde_json::from_str(body).map_err(|e| StoreError::Malformed(e.to_string()))?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_timestamp(&row.timestamp) {
            Some(timestamp) => events.push(AlertEvent::new(timestamp)),
            None => tracing::warn!("Skipping event with unreadable timestamp '{}'", row.timestamp),
        }
    }
    Ok(events)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Postgres renders `timestamptz` with a short `+00` offset outside ISO mode.
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
