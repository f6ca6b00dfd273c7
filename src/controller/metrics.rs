// src/controller/metrics.rs
// Per-session loop counters

use super::{Decision, SkipReason};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopMetrics {
    pub ticks: u64,
    /// Ticks that arrived while a classification was still outstanding
    pub overruns: u64,
    pub failures: u64,
    pub negatives: u64,
    /// Positives ignored for cooldown, debounce or staleness, plus ticks not sampled during cooldown
    pub suppressed: u64,
    pub triggers: u64,
    pub store_failures: u64,
    pub playback_failures: u64,
    pub worst_latency: Duration,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&mut self, decision: &Decision) {
        match decision {
            Decision::Triggered { .. } => self.triggers += 1,
            Decision::Skipped(SkipReason::Failure) => self.failures += 1,
            Decision::Skipped(SkipReason::Negative) => self.negatives += 1,
            Decision::Skipped(_) => self.suppressed += 1,
        }
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if latency > self.worst_latency {
            self.worst_latency = latency;
        }
    }

    pub fn failure_rate(&self) -> f32 {
        let resolved = self.failures + self.negatives + self.suppressed + self.triggers;
        if resolved == 0 {
            0.0
        } else {
            self.failures as f32 / resolved as f32
        }
    }

    pub fn log_summary(&self, session_id: Uuid) {
        tracing::info!(
            "Session {} summary: ticks={} triggers={} negatives={} suppressed={} failures={} ({:.0}%) overruns={} store_failures={} playback_failures={} worst_latency={}ms",
            session_id,
            self.ticks,
            self.triggers,
            self.negatives,
            self.suppressed,
            self.failures,
            self.failure_rate() * 100.0,
            self.overruns,
            self.store_failures,
            self.playback_failures,
            self.worst_latency.as_millis()
        );
    }
}
