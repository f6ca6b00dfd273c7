// src/alert/mod.rs
// Alert player - random clip selection, single active playback, long-clip truncation

pub mod external;
pub mod native;
pub mod output;
pub mod record;
pub mod wav;

pub use external::ExternalOutput;
pub use native::NativeOutput;
pub use output::{output_from_config, AudioOutput, AutoOutput, PlaybackError, Voice};
pub use record::{save_recording, MicRecorder, RecordError, Recording};

use crate::clips::AlertClip;
use crate::config::AlertsConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("No alert clips available")]
    NoClipsAvailable,

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Clips longer than `long_clip_threshold` are cut at `truncate_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPolicy {
    pub long_clip_threshold: Duration,
    pub truncate_at: Duration,
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            long_clip_threshold: Duration::from_secs(5),
            truncate_at: Duration::from_secs(3),
        }
    }
}

impl PlaybackPolicy {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            long_clip_threshold: Duration::from_millis(config.long_clip_threshold_ms),
            truncate_at: Duration::from_millis(config.truncate_at_ms),
        }
    }

    /// When to halt a clip of the given length; `None` plays it to the end.
    /// Clips of unknown length are treated as long.
    pub fn halt_after(&self, duration: Option<Duration>) -> Option<Duration> {
        match duration {
            Some(length) if length <= self.long_clip_threshold => None,
            _ => Some(self.truncate_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedClip {
    pub name: String,
    pub duration: Option<Duration>,
    pub halt_after: Option<Duration>,
}

struct ActivePlayback {
    token: u64,
    clip: String,
    voice: Box<dyn Voice>,
    halt: Option<JoinHandle<()>>,
}

impl ActivePlayback {
    fn cancel(&mut self) {
        if let Some(halt) = self.halt.take() {
            halt.abort();
        }
        self.voice.stop();
    }
}

pub struct AlertPlayer {
    output: Arc<dyn AudioOutput>,
    policy: PlaybackPolicy,
    rng: Mutex<StdRng>,
    active: Arc<Mutex<Option<ActivePlayback>>>,
    generation: AtomicU64,
}

impl AlertPlayer {
    pub fn new(output: Arc<dyn AudioOutput>, policy: PlaybackPolicy) -> Self {
        Self::with_rng(output, policy, StdRng::from_entropy())
    }

    pub fn with_rng(output: Arc<dyn AudioOutput>, policy: PlaybackPolicy, rng: StdRng) -> Self {
        Self {
            output,
            policy,
            rng: Mutex::new(rng),
            active: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> PlaybackPolicy {
        self.policy
    }

    /// Pick a clip at random and start it, replacing any playback in flight
    pub async fn play_alert(&self, pool: &[AlertClip]) -> Result<PlayedClip, AlertError> {
        let clip = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| PlaybackError::Device("rng poisoned".to_string()))?;
            pool.choose(&mut *rng).cloned()
        }
        .ok_or(AlertError::NoClipsAvailable)?;

        self.play_clip(&clip).await
    }

    /// Start one specific clip under the same rules as an alert
    pub async fn play_clip(&self, clip: &AlertClip) -> Result<PlayedClip, AlertError> {
        // Last writer wins: the previous clip is silenced before the new one opens.
        self.stop();

        let voice = self.output.open(&clip.path).await?;
        let duration = voice.duration();
        let halt_after = self.policy.halt_after(duration);
        let token = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let mut guard = self
            .active
            .lock()
            .map_err(|_| PlaybackError::Device("playback state poisoned".to_string()))?;
        if let Some(mut previous) = guard.take() {
            // Another alert started while this one was opening.
            previous.cancel();
        }
        let halt = halt_after.map(|after| self.spawn_halt(token, after));
        *guard = Some(ActivePlayback {
            token,
            clip: clip.name.clone(),
            voice,
            halt,
        });
        drop(guard);

        tracing::info!(
            "Playing alert '{}' (length: {}, halt after: {})",
            clip.name,
            format_duration(duration),
            format_duration(halt_after)
        );

        Ok(PlayedClip {
            name: clip.name.clone(),
            duration,
            halt_after,
        })
    }

    /// Halt the active playback, if any
    pub fn stop(&self) {
        if let Ok(mut guard) = self.active.lock() {
            if let Some(mut playback) = guard.take() {
                tracing::debug!("Stopping alert '{}'", playback.clip);
                playback.cancel();
            }
        }
    }

    pub fn current_clip(&self) -> Option<String> {
        self.active
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|p| p.clip.clone()))
    }

    fn spawn_halt(&self, token: u64, after: Duration) -> JoinHandle<()> {
        let active = self.active.clone();
        tokio::spawn(async move {
            sleep(after).await;
            let Ok(mut guard) = active.lock() else {
                return;
            };
            if guard.as_ref().map(|p| p.token) != Some(token) {
                return;
            }
            if let Some(mut playback) = guard.take() {
                tracing::debug!("Truncating alert '{}' after {}ms", playback.clip, after.as_millis());
                // Dropping the handle of the running task does not abort it.
                playback.halt.take();
                playback.voice.stop();
            }
        })
    }
}

fn format_duration(value: Option<Duration>) -> String {
    value
        .map(|d| format!("{:.1}s", d.as_secs_f32()))
        .unwrap_or_else(|| "unknown".to_string())
}
