// src/controller/mod.rs
// Detection loop controller - cooldown/debounce state machine driven by ticks

pub mod clock;
pub mod metrics;
pub mod session;
pub mod ticker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use metrics::LoopMetrics;
pub use session::{DetectionSession, SessionComponents, SessionError, SessionHandle, SessionStatus};
pub use ticker::{ChannelTicks, IntervalTicks, TickSource};

use crate::camera::CameraError;
use crate::classifier::{ClassifyError, Verdict};
use crate::config::TimingConfig;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub debounce: Duration,
    pub classify_during_cooldown: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            cooldown: Duration::from_millis(3000),
            debounce: Duration::from_millis(5000),
            classify_during_cooldown: true,
        }
    }
}

impl Timing {
    pub fn from_config(config: &TimingConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            cooldown: config.cooldown(),
            debounce: config.debounce(),
            classify_during_cooldown: config.classify_during_cooldown,
        }
    }
}

/// Times are offsets from the session clock's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Sampling,
    CoolingDown { since: Duration },
}

/// Identity of one outstanding sample-classify round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTicket {
    pub id: u64,
    pub started_at: Duration,
}

#[derive(Debug, Error)]
pub enum TickFailure {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("Tick cancelled")]
    Cancelled,

    #[error("Tick task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Failure,
    Negative,
    /// The tick started before the most recent trigger
    Stale,
    CoolingDown,
    Debounced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Triggered { at: Duration },
    Skipped(SkipReason),
}

pub struct DetectionController {
    timing: Timing,
    state: LoopState,
    last_trigger: Option<Duration>,
    outstanding: Option<u64>,
    next_tick_id: u64,
}

impl DetectionController {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            state: LoopState::Idle,
            last_trigger: None,
            outstanding: None,
            next_tick_id: 0,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn last_trigger(&self) -> Option<Duration> {
        self.last_trigger
    }

    pub fn is_cooling_down(&self) -> bool {
        matches!(self.state, LoopState::CoolingDown { .. })
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.outstanding
    }

    /// Start a tick unless one is still outstanding or cooldown forbids sampling
    pub fn begin_tick(&mut self, now: Duration) -> Option<TickTicket> {
        self.expire_cooldown(now);

        if self.outstanding.is_some() {
            return None;
        }
        if self.is_cooling_down() && !self.timing.classify_during_cooldown {
            return None;
        }

        self.next_tick_id += 1;
        let id = self.next_tick_id;
        self.outstanding = Some(id);
        if self.state == LoopState::Idle {
            self.state = LoopState::Sampling;
        }

        Some(TickTicket { id, started_at: now })
    }

    /// Settle a tick. The trigger check and the timestamp update happen in this one call.
    pub fn resolve(
        &mut self,
        ticket: TickTicket,
        outcome: Result<Verdict, TickFailure>,
        now: Duration,
    ) -> Decision {
        let current = self.outstanding == Some(ticket.id);
        if current {
            self.outstanding = None;
            if self.state == LoopState::Sampling {
                self.state = LoopState::Idle;
            }
        }
        self.expire_cooldown(now);

        let verdict = match outcome {
            Ok(verdict) => verdict,
            Err(_) => return Decision::Skipped(SkipReason::Failure),
        };
        if !verdict.detected {
            return Decision::Skipped(SkipReason::Negative);
        }
        let predates_trigger = self
            .last_trigger
            .map(|at| ticket.started_at < at)
            .unwrap_or(false);
        if !current || predates_trigger {
            return Decision::Skipped(SkipReason::Stale);
        }
        if self.is_cooling_down() {
            return Decision::Skipped(SkipReason::CoolingDown);
        }
        if let Some(last) = self.last_trigger {
            if now.saturating_sub(last) <= self.timing.debounce {
                return Decision::Skipped(SkipReason::Debounced);
            }
        }

        self.last_trigger = Some(now);
        self.state = LoopState::CoolingDown { since: now };
        Decision::Triggered { at: now }
    }

    /// Leave cooldown once it has fully elapsed; returns whether it did
    pub fn expire_cooldown(&mut self, now: Duration) -> bool {
        match self.state {
            LoopState::CoolingDown { since } if now.saturating_sub(since) >= self.timing.cooldown => {
                self.state = if self.outstanding.is_some() {
                    LoopState::Sampling
                } else {
                    LoopState::Idle
                };
                true
            }
            _ => false,
        }
    }

    pub fn cooldown_deadline(&self) -> Option<Duration> {
        match self.state {
            LoopState::CoolingDown { since } => Some(since + self.timing.cooldown),
            _ => None,
        }
    }
}
