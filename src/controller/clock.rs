// src/controller/clock.rs
// Session clocks: time as an offset from when the clock was created

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    /// Resolve once `now()` has reached `deadline`
    async fn sleep_until(&self, deadline: Duration);
}

/// Backed by tokio's clock, so paused test time applies
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep_until(&self, deadline: Duration) {
        tokio::time::sleep_until(self.origin + deadline).await;
    }
}

/// Clock that only moves when told to. Sleepers wake when a move crosses their deadline.
pub struct ManualClock {
    now: watch::Sender<Duration>,
}

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        let (now, _) = watch::channel(Duration::from_millis(ms));
        Self { now }
    }

    pub fn set(&self, now: Duration) {
        self.now.send_replace(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.send_modify(|now| *now += by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(0)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: Duration) {
        let mut now = self.now.subscribe();
        if now.wait_for(|now| *now >= deadline).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
