// src/controller/ticker.rs
// Tick sources that pace the detection loop

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next tick; `false` once the source is exhausted.
    /// Must be cancel safe.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticks; ticks missed while the loop was busy are dropped, not replayed
pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks delivered by hand through a channel
pub struct ChannelTicks {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ChannelTicks {
    pub fn channel() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl TickSource for ChannelTicks {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
