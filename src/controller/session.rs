// src/controller/session.rs
// Detection session - one task owns the controller and drives sample -> classify -> alert

use super::{Clock, Decision, DetectionController, LoopMetrics, SkipReason, TickFailure, TickSource, TickTicket, Timing};
use crate::alert::{AlertError, AlertPlayer};
use crate::camera::{CameraError, FrameSampler};
use crate::classifier::{Classifier, Verdict};
use crate::clips::ClipLibrary;
use crate::events::EventStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::pending;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use uuid::Uuid;

/// What the presentation layer sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub alert_active: bool,
    pub camera_error: Option<String>,
    pub session_id: Uuid,
}

impl SessionStatus {
    fn new(session_id: Uuid) -> Self {
        Self {
            alert_active: false,
            camera_error: None,
            session_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Camera failure: {0}")]
    Camera(#[from] CameraError),
}

pub struct SessionComponents {
    pub sampler: Arc<dyn FrameSampler>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn EventStore>,
    pub player: Arc<AlertPlayer>,
    pub clips: ClipLibrary,
}

/// Control side of a running session. Dropping it also ends the session.
pub struct SessionHandle {
    session_id: Uuid,
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<SessionStatus>,
    active: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

struct InFlight {
    ticket: TickTicket,
    handle: JoinHandle<Result<Verdict, TickFailure>>,
}

pub struct DetectionSession {
    session_id: Uuid,
    controller: DetectionController,
    clock: Arc<dyn Clock>,
    sampler: Arc<dyn FrameSampler>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn EventStore>,
    player: Arc<AlertPlayer>,
    clips: ClipLibrary,
    status_tx: watch::Sender<SessionStatus>,
    shutdown_rx: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
    metrics: LoopMetrics,
    store_failures: Arc<AtomicU64>,
    playback_failures: Arc<AtomicU64>,
    playback: Option<JoinHandle<()>>,
}

impl DetectionSession {
    pub fn new(components: SessionComponents, timing: Timing, clock: Arc<dyn Clock>) -> (Self, SessionHandle) {
        let session_id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(SessionStatus::new(session_id));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));

        let session = Self {
            session_id,
            controller: DetectionController::new(timing),
            clock,
            sampler: components.sampler,
            classifier: components.classifier,
            store: components.store,
            player: components.player,
            clips: components.clips,
            status_tx,
            shutdown_rx,
            active: active.clone(),
            metrics: LoopMetrics::new(),
            store_failures: Arc::new(AtomicU64::new(0)),
            playback_failures: Arc::new(AtomicU64::new(0)),
            playback: None,
        };
        let handle = SessionHandle {
            session_id,
            shutdown: shutdown_tx,
            status: status_rx,
            active,
        };

        (session, handle)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run until stopped, the tick source ends, or the camera is lost
    pub async fn run(mut self, mut ticks: Box<dyn TickSource>) -> Result<LoopMetrics, SessionError> {
        let timing = *self.controller.timing();
        tracing::info!(
            "Detection session {} started (camera: {}, classifier: {}, events: {}, poll: {}ms, cooldown: {}ms, debounce: {}ms)",
            self.session_id,
            self.sampler.name(),
            self.classifier.name(),
            self.store.name(),
            timing.poll_interval.as_millis(),
            timing.cooldown.as_millis(),
            timing.debounce.as_millis()
        );

        let mut shutdown = self.shutdown_rx.clone();
        let clock = self.clock.clone();
        let mut in_flight: Option<InFlight> = None;

        let outcome = loop {
            if *shutdown.borrow_and_update() {
                break Ok(());
            }
            let cooldown_deadline = self.controller.cooldown_deadline();

            tokio::select! {
                _ = shutdown.changed() => {
                    break Ok(());
                }
                _ = wait_for_deadline(clock.as_ref(), cooldown_deadline) => {
                    self.controller.expire_cooldown(self.clock.now());
                    self.sync_alert_status();
                }
                joined = join_in_flight(&mut in_flight) => {
                    let Some(done) = in_flight.take() else {
                        continue;
                    };
                    if let Err(e) = self.settle(done.ticket, joined) {
                        break Err(e);
                    }
                }
                more = ticks.tick() => {
                    if !more {
                        tracing::info!("Tick source ended");
                        break Ok(());
                    }
                    self.metrics.ticks += 1;
                    if in_flight.is_some() {
                        self.metrics.overruns += 1;
                        tracing::debug!("Tick overran, previous classification still in flight");
                        continue;
                    }

                    let now = self.clock.now();
                    match self.controller.begin_tick(now) {
                        Some(ticket) => {
                            tracing::debug!("Tick {} started at {}ms", ticket.id, now.as_millis());
                            in_flight = Some(InFlight {
                                ticket,
                                handle: self.spawn_tick(ticket),
                            });
                        }
                        None => {
                            self.metrics.suppressed += 1;
                            tracing::debug!("Tick not sampled during cooldown");
                        }
                    }
                    self.sync_alert_status();
                }
            }
        };

        self.active.store(false, Ordering::SeqCst);
        if let Some(pending) = in_flight.take() {
            pending.handle.abort();
            tracing::debug!("Discarded in-flight tick {}", pending.ticket.id);
        }
        if let Some(starting) = self.playback.take() {
            starting.abort();
        }
        self.player.stop();
        self.sampler.release().await;
        self.status_tx.send_modify(|status| status.alert_active = false);

        self.metrics.store_failures = self.store_failures.load(Ordering::Relaxed);
        self.metrics.playback_failures = self.playback_failures.load(Ordering::Relaxed);
        self.metrics.log_summary(self.session_id);
        tracing::info!("Detection session {} ended", self.session_id);

        outcome.map(|()| self.metrics)
    }

    fn spawn_tick(&self, ticket: TickTicket) -> JoinHandle<Result<Verdict, TickFailure>> {
        let sampler = self.sampler.clone();
        let classifier = self.classifier.clone();
        let active = self.active.clone();
        let capture_timeout = self.controller.timing().poll_interval;

        tokio::spawn(async move {
            let frame = timeout(capture_timeout, sampler.capture_frame())
                .await
                .map_err(|_| CameraError::Timeout)??;
            if !active.load(Ordering::SeqCst) {
                return Err(TickFailure::Cancelled);
            }

            let verdict = classifier.classify(&frame).await?;
            tracing::debug!(
                "Tick {}: frame {} ({} bytes) -> picking_detected={}",
                ticket.id,
                frame.sequence,
                frame.bytes.len(),
                verdict.detected
            );
            Ok(verdict)
        })
    }

    fn settle(
        &mut self,
        ticket: TickTicket,
        joined: Result<Result<Verdict, TickFailure>, JoinError>,
    ) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.metrics.record_latency(now.saturating_sub(ticket.started_at));

        if !self.active.load(Ordering::SeqCst) {
            tracing::debug!("Discarding tick {} result, session no longer active", ticket.id);
            return Ok(());
        }

        let outcome = match joined {
            Ok(Err(TickFailure::Camera(err))) if err.is_terminal() => {
                return Err(self.camera_failed(err));
            }
            Ok(outcome) => outcome,
            Err(e) => Err(TickFailure::Task(e.to_string())),
        };
        match &outcome {
            Err(TickFailure::Classify(e)) if e.is_transport() => {
                tracing::warn!("Tick {}: classifier unreachable: {}", ticket.id, e);
            }
            Err(e) => tracing::warn!("Tick {} failed: {}", ticket.id, e),
            Ok(_) => {}
        }

        let decision = self.controller.resolve(ticket, outcome, now);
        self.metrics.record_decision(&decision);
        match decision {
            Decision::Triggered { at } => self.fire(at),
            Decision::Skipped(SkipReason::Failure) => {}
            Decision::Skipped(reason) => {
                tracing::debug!("Tick {} skipped: {:?}", ticket.id, reason);
            }
        }
        self.sync_alert_status();

        Ok(())
    }

    fn fire(&mut self, at: Duration) {
        tracing::info!(
            "Picking detected at {}ms, alert triggered (session {})",
            at.as_millis(),
            self.session_id
        );
        self.status_tx.send_modify(|status| status.alert_active = true);

        self.log_event(Utc::now());
        self.start_playback();
    }

    /// Clip listing and output startup run off the loop; a slow device never delays ticks or shutdown
    fn start_playback(&mut self) {
        let player = self.player.clone();
        let clips = self.clips.clone();
        let failures = self.playback_failures.clone();

        if let Some(previous) = self.playback.take() {
            previous.abort();
        }
        self.playback = Some(tokio::spawn(async move {
            let pool = match clips.list().await {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::warn!("Failed to read alert clips: {}", e);
                    Vec::new()
                }
            };

            match player.play_alert(&pool).await {
                Ok(played) => {
                    tracing::debug!("Alert clip '{}' started", played.name);
                }
                Err(AlertError::NoClipsAvailable) => {
                    tracing::warn!("No alert clips in {}, alert is silent", clips.dir().display());
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Alert playback failed: {}", e);
                }
            }
        }));
    }

    /// Insert without waiting on the store
    fn log_event(&self, timestamp: DateTime<Utc>) {
        let store = self.store.clone();
        let failures = self.store_failures.clone();

        tokio::spawn(async move {
            if let Err(e) = store.insert(timestamp).await {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to log picking event to {}: {}", store.name(), e);
            }
        });
    }

    fn camera_failed(&mut self, err: CameraError) -> SessionError {
        tracing::error!("Camera lost, ending session {}: {}", self.session_id, err);
        let message = err.to_string();
        self.status_tx.send_modify(|status| status.camera_error = Some(message));
        SessionError::Camera(err)
    }

    fn sync_alert_status(&self) {
        let cooling = self.controller.is_cooling_down();
        let changed = self.status_tx.send_if_modified(|status| {
            if status.alert_active != cooling {
                status.alert_active = cooling;
                true
            } else {
                false
            }
        });
        if changed && !cooling {
            tracing::debug!("Cooldown over, alert cleared");
        }
    }
}

async fn wait_for_deadline(clock: &dyn Clock, deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => clock.sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join_in_flight(slot: &mut Option<InFlight>) -> Result<Result<Verdict, TickFailure>, JoinError> {
    match slot {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingOutput;
    use crate::alert::PlaybackPolicy;
    use crate::camera::FramePayload;
    use crate::classifier::ClassifyError;
    use crate::controller::{ChannelTicks, IntervalTicks, ManualClock, MonotonicClock};
    use crate::events::{AlertEvent, StoreError};
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum CameraMode {
        Frames,
        NoFrame,
        Ended,
    }

    struct FakeSampler {
        mode: Mutex<CameraMode>,
        sequence: AtomicU64,
        released: AtomicBool,
    }

    impl FakeSampler {
        fn new(mode: CameraMode) -> Self {
            Self {
                mode: Mutex::new(mode),
                sequence: AtomicU64::new(0),
                released: AtomicBool::new(false),
            }
        }

        fn set_mode(&self, mode: CameraMode) {
            *self.mode.lock().unwrap() = mode;
        }
    }

    #[async_trait]
    impl FrameSampler for FakeSampler {
        async fn capture_frame(&self) -> Result<FramePayload, CameraError> {
            match *self.mode.lock().unwrap() {
                CameraMode::Frames => {
                    let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                    Ok(FramePayload::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], sequence))
                }
                CameraMode::NoFrame => Err(CameraError::NoFrame),
                CameraMode::Ended => Err(CameraError::StreamEnded),
            }
        }

        async fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "Fake camera"
        }
    }

    struct FakeClassifier {
        detected: AtomicBool,
        fail: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeClassifier {
        fn new(detected: bool, delay: Duration) -> Self {
            Self {
                detected: AtomicBool::new(detected),
                fail: AtomicBool::new(false),
                delay,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, _frame: &FramePayload) -> Result<Verdict, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClassifyError::Backend {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(Verdict {
                detected: self.detected.load(Ordering::SeqCst),
            })
        }

        fn name(&self) -> &str {
            "Fake classifier"
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<DateTime<Utc>>>,
        fail: bool,
    }

    impl RecordingStore {
        fn count(&self) -> usize {
            self.inserted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventStore for RecordingStore {
        async fn insert(&self, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Request("connection refused".to_string()));
            }
            self.inserted.lock().unwrap().push(timestamp);
            Ok(())
        }

        async fn select_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<AlertEvent>, StoreError> {
            let events = self
                .inserted
                .lock()
                .unwrap()
                .iter()
                .copied()
                .map(AlertEvent::new)
                .collect();
            Ok(crate::events::in_range(events, start, end))
        }

        fn name(&self) -> &str {
            "Recording store"
        }
    }

    struct Harness {
        sampler: Arc<FakeSampler>,
        classifier: Arc<FakeClassifier>,
        store: Arc<RecordingStore>,
        output: Arc<RecordingOutput>,
        clips_dir: PathBuf,
    }

    impl Harness {
        fn new(classifier: FakeClassifier, store: RecordingStore, clips: &[&str]) -> Self {
            let clips_dir = std::env::temp_dir().join(format!("pick-guard-session-{}", Uuid::new_v4()));
            if !clips.is_empty() {
                std::fs::create_dir_all(&clips_dir).unwrap();
                for clip in clips {
                    std::fs::write(clips_dir.join(clip), b"ID3").unwrap();
                }
            }

            Self {
                sampler: Arc::new(FakeSampler::new(CameraMode::Frames)),
                classifier: Arc::new(classifier),
                store: Arc::new(store),
                output: Arc::new(RecordingOutput::default()),
                clips_dir,
            }
        }

        fn with_output(mut self, output: RecordingOutput) -> Self {
            self.output = Arc::new(output);
            self
        }

        fn start(&self, timing: Timing) -> (JoinHandle<Result<LoopMetrics, SessionError>>, SessionHandle) {
            self.start_with(
                timing,
                Arc::new(MonotonicClock::new()),
                Box::new(IntervalTicks::new(timing.poll_interval)),
            )
        }

        fn start_with(
            &self,
            timing: Timing,
            clock: Arc<dyn Clock>,
            ticks: Box<dyn TickSource>,
        ) -> (JoinHandle<Result<LoopMetrics, SessionError>>, SessionHandle) {
            let player = AlertPlayer::with_rng(
                self.output.clone(),
                PlaybackPolicy::default(),
                StdRng::seed_from_u64(1),
            );
            let components = SessionComponents {
                sampler: self.sampler.clone(),
                classifier: self.classifier.clone(),
                store: self.store.clone(),
                player: Arc::new(player),
                clips: ClipLibrary::new(self.clips_dir.clone()),
            };
            let (session, handle) = DetectionSession::new(components, timing, clock);
            (tokio::spawn(session.run(ticks)), handle)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.clips_dir);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_one_alert_and_clears_after_cooldown() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(100)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.output.opened(), vec!["beep-1s.mp3".to_string()]);
        assert_eq!(harness.store.count(), 1);

        sleep(ms(2_800)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 1);

        sleep(ms(200)).await;
        assert!(!handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 1);
        assert_eq!(harness.store.count(), 1);

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.triggers, 1);
        assert_eq!(metrics.suppressed, 6);
        assert!(harness.classifier.calls() >= 7);
        assert!(harness.sampler.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_positives_respect_cooldown_and_debounce() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(12_100)).await;
        handle.stop();
        let metrics = task.await.unwrap().unwrap();

        // Triggers at 0, 5500 and 11000.
        assert_eq!(metrics.triggers, 3);
        assert_eq!(harness.output.opened().len(), 3);
        assert_eq!(harness.store.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_and_debounce_boundaries_are_exact() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"]);
        let clock = Arc::new(ManualClock::at(0));
        let (tick, ticks) = ChannelTicks::channel();
        let (task, handle) = harness.start_with(Timing::default(), clock.clone(), Box::new(ticks));

        // Paused time only moves once the session and its tick tasks are idle.
        let tick_at = |at: u64| {
            clock.set(ms(at));
            tick.send(()).unwrap();
        };

        tick_at(0);
        sleep(ms(1)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 1);

        tick_at(2_999);
        sleep(ms(1)).await;
        assert!(handle.status().alert_active);

        clock.set(ms(3_000));
        sleep(ms(1)).await;
        assert!(!handle.status().alert_active);

        tick_at(3_000);
        sleep(ms(1)).await;
        tick_at(5_000);
        sleep(ms(1)).await;
        assert!(!handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 1);

        tick_at(5_001);
        sleep(ms(1)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 2);

        drop(tick);
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.ticks, 5);
        assert_eq!(metrics.triggers, 2);
        // Cooling at 2999, debounced at 3000 and 5000.
        assert_eq!(metrics.suppressed, 3);
        assert_eq!(harness.store.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_audio_output_never_delays_the_loop() {
        let output = RecordingOutput {
            open_delay: ms(2_000),
            ..RecordingOutput::default()
        };
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"])
            .with_output(output);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(1_100)).await;
        assert!(handle.status().alert_active);
        assert!(harness.output.opened().is_empty());

        let stopping = Instant::now();
        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert!(stopping.elapsed() < ms(100));
        // Ticks at 0, 500 and 1000 all ran while the clip was still opening.
        assert_eq!(metrics.ticks, 3);
        assert_eq!(metrics.triggers, 1);

        sleep(ms(3_000)).await;
        assert!(harness.output.opened().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn negatives_never_alert() {
        let harness = Harness::new(FakeClassifier::new(false, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());
        let status = handle.subscribe();

        sleep(ms(5_100)).await;
        assert!(!status.has_changed().unwrap());
        handle.stop();
        let metrics = task.await.unwrap().unwrap();

        assert_eq!(metrics.triggers, 0);
        assert_eq!(metrics.negatives, 11);
        assert!(harness.output.opened().is_empty());
        assert_eq!(harness.store.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_clip_library_still_marks_alert_active() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &[]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(100)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.store.count(), 1);
        assert!(harness.output.opened().is_empty());

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.triggers, 1);
        assert_eq!(metrics.playback_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_does_not_block_alert() {
        let store = RecordingStore {
            fail: true,
            ..RecordingStore::default()
        };
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), store, &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(100)).await;
        assert!(handle.status().alert_active);
        assert_eq!(harness.output.opened().len(), 1);

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.store_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classification_skips_overlapping_ticks() {
        let harness = Harness::new(FakeClassifier::new(false, ms(1_200)), RecordingStore::default(), &[]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(2_900)).await;
        // Rounds start at 0 and 1500; ticks at 500, 1000, 2000 and 2500 overrun.
        assert_eq!(harness.classifier.calls(), 2);

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.ticks, 6);
        assert_eq!(metrics.overruns, 4);
        assert_eq!(metrics.negatives, 2);
        assert_eq!(metrics.worst_latency, ms(1_200));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_classification() {
        let harness = Harness::new(FakeClassifier::new(true, ms(2_000)), RecordingStore::default(), &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(500)).await;
        handle.stop();
        let metrics = task.await.unwrap().unwrap();

        sleep(ms(5_000)).await;
        assert_eq!(metrics.triggers, 0);
        assert!(!handle.status().alert_active);
        assert!(!handle.is_active());
        assert!(harness.output.opened().is_empty());
        assert_eq!(harness.store.count(), 0);
        assert!(harness.sampler.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_failures_are_absorbed() {
        let classifier = FakeClassifier::new(true, Duration::ZERO);
        classifier.fail.store(true, Ordering::SeqCst);
        let harness = Harness::new(classifier, RecordingStore::default(), &["beep-1s.mp3"]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(1_100)).await;
        assert!(!handle.status().alert_active);

        harness.classifier.fail.store(false, Ordering::SeqCst);
        sleep(ms(500)).await;
        assert!(handle.status().alert_active);

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.failures, 3);
        assert_eq!(metrics.triggers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frames_skip_ticks_until_camera_recovers() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &["beep-1s.mp3"]);
        harness.sampler.set_mode(CameraMode::NoFrame);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(1_100)).await;
        assert_eq!(harness.classifier.calls(), 0);
        assert!(!handle.status().alert_active);

        harness.sampler.set_mode(CameraMode::Frames);
        sleep(ms(500)).await;
        assert!(handle.status().alert_active);

        handle.stop();
        let metrics = task.await.unwrap().unwrap();
        assert_eq!(metrics.failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_camera_ends_session_with_error() {
        let harness = Harness::new(FakeClassifier::new(true, Duration::ZERO), RecordingStore::default(), &[]);
        harness.sampler.set_mode(CameraMode::Ended);
        let (task, handle) = harness.start(Timing::default());

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::Camera(CameraError::StreamEnded))));

        let status = handle.status();
        assert!(!status.alert_active);
        assert_eq!(status.camera_error.as_deref(), Some("Camera stream ended"));
        assert_eq!(status.session_id, handle.session_id());
        assert!(harness.sampler.released.load(Ordering::SeqCst));
        assert_eq!(harness.classifier.calls(), 0);
    }

    #[test]
    fn status_serializes_with_session_id() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(SessionStatus::new(id)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "alert_active": false, "camera_error": null, "session_id": id.to_string() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_ends_the_session() {
        let harness = Harness::new(FakeClassifier::new(false, Duration::ZERO), RecordingStore::default(), &[]);
        let (task, handle) = harness.start(Timing::default());

        sleep(ms(600)).await;
        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }
}
