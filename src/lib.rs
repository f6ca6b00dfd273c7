pub mod alert;
pub mod camera;
pub mod classifier;
pub mod clips;
pub mod config;
pub mod controller;
pub mod events;
pub mod history;

use alert::{output_from_config, AlertPlayer, PlaybackPolicy};
use camera::{CameraError, CameraStream};
use classifier::{ClassifyError, RemoteClassifier};
use clips::ClipLibrary;
use config::AppConfig;
use controller::{DetectionSession, MonotonicClock, SessionComponents, SessionHandle, Timing};
use events::{store_from_config, StoreError};
use std::sync::Arc;
use thiserror::Error;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Classifier setup failed: {0}")]
    Classifier(#[from] ClassifyError),

    #[error("Event store setup failed: {0}")]
    Store(#[from] StoreError),
}

/// Build every component from config and return a session ready to run.
/// The camera is acquired here, so a missing device fails before any tick.
pub async fn prepare_session(config: &AppConfig) -> Result<(DetectionSession, SessionHandle), SetupError> {
    let classifier = RemoteClassifier::new(&config.classifier)?;
    let store = store_from_config(&config.events)?;

    tracing::info!("Opening camera {}", config.camera.device);
    let camera = CameraStream::open(&config.camera).await?;

    let player = AlertPlayer::new(
        output_from_config(&config.alerts),
        PlaybackPolicy::from_config(&config.alerts),
    );

    let components = SessionComponents {
        sampler: Arc::new(camera),
        classifier: Arc::new(classifier),
        store,
        player: Arc::new(player),
        clips: ClipLibrary::new(config.alerts.dir.clone()),
    };

    Ok(DetectionSession::new(
        components,
        Timing::from_config(&config.timing),
        Arc::new(MonotonicClock::new()),
    ))
}
