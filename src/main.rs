//! pick-guard - webcam picking detection with audible alerts
//!
//! Main entry point for the CLI application.

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pick_guard_lib::{
    alert::{output_from_config, save_recording, AlertPlayer, MicRecorder, PlaybackPolicy},
    clips::ClipLibrary,
    config::{self, AppConfig},
    controller::{IntervalTicks, LoopMetrics, SessionError, SessionHandle},
    events::store_from_config,
    history::{self, HistorySummary, TimeFrame},
    prepare_session, SetupError,
};

/// Watches the webcam for picking and plays an alert when it happens
#[derive(Parser, Debug)]
#[command(name = "pick-guard", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the detection loop (until Ctrl+C)
    Run {
        /// Camera device (overrides config)
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Manage alert clips
    Clips {
        #[command(subcommand)]
        action: ClipsAction,
    },

    /// Show logged picking events
    History {
        /// Time frame: D, W, M or 6M
        #[arg(short, long, default_value = "D")]
        frame: TimeFrame,

        /// Any date inside the frame (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Step the frame back (negative) or forward
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        shift: i32,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ClipsAction {
    /// List playable clips
    List,

    /// Copy an audio file into the clip library
    Upload {
        file: PathBuf,

        /// Name to store it under (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Record a new clip from the microphone
    Record {
        name: String,

        /// Recording length in seconds
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..=60))]
        seconds: u64,

        /// Input device (overrides config)
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Play a clip the way an alert would
    Play { name: String },

    /// List microphones usable for recording
    Inputs,

    /// Remove a clip by name
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    // Load environment variables from .env file
    let _ = dotenvy::dotenv();

    let mut config = config::load_or_create(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config::apply_env_overrides(&mut config);

    match args.command {
        Command::Run { device } => {
            if let Some(device) = device {
                config.camera.device = device;
            }
            config::validate(&config)?;
            run_detection(&config).await
        }
        Command::Clips { action } => manage_clips(&config, action).await,
        Command::History {
            frame,
            date,
            shift,
            json,
        } => {
            config::validate(&config)?;
            let anchor = history::shift(frame, date.unwrap_or_else(|| Local::now().date_naive()), shift);
            show_history(&config, frame, anchor, json).await
        }
    }
}

async fn run_detection(config: &AppConfig) -> anyhow::Result<()> {
    info!("Starting {} v{}", pick_guard_lib::NAME, pick_guard_lib::VERSION);
    info!("Classifier: {}", config.classifier.url);
    info!("Alert clips: {}", config.alerts.dir.display());
    if let Some(key) = config.events.api_key() {
        info!("Event store key: {}", config::mask_api_key(&key));
    }

    let (session, handle) = match prepare_session(config).await {
        Ok(prepared) => prepared,
        Err(SetupError::Camera(e)) => {
            error!("Camera unavailable: {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    spawn_status_logger(&handle);

    let ticks = Box::new(IntervalTicks::new(config.timing.poll_interval()));
    let mut task = tokio::spawn(session.run(ticks));

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            handle.stop();
            task.await?
        }
    };

    finish(result)
}

fn finish(result: Result<LoopMetrics, SessionError>) -> anyhow::Result<()> {
    match result {
        Ok(metrics) => {
            info!(
                "Stopped after {} ticks, {} alerts",
                metrics.ticks, metrics.triggers
            );
            Ok(())
        }
        Err(e) => {
            error!("Session ended: {}", e);
            Err(e.into())
        }
    }
}

fn spawn_status_logger(handle: &SessionHandle) {
    let mut status = handle.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Some(camera_error) = &current.camera_error {
                warn!("[{}] camera error: {}", current.session_id, camera_error);
            } else if current.alert_active {
                info!("[{}] picking detected", current.session_id);
            } else {
                info!("[{}] watching", current.session_id);
            }
        }
    });
}

async fn manage_clips(config: &AppConfig, action: ClipsAction) -> anyhow::Result<()> {
    let library = ClipLibrary::new(config.alerts.dir.clone());

    match action {
        ClipsAction::List => {
            let clips = library.list().await?;
            if clips.is_empty() {
                println!("No clips in {}", library.dir().display());
            }
            for clip in clips {
                println!("{}", clip.name);
            }
        }
        ClipsAction::Upload { file, name } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let requested = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("upload file has no usable name")?,
            };
            let stored = library.upload(&requested, &bytes).await?;
            println!("{}", stored);
        }
        ClipsAction::Record { name, seconds, device } => {
            let recorder = MicRecorder::new(device.or_else(|| config.alerts.input_device.clone()));
            println!("Recording {}s...", seconds);
            let recording = recorder.record(Duration::from_secs(seconds)).await?;
            let stored = save_recording(&library, &name, &recording).await?;
            println!("{}", stored);
        }
        ClipsAction::Play { name } => {
            let clip = library.find(&name).await?;
            let player = AlertPlayer::new(
                output_from_config(&config.alerts),
                PlaybackPolicy::from_config(&config.alerts),
            );
            let played = player.play_clip(&clip).await?;
            let until = played
                .halt_after
                .or(played.duration)
                .unwrap_or_else(|| player.policy().truncate_at);

            tokio::select! {
                _ = tokio::time::sleep(until) => {}
                _ = shutdown_signal() => {}
            }
            player.stop();
        }
        ClipsAction::Inputs => {
            for device in MicRecorder::list_input_devices()? {
                println!("{}", device);
            }
        }
        ClipsAction::Delete { name } => {
            library.delete(&name).await?;
            println!("Deleted {}", name);
        }
    }

    Ok(())
}

async fn show_history(config: &AppConfig, frame: TimeFrame, anchor: NaiveDate, json: bool) -> anyhow::Result<()> {
    let store = store_from_config(&config.events)?;
    let summary = history::load(store.as_ref(), frame, anchor, &Local).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_history(&summary);
    }
    Ok(())
}

fn print_history(summary: &HistorySummary) {
    println!("Picking history ({} containing {})\n", summary.frame, summary.anchor);
    println!("Total {} picks {}", summary.total, summary.period_label());
    println!(
        "Most active picking at {}\n",
        summary.most_active.as_deref().unwrap_or("N/A")
    );

    if summary.total == 0 {
        println!("No data available for the selected time range.");
        return;
    }

    let widest = summary.buckets.iter().map(|b| b.picks).max().unwrap_or(1).max(1);
    for bucket in &summary.buckets {
        let bar = "#".repeat((bucket.picks * 40).div_ceil(widest));
        println!("{:>6} {:>4} {}", bucket.label, bucket.picks, bar);
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
