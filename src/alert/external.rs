// src/alert/external.rs
// Playback through an external command-line player (ffplay by default)

use super::output::{AudioOutput, PlaybackError, Voice};
use crate::config::AlertsConfig;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ExternalOutput {
    command: String,
    args: Vec<String>,
    probe_command: String,
}

impl ExternalOutput {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            command: config.player_command.clone(),
            args: config.player_args.clone(),
            probe_command: config.probe_command.clone(),
        }
    }

    async fn probe_duration(&self, path: &Path) -> Option<Duration> {
        let probe = Command::new(&self.probe_command)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_probe_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                tracing::debug!("Duration probe failed for {}: {}", path.display(), output.status);
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("Duration probe '{}' unavailable: {}", self.probe_command, e);
                None
            }
            Err(_) => {
                tracing::debug!("Duration probe timed out for {}", path.display());
                None
            }
        }
    }
}

#[async_trait]
impl AudioOutput for ExternalOutput {
    async fn open(&self, path: &Path) -> Result<Box<dyn Voice>, PlaybackError> {
        if !path.exists() {
            return Err(PlaybackError::Io(format!("{} does not exist", path.display())));
        }

        let duration = self.probe_duration(path).await;
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Spawn(format!("'{}': {}", self.command, e)))?;

        tracing::debug!(
            "External playback started (pid: {:?}): {}",
            child.id(),
            path.display()
        );

        Ok(Box::new(ExternalVoice {
            child: Some(child),
            duration,
        }))
    }

    fn name(&self) -> &str {
        "External player"
    }
}

struct ExternalVoice {
    child: Option<Child>,
    duration: Option<Duration>,
}

impl Voice for ExternalVoice {
    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

fn parse_probe_output(stdout: &str) -> Option<Duration> {
    let secs: f64 = stdout.lines().next()?.trim().parse().ok()?;
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
