use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "pick-guard.json";
const API_KEY_XOR_KEY: &[u8] = b"pick-guard-local-key-v1";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_COOLDOWN_MS: u64 = 3_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;
pub const DEFAULT_LONG_CLIP_THRESHOLD_MS: u64 = 5_000;
pub const DEFAULT_TRUNCATE_AT_MS: u64 = 3_000;
pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8000/detect";
pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
pub const DEFAULT_EVENTS_TABLE: &str = "picking_events";
const DEVICE_PLACEHOLDER: &str = "{device}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(String),

    #[error("Failed to save config: {0}")]
    Write(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub timing: TimingConfig,
    pub camera: CameraConfig,
    pub classifier: ClassifierConfig,
    pub alerts: AlertsConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub cooldown_ms: u64,
    pub debounce_ms: u64,
    /// Keep classifying while cooling down; positives are ignored either way
    pub classify_during_cooldown: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            classify_during_cooldown: true,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub command: String,
    /// `{device}` is replaced with `device`
    pub args: Vec<String>,
    pub acquire_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            command: "ffmpeg".to_string(),
            args: [
                "-loglevel", "error", "-f", "v4l2", "-i", DEVICE_PLACEHOLDER, "-vf", "fps=4",
                "-f", "mjpeg", "-q:v", "5", "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            acquire_timeout_ms: 5_000,
        }
    }
}

impl CameraConfig {
    pub fn resolved_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(DEVICE_PLACEHOLDER, &self.device))
            .collect()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLASSIFIER_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// WAV through cpal, everything else through the external player
    Auto,
    Native,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub dir: PathBuf,
    pub backend: AudioBackend,
    pub long_clip_threshold_ms: u64,
    pub truncate_at_ms: u64,
    pub player_command: String,
    pub player_args: Vec<String>,
    pub probe_command: String,
    /// Microphone for `clips record`; `None` picks the default input
    pub input_device: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("alerts"),
            backend: AudioBackend::Auto,
            long_clip_threshold_ms: DEFAULT_LONG_CLIP_THRESHOLD_MS,
            truncate_at_ms: DEFAULT_TRUNCATE_AT_MS,
            player_command: "ffplay".to_string(),
            player_args: ["-nodisp", "-autoexit", "-loglevel", "quiet"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_command: "ffprobe".to_string(),
            input_device: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventsBackend {
    Jsonl,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub backend: EventsBackend,
    pub path: PathBuf,
    pub rest_url: Option<String>,
    pub table: String,
    pub api_key_obfuscated: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            backend: EventsBackend::Jsonl,
            path: PathBuf::from("picking_events.jsonl"),
            rest_url: None,
            table: DEFAULT_EVENTS_TABLE.to_string(),
            api_key_obfuscated: None,
            timeout_ms: 5_000,
        }
    }
}

impl EventsConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_obfuscated
            .as_deref()
            .and_then(deobfuscate_api_key)
    }

    pub fn set_api_key(&mut self, api_key: Option<&str>) {
        self.api_key_obfuscated = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(obfuscate_api_key);
    }
}

/// Read the config at `path`, writing defaults if it does not exist yet
pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig::default();
        save(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(mut config) => {
            normalize_config(&mut config);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!("Config at {} is invalid ({}), restoring defaults", path.display(), e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = AppConfig::default();
            save(path, &config)?;
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| ConfigError::Write(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Write(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, json).map_err(|e| ConfigError::Write(e.to_string()))
}

/// Overlay environment variables (after `.env` has been loaded)
pub fn apply_env_overrides(config: &mut AppConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(base) = lookup("MODAL_BACKEND_URL") {
        config.classifier.url = format!("{}/detect", base.trim_end_matches('/'));
    }

    if let Some(dir) = lookup("PICK_GUARD_ALERTS_DIR") {
        config.alerts.dir = PathBuf::from(dir);
    }

    if let Some(device) = lookup("PICK_GUARD_CAMERA_DEVICE") {
        config.camera.device = device;
    }

    if let Some(url) = lookup("SUPABASE_URL") {
        config.events.backend = EventsBackend::Rest;
        config.events.rest_url = Some(url);
    }

    if let Some(key) = lookup("SUPABASE_ANON_KEY") {
        config.events.set_api_key(Some(&key));
    }
}

pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let positive = [
        ("timing.poll_interval_ms", config.timing.poll_interval_ms),
        ("timing.cooldown_ms", config.timing.cooldown_ms),
        ("alerts.truncate_at_ms", config.alerts.truncate_at_ms),
        ("classifier.timeout_ms", config.classifier.timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }

    if !config.classifier.url.starts_with("http://") && !config.classifier.url.starts_with("https://") {
        return Err(ConfigError::InvalidValue {
            field: "classifier.url".to_string(),
            message: format!("'{}' is not an http(s) URL", config.classifier.url),
        });
    }

    if config.events.backend == EventsBackend::Rest && config.events.rest_url.is_none() {
        return Err(ConfigError::InvalidValue {
            field: "events.rest_url".to_string(),
            message: "required for the rest backend".to_string(),
        });
    }

    Ok(())
}

/// Keep the first six and last four characters; short keys are fully hidden
pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 10 {
        return "******".to_string();
    }

    let prefix: String = chars[..6].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}********{}", prefix, suffix)
}

fn normalize_config(config: &mut AppConfig) {
    config.classifier.url = config.classifier.url.trim().to_string();
    if config.classifier.url.is_empty() {
        config.classifier.url = DEFAULT_CLASSIFIER_URL.to_string();
    }
    if config.camera.device.trim().is_empty() {
        config.camera.device = DEFAULT_CAMERA_DEVICE.to_string();
    }
    if config.events.table.trim().is_empty() {
        config.events.table = DEFAULT_EVENTS_TABLE.to_string();
    }
    config.events.rest_url = config
        .events
        .rest_url
        .take()
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty());
}

fn obfuscate_api_key(api_key: &str) -> String {
    let mut bytes = api_key.as_bytes().to_vec();
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= API_KEY_XOR_KEY[idx % API_KEY_XOR_KEY.len()];
    }
    BASE64_STANDARD.encode(bytes)
}

fn deobfuscate_api_key(obfuscated: &str) -> Option<String> {
    let mut bytes = BASE64_STANDARD.decode(obfuscated).ok()?;
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= API_KEY_XOR_KEY[idx % API_KEY_XOR_KEY.len()];
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("pick-guard-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn defaults_match_reference_timing() {
        let config = AppConfig::default();
        assert_eq!(config.timing.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.timing.cooldown(), Duration::from_millis(3_000));
        assert_eq!(config.timing.debounce(), Duration::from_millis(5_000));
        assert!(config.timing.classify_during_cooldown);
        assert_eq!(config.alerts.long_clip_threshold_ms, 5_000);
        assert_eq!(config.alerts.truncate_at_ms, 3_000);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let raw = r#"{ "timing": { "cooldown_ms": 1000 }, "alerts": { "backend": "external" } }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.timing.cooldown_ms, 1_000);
        assert_eq!(config.timing.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.alerts.backend, AudioBackend::External);
        assert_eq!(config.camera.device, DEFAULT_CAMERA_DEVICE);
    }

    #[test]
    fn device_placeholder_is_resolved() {
        let camera = CameraConfig {
            device: "/dev/video2".to_string(),
            ..CameraConfig::default()
        };
        let args = camera.resolved_args();
        assert!(args.contains(&"/dev/video2".to_string()));
        assert!(!args.iter().any(|a| a.contains(DEVICE_PLACEHOLDER)));
    }

    #[test]
    fn load_or_create_writes_defaults_and_recovers_corrupt_file() {
        let path = scratch_path(CONFIG_FILE);
        let created = load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.timing.cooldown_ms, DEFAULT_COOLDOWN_MS);

        fs::write(&path, "{ not json").unwrap();
        let recovered = load_or_create(&path).unwrap();
        assert_eq!(recovered.timing.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert!(path.with_extension("json.bak").exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MODAL_BACKEND_URL", "https://backend.example/"),
            ("SUPABASE_URL", "https://db.example"),
            ("SUPABASE_ANON_KEY", "anon-key-1234567890"),
            ("PICK_GUARD_ALERTS_DIR", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.classifier.url, "https://backend.example/detect");
        assert_eq!(config.events.backend, EventsBackend::Rest);
        assert_eq!(config.events.api_key().as_deref(), Some("anon-key-1234567890"));
        assert_eq!(config.alerts.dir, PathBuf::from("alerts"));
    }

    #[test]
    fn api_key_is_not_stored_in_clear() {
        let mut events = EventsConfig::default();
        events.set_api_key(Some("secret-anon-key"));
        let stored = events.api_key_obfuscated.clone().unwrap();
        assert!(!stored.contains("secret"));
        assert_eq!(events.api_key().as_deref(), Some("secret-anon-key"));
        assert_eq!(mask_api_key("secret-anon-key"), "secret********-key");
    }

    #[test]
    fn masking_counts_characters_not_bytes() {
        assert_eq!(mask_api_key("abcde\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}"), "******");
        assert_eq!(
            mask_api_key("abcde\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}xyz"),
            "abcde\u{e9}********\u{e9}xyz"
        );
        assert_eq!(mask_api_key("short"), "******");
    }

    #[test]
    fn rejects_zero_interval_and_bad_url() {
        let mut config = AppConfig::default();
        config.timing.poll_interval_ms = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.classifier.url = "ftp://nope".to_string();
        assert!(validate(&config).is_err());
    }
}
