//! Configuration loading and root folder resolution
//!
//! Resolution priority for the config file:
//! 1. Command-line argument (highest priority)
//! 2. `SVTK_CONFIG` environment variable
//! 3. `~/.config/svtk/config.toml`, then `/etc/svtk/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing or unparsable config file never aborts startup: a warning is logged
//! and compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Lower bound for the abandonment threshold (minutes)
pub const MIN_ABANDON_THRESHOLD_MINUTES: u64 = 1;

/// Lower bound for the self-scan interval (seconds)
pub const MIN_SELF_SCAN_SECONDS: u64 = 15;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database, event log and journal
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Listen address of the hook service
    #[serde(default)]
    pub bind: Option<String>,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub pubsub: PubSubConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Question/answer metadata source
///
/// Without a path the catalog tables are read from the service database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Survey engine database, opened read-only
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// How sibling rows on one transport session are treated after an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Delete sibling non-terminal rows sharing the transport session
    #[default]
    Collapse,
    /// Track every correlation key (e.g. one per browser tab) separately
    Keep,
}

/// Session tracking and abandonment detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// No heartbeat within this many minutes and not completed => abandoned
    #[serde(default = "default_abandon_threshold_minutes")]
    pub abandon_threshold_minutes: u64,

    /// Abandonment scan runs at most this often across all requests
    #[serde(default = "default_self_scan_every_seconds")]
    pub self_scan_every_seconds: u64,

    #[serde(default)]
    pub duplicate_rows: DuplicatePolicy,

    /// Minimum gap between two survey_started events of one survey scope
    #[serde(default = "default_started_debounce_seconds")]
    pub started_debounce_seconds: u64,
}

/// Outbound webhook sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    /// Optional single custom authentication header
    #[serde(default)]
    pub auth_header_name: String,

    #[serde(default)]
    pub auth_header_value: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Google Pub/Sub sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// File holding an OAuth2 access token (refreshed out of band)
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// REST endpoint; point at the emulator for local runs
    #[serde(default = "default_pubsub_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Mirror log output into `<root>/logs/svtk-event.log`
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Append every dispatch attempt to `<root>/logs/svtk-journal.ndjson`
    #[serde(default = "default_true")]
    pub json_journal: bool,
}

fn default_true() -> bool {
    true
}

fn default_abandon_threshold_minutes() -> u64 {
    3
}

fn default_self_scan_every_seconds() -> u64 {
    60
}

fn default_started_debounce_seconds() -> u64 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_topic() -> String {
    "survey-events".to_string()
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            abandon_threshold_minutes: default_abandon_threshold_minutes(),
            self_scan_every_seconds: default_self_scan_every_seconds(),
            duplicate_rows: DuplicatePolicy::default(),
            started_debounce_seconds: default_started_debounce_seconds(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            auth_header_name: String::new(),
            auth_header_value: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            topic: default_topic(),
            credentials_path: None,
            endpoint: default_pubsub_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            event_log: true,
            json_journal: true,
        }
    }
}

impl TrackingConfig {
    /// Threshold clamped to its floor
    pub fn abandon_threshold(&self) -> chrono::Duration {
        let minutes = self
            .abandon_threshold_minutes
            .max(MIN_ABANDON_THRESHOLD_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }

    /// Threshold in whole minutes, as reported in `session_abandoned`
    pub fn abandon_threshold_minutes(&self) -> u64 {
        self.abandon_threshold_minutes
            .max(MIN_ABANDON_THRESHOLD_MINUTES)
    }

    /// Scan interval clamped to its floor
    pub fn self_scan_interval(&self) -> chrono::Duration {
        let secs = self.self_scan_every_seconds.max(MIN_SELF_SCAN_SECONDS);
        chrono::Duration::seconds(secs as i64)
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration following the resolution priority, never failing
    pub fn load(cli_path: Option<&Path>) -> Self {
        let Some(path) = locate_config_file(cli_path) else {
            info!("No config file found, using compiled defaults");
            return Self::default().with_env_overrides();
        };

        match Self::from_file(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config.with_env_overrides()
            }
            Err(e) => {
                warn!(
                    "Failed to load config {} ({}), using compiled defaults",
                    path.display(),
                    e
                );
                Self::default().with_env_overrides()
            }
        }
    }

    /// Apply `SVTK_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("SVTK_ROOT_FOLDER") {
            if !root.trim().is_empty() {
                self.root_folder = Some(PathBuf::from(root));
            }
        }
        if let Ok(url) = std::env::var("SVTK_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.webhook.url = url;
            }
        }
        if let Ok(bind) = std::env::var("SVTK_BIND") {
            if !bind.trim().is_empty() {
                self.bind = Some(bind);
            }
        }
        self
    }

    /// Listen address, defaulting to localhost
    pub fn bind_address(&self) -> String {
        self.bind
            .clone()
            .unwrap_or_else(|| "127.0.0.1:5740".to_string())
    }

    /// Resolved root folder
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
    }
}

/// Find the config file to read, if any
fn locate_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("SVTK_CONFIG") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("svtk").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/svtk/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("svtk"))
        .unwrap_or_else(|| PathBuf::from("./svtk_data"))
}

/// Creates the root folder layout and names the files inside it
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create root and log directories if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("svtk.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.log_dir().join("svtk-event.log")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.log_dir().join("svtk-journal.ndjson")
    }
}
