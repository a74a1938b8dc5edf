//! Kiosk Configuration - Release feed, storage, installer and host hooks
//!
//! Configuration lives in /etc/kiosk/config.toml (override with KIOSK_CONFIG).
//! Every field has a default, so a missing or partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/kiosk";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "KIOSK_CONFIG";

/// Kiosk data directory (artifacts, catalog, spool, inbox)
pub const DATA_DIR: &str = "/var/lib/kiosk";

/// Release feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// API root, e.g. https://api.github.com
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_repo")]
    pub repo: String,

    /// File extension of the installable asset (without the dot)
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// Exact asset name of the checksum manifest
    #[serde(default = "default_checksum_asset")]
    pub checksum_asset: String,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_owner() -> String {
    "imdtouch".to_string()
}

fn default_repo() -> String {
    "JCI_Andriod12".to_string()
}

fn default_artifact_extension() -> String {
    "apk".to_string()
}

fn default_checksum_asset() -> String {
    "checksums.txt".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("kiosk-updater/{}", env!("CARGO_PKG_VERSION"))
}

impl ReleaseConfig {
    /// Endpoint of the latest release for the configured repository
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            owner: default_owner(),
            repo: default_repo(),
            artifact_extension: default_artifact_extension(),
            checksum_asset: default_checksum_asset(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Local storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// How many installed artifacts to keep for rollback (valid: 1-100)
    #[serde(default = "default_max_stored_versions")]
    pub max_stored_versions: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DATA_DIR)
}

fn default_max_stored_versions() -> usize {
    10
}

impl StorageConfig {
    pub fn effective_max_stored_versions(&self) -> usize {
        self.max_stored_versions.clamp(1, 100)
    }

    /// Staging file, retained artifacts, catalog and lock
    pub fn updates_dir(&self) -> PathBuf {
        self.data_dir.join("updates")
    }

    /// Install sessions waiting for the platform installer
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Completion tickets, one subdirectory per callback identity
    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    /// Last successfully installed version
    pub fn installed_path(&self) -> PathBuf {
        self.data_dir.join("installed.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_stored_versions: default_max_stored_versions(),
        }
    }
}

/// Platform installer hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// argv of the install command; `{artifact}` is replaced by the artifact path
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// Extra argument appended when a downgrade is allowed
    #[serde(default = "default_downgrade_arg")]
    pub downgrade_arg: Option<String>,

    /// Exit code meaning "needs user confirmation"; stdout carries the handle
    #[serde(default = "default_pending_exit_code")]
    pub pending_exit_code: i32,

    /// Open sessions older than this are abandoned
    #[serde(default = "default_stale_session_secs")]
    pub stale_session_secs: u64,
}

fn default_install_command() -> Vec<String> {
    vec![
        "pm".to_string(),
        "install".to_string(),
        "-r".to_string(),
        "{artifact}".to_string(),
    ]
}

fn default_downgrade_arg() -> Option<String> {
    Some("-d".to_string())
}

fn default_pending_exit_code() -> i32 {
    3
}

fn default_stale_session_secs() -> u64 {
    900
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install_command: default_install_command(),
            downgrade_arg: default_downgrade_arg(),
            pending_exit_code: default_pending_exit_code(),
            stale_session_secs: default_stale_session_secs(),
        }
    }
}

/// Host application hooks run by the completion handler
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Relaunch the kiosk with fresh task state
    #[serde(default)]
    pub relaunch_command: Vec<String>,

    /// Present a confirmation handle to the user; `{handle}` placeholder
    #[serde(default)]
    pub confirm_command: Vec<String>,

    /// Show a failure message; `{message}` placeholder
    #[serde(default)]
    pub notify_command: Vec<String>,
}

/// Installed version used until the first install is recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_version_label")]
    pub version_label: String,

    #[serde(default = "default_version_code")]
    pub version_code: u32,
}

fn default_version_label() -> String {
    "1.0.0".to_string()
}

fn default_version_code() -> u32 {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version_label: default_version_label(),
            version_code: default_version_code(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete kiosk updater configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KioskConfig {
    #[serde(default)]
    pub release: ReleaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub installer: InstallerConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl KioskConfig {
    /// Load from KIOSK_CONFIG or /etc/kiosk/config.toml
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load from an explicit path; unreadable or invalid files yield defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Invalid config {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Cannot read config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE),
    }
}
