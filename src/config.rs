use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub organize: OrganizeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_uploads: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_concurrent_uploads: default_max_concurrent(),
            flush_interval_secs: default_flush_interval(),
            log_level: default_log_level(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}
fn default_max_concurrent() -> usize {
    4
}
fn default_flush_interval() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Custom path for token storage
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Local tree mirrored to Drive.
    pub local_path: PathBuf,
    /// Drive folder ID that acts as the remote root.
    pub drive_folder_id: String,
    /// Custom path for the sync state document.
    pub state_path: Option<PathBuf>,
    /// Custom path for the retry queue document.
    pub queue_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Resolve the sync state file path: custom if provided, otherwise
    /// `$XDG_DATA_HOME/drivesyncd/uploads.json`.
    pub fn state_path(&self) -> Result<PathBuf> {
        resolve_data_path(self.state_path.as_deref(), "uploads.json")
    }

    /// Resolve the retry queue file path: custom if provided, otherwise
    /// `$XDG_DATA_HOME/drivesyncd/retry_queue.json`.
    pub fn queue_path(&self) -> Result<PathBuf> {
        resolve_data_path(self.queue_path.as_deref(), "retry_queue.json")
    }
}

fn resolve_data_path(custom: Option<&Path>, file_name: &str) -> Result<PathBuf> {
    match custom {
        Some(p) => Ok(p.to_path_buf()),
        None => {
            let dir = dirs::data_dir().context("Could not determine data directory")?;
            Ok(dir.join("drivesyncd").join(file_name))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// In-call retry attempts for each Drive API operation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    /// Times a failed upload is resubmitted from the retry queue.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry loop sleep when the queue is empty.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
    /// Pause between retried items.
    #[serde(default = "default_pause")]
    pub pause_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            max_retries: default_max_retries(),
            idle_poll_secs: default_idle_poll(),
            pause_secs: default_pause(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base() -> u64 {
    2
}
fn default_backoff_cap() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_idle_poll() -> u64 {
    60
}
fn default_pause() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Folders with no upload for this many days are trashed remotely.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u64,
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_after_days(),
            sweep_interval_hours: default_sweep_interval_hours(),
        }
    }
}

fn default_stale_after_days() -> u64 {
    15
}
fn default_sweep_interval_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizeConfig {
    /// Directory holding freshly downloaded media awaiting classification.
    pub source_path: Option<PathBuf>,
    /// External classifier command: invoked as `<cmd> <file>`, prints the
    /// detected domain on stdout (empty output = no match).
    pub classifier_cmd: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("drivesyncd").join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read config file: {}\n\
             Create it with your Drive app credentials and sync root.",
            path.display()
        )
    })?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.auth.client_id.is_empty() {
        anyhow::bail!("auth.client_id must not be empty");
    }
    if config.auth.client_secret.is_empty() {
        anyhow::bail!("auth.client_secret must not be empty");
    }
    if config.sync.drive_folder_id.is_empty() {
        anyhow::bail!("sync.drive_folder_id must not be empty");
    }

    Ok(config)
}
