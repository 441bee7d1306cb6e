//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables. Anything missing or unparsable keeps its default
//! and is reported with a warning instead of failing startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Time};

use crate::error::{Error, Result};
use crate::lifecycle::{Categories, EngineConfig, RetentionPolicy, DEFAULT_CATEGORIES};
use crate::remote::UploadConfig;

/// Default location of the YAML settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.yaml";

/// Longest accepted task interval (one week).
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Longest accepted scheduler tick (one hour).
pub const MAX_TICK_SECS: u64 = 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Root directory holding one subdirectory per category.
    /// Default: /var/log/logkeep
    pub log_path: PathBuf,

    /// Categories to rotate. An empty list means every subdirectory.
    pub categories: Vec<String>,

    pub rotation: RotationConfig,
    pub cleanup: CleanupConfig,
    pub remote: RemoteConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Default: true
    pub enabled: bool,

    /// Rotate files unmodified for longer than this.
    /// Default: 3 days
    pub max_age_days: u32,

    /// Rotate files larger than this.
    /// Default: 50 MB
    pub max_size_mb: u64,

    /// Default: 60 minutes
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Delete files unmodified for longer than this.
    /// Default: 7 days with remote shipping, otherwise the rotation age.
    pub max_age_days: Option<u32>,

    /// Local time of day for the daily sweep, `HH:MM`.
    ///
    /// The local UTC offset is resolved once at startup, so after a daylight
    /// saving change the sweep runs an hour early or late until restart.
    /// Default: 02:00
    pub at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Objects written under a local or mounted directory.
    Directory,
    /// Amazon S3 or a compatible service (requires the `s3` feature).
    S3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Default: false
    pub enabled: bool,

    /// Default: directory
    pub backend: RemoteBackend,

    /// Bucket name, or target directory for the directory backend.
    /// Default: logkeep-logs
    pub bucket: String,

    /// Default: us-east-1
    pub region: String,

    /// Default: logkeep-logs
    pub key_prefix: String,

    /// Default: logkeep
    pub source_tag: String,

    /// Default: true
    pub delete_after_upload: bool,

    /// Deadline for a single remote call.
    /// Default: 300 seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Upload discovery cadence.
    /// Default: 30 minutes
    pub check_interval_minutes: u64,

    /// How often the loop checks for due tasks.
    /// Default: 60 seconds
    pub tick_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/logkeep"),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            rotation: RotationConfig::default(),
            cleanup: CleanupConfig::default(),
            remote: RemoteConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_days: 3,
            max_size_mb: 50,
            interval_minutes: 60,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_days: None,
            at: "02:00".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: RemoteBackend::Directory,
            bucket: "logkeep-logs".to_string(),
            region: "us-east-1".to_string(),
            key_prefix: "logkeep-logs".to_string(),
            source_tag: "logkeep".to_string(),
            delete_after_upload: true,
            timeout_secs: 300,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 30,
            tick_secs: 60,
        }
    }
}

impl DaemonConfig {
    /// Defaults, overlaid with `path` if it can be read and parsed.
    pub fn from_file_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => {
                info!("Configuration loaded from {}", path.display());
                config
            }
            Err(err) => {
                warn!("Failed to load config from {}: {}; using defaults", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides looked up through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("LOG_PATH").filter(|p| !p.is_empty()) {
            self.log_path = PathBuf::from(path);
        }
        if let Some(days) = parse_env(&lookup, "MAX_AGE_DAYS") {
            self.rotation.max_age_days = days;
        }
        if let Some(mb) = parse_env(&lookup, "MAX_SIZE_MB") {
            self.rotation.max_size_mb = mb;
        }
        if let Some(days) = parse_env(&lookup, "CLEANUP_MAX_AGE_DAYS") {
            self.cleanup.max_age_days = Some(days);
        }
        if let Some(minutes) = parse_env(&lookup, "CHECK_INTERVAL_MINUTES") {
            self.schedule.check_interval_minutes = minutes;
        }
        if let Some(bucket) = lookup("S3_BUCKET").filter(|b| !b.is_empty()) {
            self.remote.bucket = bucket;
        }
        if let Some(region) = lookup("AWS_REGION").filter(|r| !r.is_empty()) {
            self.remote.region = region;
        }
    }

    /// Cleanup horizon in days, never shorter than the rotation age.
    pub fn cleanup_max_age_days(&self) -> u32 {
        let configured = self.cleanup.max_age_days.unwrap_or(if self.remote.enabled {
            7
        } else {
            self.rotation.max_age_days
        });
        if configured < self.rotation.max_age_days {
            warn!(
                "cleanup.max_age_days ({}) is below rotation.max_age_days ({}); raising it",
                configured, self.rotation.max_age_days
            );
            return self.rotation.max_age_days;
        }
        configured
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy> {
        RetentionPolicy::new(
            self.rotation.max_age_days,
            self.rotation.max_size_mb,
            self.cleanup_max_age_days(),
        )
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::new(&self.log_path, self.retention_policy()?);
        config.rotation_enabled = self.rotation.enabled;
        config.categories = if self.categories.is_empty() {
            Categories::Discover
        } else {
            Categories::Fixed(self.categories.clone())
        };
        Ok(config)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            root: self.log_path.clone(),
            key_prefix: self.remote.key_prefix.clone(),
            source_tag: self.remote.source_tag.clone(),
            delete_after_upload: self.remote.delete_after_upload,
        }
    }

    /// Daily cleanup time; falls back to 02:00 if `cleanup.at` is malformed.
    pub fn cleanup_time(&self) -> Time {
        let format = format_description!("[hour]:[minute]");
        Time::parse(&self.cleanup.at, format).unwrap_or_else(|err| {
            warn!("Invalid cleanup.at {:?} ({}); using 02:00", self.cleanup.at, err);
            Time::from_hms(2, 0, 0).unwrap_or(Time::MIDNIGHT)
        })
    }

    pub fn rotation_interval(&self) -> Duration {
        minutes("rotation.interval_minutes", self.rotation.interval_minutes, 60)
    }

    pub fn upload_interval(&self) -> Duration {
        minutes("schedule.check_interval_minutes", self.schedule.check_interval_minutes, 30)
    }

    pub fn tick(&self) -> Duration {
        match self.schedule.tick_secs {
            0 => Duration::from_secs(1),
            secs if secs > MAX_TICK_SECS => {
                warn!("schedule.tick_secs ({}) exceeds {}; using 60", secs, MAX_TICK_SECS);
                Duration::from_secs(60)
            }
            secs => Duration::from_secs(secs),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs.max(1))
    }
}

/// Zero and anything above `MAX_INTERVAL_MINUTES` fall back to `fallback`.
fn minutes(key: &str, value: u64, fallback: u64) -> Duration {
    let value = match value {
        0 => fallback,
        v if v > MAX_INTERVAL_MINUTES => {
            warn!("{} ({}) exceeds {} minutes; using {}", key, v, MAX_INTERVAL_MINUTES, fallback);
            fallback
        }
        v => v,
    };
    Duration::from_secs(value.saturating_mul(60))
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
