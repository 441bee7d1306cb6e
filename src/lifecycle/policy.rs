//! Rotation and deletion policy evaluation.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::lifecycle::log_file::{COMPRESSED_EXTENSION, LOG_EXTENSION};
use crate::lifecycle::LogFile;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Thresholds deciding when a log is rotated and when it is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rotate once a file has gone unmodified for longer than this.
    pub max_age: Duration,

    /// Rotate once a file grows past this many bytes.
    pub max_size_bytes: u64,

    /// Delete once a file has gone unmodified for longer than this.
    pub cleanup_max_age: Duration,
}

impl RetentionPolicy {
    /// Build a policy from day and megabyte thresholds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the cleanup horizon is shorter than the
    /// rotation age, since compressed artifacts could then be reclaimed
    /// before they were ever produced.
    pub fn new(max_age_days: u32, max_size_mb: u64, cleanup_max_age_days: u32) -> Result<Self> {
        let policy = Self {
            max_age: days(max_age_days),
            max_size_bytes: max_size_mb.saturating_mul(BYTES_PER_MB),
            cleanup_max_age: days(cleanup_max_age_days),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cleanup_max_age < self.max_age {
            return Err(Error::Config(format!(
                "cleanup horizon ({}d) is shorter than rotation age ({}d)",
                self.cleanup_max_age.as_secs() / SECS_PER_DAY,
                self.max_age.as_secs() / SECS_PER_DAY,
            )));
        }
        Ok(())
    }

    /// Whether an active file is due for rotation.
    ///
    /// Either threshold alone is enough. Both comparisons are strict: a file
    /// of exactly `max_size_bytes` or exactly `max_age` old is left alone.
    pub fn should_rotate(&self, file: &LogFile, now: SystemTime) -> bool {
        file.size_bytes > self.max_size_bytes || file.age_at(now) > self.max_age
    }

    /// Whether a file has outlived the cleanup horizon.
    ///
    /// Only raw logs and compressed artifacts are ever eligible, whatever
    /// their upload state.
    pub fn should_delete(&self, file: &LogFile, now: SystemTime) -> bool {
        is_reclaimable(&file.path) && self.is_expired(file.modified_at, now)
    }

    /// Whether something last modified at `modified_at` is past the cleanup
    /// horizon. Used for leftovers that are not [`LogFile`]s.
    pub fn is_expired(&self, modified_at: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified_at).unwrap_or(Duration::ZERO) > self.cleanup_max_age
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: days(3),
            max_size_bytes: 50 * BYTES_PER_MB,
            cleanup_max_age: days(7),
        }
    }
}

/// True for extensions the cleanup sweep is allowed to delete.
pub fn is_reclaimable(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext == LOG_EXTENSION || ext == COMPRESSED_EXTENSION
    )
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECS_PER_DAY)
}
