//! Rotation of active logs to timestamped names.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::info;
use time::{macros::format_description, OffsetDateTime};

use crate::error::{Error, IoContext, Result};
use crate::lifecycle::log_file::{LOG_EXTENSION, PARTIAL_SUFFIX};

/// Collision suffixes tried before giving up on a second.
const MAX_COLLISIONS: u32 = 1000;

/// Rename an active log to `<stem>_<YYYYMMDD_HHMMSS>.log` in the same directory.
///
/// The rename stays on one filesystem, so a writer holding the file open keeps
/// appending to the renamed inode. Recreating `<stem>.log` is left to the
/// writer. If the stamped name is already taken (by a rotated file or its
/// compressed artifact) a `_<n>` suffix is appended rather than overwriting.
///
/// # Errors
///
/// Returns `Error::InvalidName` if `active` has no usable stem, and
/// `Error::Io` if the rename fails (missing file, permissions).
pub fn rotate(active: &Path, now: SystemTime) -> Result<PathBuf> {
    let dir = active
        .parent()
        .ok_or_else(|| Error::InvalidName(active.to_path_buf()))?;
    let stem = active
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidName(active.to_path_buf()))?;

    let stamp = format_stamp(now);
    let rotated = free_rotated_path(dir, stem, &stamp)
        .ok_or_else(|| Error::InvalidName(active.to_path_buf()))?;

    std::fs::rename(active, &rotated).at(active)?;
    info!(
        "Rotated: {} -> {}",
        active.display(),
        rotated.file_name().unwrap_or_default().to_string_lossy()
    );
    Ok(rotated)
}

/// Build the rotated file name for `stem` at `stamp`, with an optional
/// collision counter.
pub fn rotated_file_name(stem: &str, stamp: &str, collision: u32) -> String {
    if collision == 0 {
        format!("{stem}_{stamp}.{LOG_EXTENSION}")
    } else {
        format!("{stem}_{stamp}_{collision}.{LOG_EXTENSION}")
    }
}

/// Sortable, second-resolution UTC stamp.
pub fn format_stamp(now: SystemTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    OffsetDateTime::from(now)
        .format(format)
        .unwrap_or_else(|_| "00000000_000000".to_string())
}

fn free_rotated_path(dir: &Path, stem: &str, stamp: &str) -> Option<PathBuf> {
    (0..MAX_COLLISIONS)
        .map(|n| dir.join(rotated_file_name(stem, stamp, n)))
        .find(|candidate| !is_taken(candidate))
}

fn is_taken(candidate: &Path) -> bool {
    let name = candidate.as_os_str().to_string_lossy();
    candidate.exists()
        || Path::new(&format!("{name}.gz")).exists()
        || Path::new(&format!("{name}{PARTIAL_SUFFIX}")).exists()
}
