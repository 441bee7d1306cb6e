//! Log file snapshots for lifecycle decisions.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use time::{macros::format_description, PrimitiveDateTime};

use crate::error::{IoContext, Result};

/// Extension of active and rotated logs.
pub const LOG_EXTENSION: &str = "log";

/// Extension of compressed artifacts.
pub const COMPRESSED_EXTENSION: &str = "gz";

/// Suffix of a compressed artifact that is still being written.
pub const PARTIAL_SUFFIX: &str = ".gz.tmp";

/// Where a file sits in its lifecycle.
///
/// Transitions only ever move forward:
/// `Active -> Rotated -> Compressed -> (Uploaded) -> Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogState {
    /// `<name>.log`, possibly still appended to by an external writer.
    Active,
    /// `<name>_<YYYYMMDD_HHMMSS>.log`, no longer written to.
    Rotated,
    /// `<rotated-name>.gz`.
    Compressed,
    /// Durably stored in the remote store; local copy may still exist.
    Uploaded,
    /// Gone from local disk.
    Deleted,
}

impl LogState {
    /// Infer the state of a file from its name alone.
    ///
    /// Returns `None` for anything the lifecycle does not manage
    /// (partial artifacts, unrelated files).
    pub fn from_file_name(name: &str) -> Option<LogState> {
        if name.ends_with(PARTIAL_SUFFIX) {
            return None;
        }
        if let Some(inner) = name.strip_suffix(".gz") {
            return (!inner.is_empty()).then_some(LogState::Compressed);
        }
        let stem = name.strip_suffix(".log")?;
        if stem.is_empty() {
            return None;
        }
        if rotation_stamp(stem).is_some() {
            Some(LogState::Rotated)
        } else {
            Some(LogState::Active)
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_advance_to(self, next: LogState) -> bool {
        next > self
    }
}

/// Size and modification time of a file, as seen by a [`MetadataSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

/// Source of file metadata.
///
/// The filesystem implementation is [`FsMetadata`]; tests substitute their own
/// to evaluate policies without touching disk.
pub trait MetadataSource: Send + Sync {
    fn stat(&self, path: &Path) -> Result<FileStat>;
}

/// Reads metadata straight from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMetadata;

impl MetadataSource for FsMetadata {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = std::fs::metadata(path).at(path)?;
        Ok(FileStat {
            size_bytes: metadata.len(),
            modified_at: metadata.modified().at(path)?,
        })
    }
}

/// A point-in-time view of one managed file.
#[derive(Debug, Clone)]
pub struct LogFile {
    /// Full path to the file.
    pub path: PathBuf,

    /// Category (name of the directory the file lives in).
    pub category: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Last modification time.
    pub modified_at: SystemTime,

    /// Lifecycle state inferred from the file name.
    pub state: LogState,
}

impl LogFile {
    /// Snapshot `path` through `source`.
    ///
    /// The category is taken from the parent directory name. Returns `Ok(None)`
    /// for files that are not part of the lifecycle.
    pub fn probe(source: &dyn MetadataSource, path: &Path) -> Result<Option<LogFile>> {
        let Some(state) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(LogState::from_file_name)
        else {
            return Ok(None);
        };
        let stat = source.stat(path)?;
        Ok(Some(LogFile {
            path: path.to_path_buf(),
            category: category_of(path),
            size_bytes: stat.size_bytes,
            modified_at: stat.modified_at,
            state,
        }))
    }

    /// Time since last modification, measured at `now`.
    ///
    /// A modification time in the future counts as zero age.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified_at)
            .unwrap_or(Duration::ZERO)
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Size in MiB.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Rotated log a partial artifact was being written from, if `path` is one.
pub fn partial_source(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let source = name.strip_suffix(PARTIAL_SUFFIX)?;
    if source.is_empty() {
        return None;
    }
    Some(path.with_file_name(source))
}

/// Name of the directory that holds `path`.
pub fn category_of(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse the rotation timestamp out of a rotated (or compressed) file name.
///
/// Accepts `<stem>_<YYYYMMDD_HHMMSS>.log`, `<stem>_<YYYYMMDD_HHMMSS>_<n>.log`
/// and the same names with a trailing `.gz`.
pub fn rotation_time(file_name: &str) -> Option<PrimitiveDateTime> {
    let name = file_name.strip_suffix(".gz").unwrap_or(file_name);
    let stem = name.strip_suffix(".log")?;
    let stamp = rotation_stamp(stem)?;
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    PrimitiveDateTime::parse(stamp, format).ok()
}

/// Find the `YYYYMMDD_HHMMSS` stamp at the end of a rotated stem.
fn rotation_stamp(stem: &str) -> Option<&str> {
    const STAMP_LEN: usize = 15;

    let candidate = match stem.rsplit_once('_') {
        // `<stamp>_<n>` collision suffix
        Some((head, tail))
            if !tail.is_empty()
                && tail.len() < 6
                && tail.bytes().all(|b| b.is_ascii_digit())
                && is_stamped(head, STAMP_LEN) =>
        {
            head
        }
        _ => stem,
    };
    if !is_stamped(candidate, STAMP_LEN) {
        return None;
    }
    Some(&candidate[candidate.len() - STAMP_LEN..])
}

fn is_stamped(stem: &str, stamp_len: usize) -> bool {
    // need `<something>_` in front of the stamp
    if stem.len() < stamp_len + 2 || !stem.is_char_boundary(stem.len() - stamp_len) {
        return false;
    }
    let (head, stamp) = stem.split_at(stem.len() - stamp_len);
    if !head.ends_with('_') {
        return false;
    }
    let bytes = stamp.as_bytes();
    bytes.iter().enumerate().all(|(i, b)| {
        if i == 8 {
            *b == b'_'
        } else {
            b.is_ascii_digit()
        }
    })
}
