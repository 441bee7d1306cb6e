//! Local retention sweep.

use std::path::Path;
use std::time::{Instant, SystemTime};

use log::{info, warn};
use walkdir::WalkDir;

use crate::lifecycle::{partial_source, LogFile, MetadataSource, RetentionPolicy, SweepStats};

/// Delete every raw log and compressed artifact under `root` that has outlived
/// the cleanup horizon.
///
/// Runs independently of upload state. Directories are never removed, and a
/// file that cannot be inspected or deleted is logged and skipped. Partial
/// artifacts past the horizon are removed too, but only once the rotated log
/// they were written from is gone.
pub fn sweep(
    root: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
    metadata: &dyn MetadataSource,
) -> SweepStats {
    let start = Instant::now();
    let mut stats = SweepStats::default();

    if !root.exists() {
        warn!("Log directory does not exist: {}", root.display());
        return stats;
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                stats.record_error(format!("walk {}: {}", root.display(), err));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let file = match LogFile::probe(metadata, entry.path()) {
            Ok(Some(file)) => file,
            Ok(None) => {
                if let Some(source) = partial_source(entry.path()) {
                    sweep_partial(entry.path(), &source, policy, now, metadata, &mut stats);
                }
                continue;
            }
            // vanished between listing and stat
            Err(err) if err.is_not_found() => continue,
            Err(err) => {
                warn!("Failed to inspect {}: {}", entry.path().display(), err);
                stats.record_error(err.to_string());
                continue;
            }
        };
        stats.scanned_count += 1;

        if !policy.should_delete(&file, now) {
            continue;
        }

        delete(&file.path, file.size_bytes, &mut stats);
    }

    stats.duration = start.elapsed();
    info!("Cleanup completed - {}", stats.summary());
    stats
}

/// Remove an expired `.gz.tmp` whose rotated source no longer exists.
///
/// While the source is present the next compression attempt replaces the
/// partial, so it is left alone.
fn sweep_partial(
    partial: &Path,
    source: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
    metadata: &dyn MetadataSource,
    stats: &mut SweepStats,
) {
    if source.exists() {
        return;
    }
    let stat = match metadata.stat(partial) {
        Ok(stat) => stat,
        Err(err) if err.is_not_found() => return,
        Err(err) => {
            warn!("Failed to inspect {}: {}", partial.display(), err);
            stats.record_error(err.to_string());
            return;
        }
    };
    stats.scanned_count += 1;
    if policy.is_expired(stat.modified_at, now) {
        delete(partial, stat.size_bytes, stats);
    }
}

fn delete(path: &Path, size_bytes: u64, stats: &mut SweepStats) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("Deleted old file: {}", path.display());
            stats.record_deletion(size_bytes);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!("Failed to delete {}: {}", path.display(), err);
            stats.record_error(format!("{}: {}", path.display(), err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::lifecycle::{FileStat, FsMetadata};
    use std::fs::File;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY: u64 = 24 * 60 * 60;

    fn touch(path: &Path, age_days: u64, now: SystemTime) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        file.set_modified(now - Duration::from_secs(age_days * DAY)).unwrap();
    }

    #[test]
    fn test_sweep_deletes_only_past_horizon() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let now = SystemTime::now();
        let policy = RetentionPolicy::new(3, 50, 7).unwrap();

        let old_log = root.join("app/app_20240101_000000.log");
        let old_gz = root.join("auth/auth_20240101_000000.log.gz");
        let young_log = root.join("app/app.log");
        let young_gz = root.join("auth/auth_20240110_000000.log.gz");
        touch(&old_log, 8, now);
        touch(&old_gz, 30, now);
        touch(&young_log, 6, now);
        touch(&young_gz, 1, now);

        let stats = sweep(root, &policy, now, &FsMetadata);

        assert_eq!(stats.deleted_count, 2);
        assert!(!old_log.exists());
        assert!(!old_gz.exists());
        assert!(young_log.exists());
        assert!(young_gz.exists());
        assert!(!stats.has_errors());
    }

    #[test]
    fn test_sweep_keeps_directories_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let now = SystemTime::now();
        let policy = RetentionPolicy::new(1, 50, 1).unwrap();

        let notes = root.join("app/notes.txt");
        touch(&notes, 90, now);

        let stats = sweep(root, &policy, now, &FsMetadata);

        assert_eq!(stats.deleted_count, 0);
        assert!(notes.exists());
        assert!(root.join("app").is_dir());
    }

    #[test]
    fn test_sweep_removes_orphaned_partials_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let now = SystemTime::now();
        let policy = RetentionPolicy::new(3, 50, 7).unwrap();

        // source already reclaimed
        let orphan = root.join("app/app_20240101_000000.log.gz.tmp");
        touch(&orphan, 30, now);
        // source still waiting for compression
        let source = root.join("chat/chat_20240110_000000.log");
        let retried = root.join("chat/chat_20240110_000000.log.gz.tmp");
        touch(&source, 2, now);
        touch(&retried, 30, now);
        // orphaned but young
        let fresh = root.join("auth/auth_20240111_000000.log.gz.tmp");
        touch(&fresh, 1, now);

        let stats = sweep(root, &policy, now, &FsMetadata);

        assert_eq!(stats.deleted_count, 1);
        assert!(!orphan.exists());
        assert!(retried.exists());
        assert!(source.exists());
        assert!(fresh.exists());
    }

    /// Fails to stat one path and swaps another for a directory, so its
    /// deletion fails.
    struct FlakyMetadata {
        unreadable: PathBuf,
        undeletable: PathBuf,
    }

    impl MetadataSource for FlakyMetadata {
        fn stat(&self, path: &Path) -> Result<FileStat> {
            if path == self.unreadable {
                return Err(Error::io(
                    path,
                    io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                ));
            }
            let stat = FsMetadata.stat(path)?;
            if path == self.undeletable {
                std::fs::remove_file(path).unwrap();
                std::fs::create_dir(path).unwrap();
            }
            Ok(stat)
        }
    }

    #[test]
    fn test_sweep_continues_after_inspect_failure() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let now = SystemTime::now();
        let policy = RetentionPolicy::new(3, 50, 7).unwrap();

        let unreadable = root.join("app/app_20240101_000000.log.gz");
        let expired = [
            root.join("app/app_20240102_000000.log.gz"),
            root.join("auth/auth_20240101_000000.log"),
        ];
        touch(&unreadable, 30, now);
        for path in &expired {
            touch(path, 30, now);
        }
        let metadata = FlakyMetadata {
            unreadable: unreadable.clone(),
            undeletable: root.join("none"),
        };

        let stats = sweep(root, &policy, now, &metadata);

        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.deleted_count, 2);
        assert!(unreadable.exists());
        assert!(expired.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_sweep_continues_after_delete_failure() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let now = SystemTime::now();
        let policy = RetentionPolicy::new(3, 50, 7).unwrap();

        let undeletable = root.join("app/app_20240101_000000.log.gz");
        let expired = [
            root.join("app/app_20240102_000000.log.gz"),
            root.join("chat/chat_20240101_000000.log"),
        ];
        touch(&undeletable, 30, now);
        for path in &expired {
            touch(path, 30, now);
        }
        let metadata = FlakyMetadata {
            unreadable: root.join("none"),
            undeletable: undeletable.clone(),
        };

        let stats = sweep(root, &policy, now, &metadata);

        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.deleted_count, 2);
        assert!(undeletable.is_dir());
        assert!(expired.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_sweep_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let stats = sweep(
            &temp_dir.path().join("nope"),
            &RetentionPolicy::default(),
            SystemTime::now(),
            &FsMetadata,
        );
        assert_eq!(stats.scanned_count, 0);
        assert_eq!(stats.deleted_count, 0);
    }
}
