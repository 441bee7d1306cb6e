//! Rotation and compression cycles over a category tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{IoContext, Result};
use crate::lifecycle::{
    cleanup, compress, rotate, CycleStats, FsMetadata, LogFile, LogState, MetadataSource,
    RetentionPolicy, SweepStats,
};

/// Category names managed when none are configured explicitly.
pub const DEFAULT_CATEGORIES: [&str; 6] = ["app", "auth", "chat", "error", "system", "websocket"];

/// Which subdirectories of the root are processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Categories {
    /// A fixed set of names; missing directories are skipped.
    Fixed(Vec<String>),
    /// Every immediate subdirectory of the root.
    Discover,
}

impl Default for Categories {
    fn default() -> Self {
        Categories::Fixed(DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect())
    }
}

/// Configuration for the lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory holding one subdirectory per category.
    pub root: PathBuf,

    /// Rotation and deletion thresholds.
    pub policy: RetentionPolicy,

    /// Categories to process.
    pub categories: Categories,

    /// When false, rotation cycles are skipped entirely.
    pub rotation_enabled: bool,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
            categories: Categories::default(),
            rotation_enabled: true,
        }
    }
}

/// Drives `Active -> Rotated -> Compressed` for every log under the root, and
/// the retention sweep over the whole tree.
pub struct LifecycleEngine {
    config: EngineConfig,
    metadata: Box<dyn MetadataSource>,
    clock: Arc<dyn Clock>,
}

impl LifecycleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metadata: Box::new(FsMetadata),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the metadata source used for policy decisions.
    pub fn with_metadata(mut self, metadata: impl MetadataSource + 'static) -> Self {
        self.metadata = Box::new(metadata);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one rotation + compression cycle across all categories.
    ///
    /// Per-file failures are recorded in the returned stats and never abort
    /// the cycle.
    pub fn run_once(&self) -> CycleStats {
        let start = Instant::now();
        let mut stats = CycleStats::new();

        if !self.config.rotation_enabled {
            debug!("Log rotation is disabled");
            return stats;
        }

        info!("Starting log processing cycle");
        match self.category_dirs() {
            Ok(dirs) => {
                for dir in dirs {
                    if let Err(err) = self.process_category(&dir, &mut stats) {
                        warn!("Error processing category {}: {}", dir.display(), err);
                        stats.record_error(err.to_string());
                    }
                }
            }
            Err(err) => {
                warn!("Cannot list categories under {}: {}", self.config.root.display(), err);
                stats.record_error(err.to_string());
            }
        }

        stats.duration = start.elapsed();
        info!("Log processing cycle completed - {}", stats.summary());
        stats
    }

    /// Run the retention sweep over the whole root.
    pub fn sweep(&self) -> SweepStats {
        info!(
            "Starting cleanup of files older than {} days",
            self.config.policy.cleanup_max_age.as_secs() / 86_400
        );
        cleanup::sweep(
            &self.config.root,
            &self.config.policy,
            self.clock.now(),
            self.metadata.as_ref(),
        )
    }

    /// Category directories that exist right now.
    pub fn category_dirs(&self) -> Result<Vec<PathBuf>> {
        let root = &self.config.root;
        if !root.exists() {
            warn!("Log directory does not exist: {}", root.display());
            return Ok(Vec::new());
        }

        let mut dirs = match &self.config.categories {
            Categories::Fixed(names) => names
                .iter()
                .map(|name| root.join(name))
                .filter(|dir| {
                    let exists = dir.is_dir();
                    if !exists {
                        debug!("Category directory does not exist: {}", dir.display());
                    }
                    exists
                })
                .collect(),
            Categories::Discover => {
                let mut dirs = Vec::new();
                for entry in std::fs::read_dir(root).at(root)? {
                    let entry = entry.at(root)?;
                    if entry.file_type().at(&entry.path())?.is_dir() {
                        dirs.push(entry.path());
                    }
                }
                dirs
            }
        };
        dirs.sort();
        Ok(dirs)
    }

    /// Rotate and compress the logs of one category directory.
    fn process_category(&self, dir: &Path, stats: &mut CycleStats) -> Result<()> {
        let mut logs = Vec::new();
        for entry in std::fs::read_dir(dir).at(dir)? {
            let entry = entry.at(dir)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                logs.push(path);
            }
        }
        logs.sort();

        for path in logs {
            stats.scanned_count += 1;
            if let Err(err) = self.process_file(&path, stats) {
                if err.is_not_found() {
                    debug!("{} vanished before it could be processed", path.display());
                    continue;
                }
                warn!("Error processing log file {}: {}", path.display(), err);
                stats.record_error(format!("{}: {}", path.display(), err));
            }
        }
        Ok(())
    }

    fn process_file(&self, path: &Path, stats: &mut CycleStats) -> Result<()> {
        let Some(file) = LogFile::probe(self.metadata.as_ref(), path)? else {
            return Ok(());
        };

        let rotated = match file.state {
            LogState::Active => {
                if !self.config.policy.should_rotate(&file, self.clock.now()) {
                    return Ok(());
                }
                debug!(
                    "{} due for rotation ({:.2}MB, modified {:?} ago)",
                    file.file_name(),
                    file.size_mb(),
                    file.age_at(self.clock.now())
                );
                let rotated = rotate(&file.path, self.clock.now())?;
                stats.record_rotation();
                rotated
            }
            // left behind by an earlier failed or interrupted cycle
            LogState::Rotated => file.path.clone(),
            _ => return Ok(()),
        };

        match compress(&rotated) {
            Ok(artifact) => {
                stats.record_compression(artifact.original_size, artifact.compressed_size);
                Ok(())
            }
            Err(err) => {
                warn!("Failed to compress rotated file {}: {}", rotated.display(), err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::lifecycle::FileStat;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Reports canned sizes for chosen file names, falling back to disk.
    struct FakeMetadata {
        sizes: Mutex<HashMap<String, u64>>,
    }

    impl FakeMetadata {
        fn with_size(name: &str, size: u64) -> Self {
            let mut sizes = HashMap::new();
            sizes.insert(name.to_string(), size);
            Self {
                sizes: Mutex::new(sizes),
            }
        }
    }

    impl MetadataSource for FakeMetadata {
        fn stat(&self, path: &Path) -> Result<FileStat> {
            let real = FsMetadata.stat(path)?;
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let size = self.sizes.lock().unwrap().get(&name).copied();
            Ok(FileStat {
                size_bytes: size.unwrap_or(real.size_bytes),
                modified_at: real.modified_at,
            })
        }
    }

    fn engine(root: &Path) -> LifecycleEngine {
        LifecycleEngine::new(EngineConfig::new(root, RetentionPolicy::new(3, 50, 7).unwrap()))
    }

    #[test]
    fn test_oversized_log_rotated_and_compressed() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("app.log"), b"hello\n").unwrap();

        let engine = engine(temp_dir.path())
            .with_metadata(FakeMetadata::with_size("app.log", 60 * 1024 * 1024));
        let stats = engine.run_once();

        assert_eq!(stats.rotated_count, 1);
        assert_eq!(stats.compressed_count, 1);
        assert!(!stats.has_errors());
        assert!(!app.join("app.log").exists());

        let names: Vec<String> = std::fs::read_dir(&app)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("app_") && names[0].ends_with(".log.gz"), "{names:?}");
    }

    #[test]
    fn test_small_fresh_log_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("app.log"), b"hello\n").unwrap();

        let stats = engine(temp_dir.path()).run_once();

        assert_eq!(stats.scanned_count, 1);
        assert_eq!(stats.rotated_count, 0);
        assert!(app.join("app.log").exists());
    }

    #[test]
    fn test_old_log_rotated_by_age() {
        let temp_dir = TempDir::new().unwrap();
        let auth = temp_dir.path().join("auth");
        std::fs::create_dir_all(&auth).unwrap();
        std::fs::write(auth.join("auth.log"), b"login\n").unwrap();

        // four days in the future, the file is past the three-day age limit
        let clock = Arc::new(ManualClock::new(SystemTime::now() + Duration::from_secs(4 * 86_400)));
        let stats = engine(temp_dir.path()).with_clock(clock).run_once();

        assert_eq!(stats.rotated_count, 1);
        assert!(!auth.join("auth.log").exists());
    }

    #[test]
    fn test_leftover_rotated_file_is_compressed() {
        let temp_dir = TempDir::new().unwrap();
        let chat = temp_dir.path().join("chat");
        std::fs::create_dir_all(&chat).unwrap();
        std::fs::write(chat.join("chat_20240105_103000.log"), b"msg\n").unwrap();

        let stats = engine(temp_dir.path()).run_once();

        assert_eq!(stats.rotated_count, 0);
        assert_eq!(stats.compressed_count, 1);
        assert!(chat.join("chat_20240105_103000.log.gz").exists());
        assert!(!chat.join("chat_20240105_103000.log").exists());
    }

    #[test]
    fn test_rotation_disabled_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let chat = temp_dir.path().join("chat");
        std::fs::create_dir_all(&chat).unwrap();
        std::fs::write(chat.join("chat_20240105_103000.log"), b"msg\n").unwrap();

        let mut config = EngineConfig::new(temp_dir.path(), RetentionPolicy::default());
        config.rotation_enabled = false;
        let stats = LifecycleEngine::new(config).run_once();

        assert_eq!(stats.scanned_count, 0);
        assert!(chat.join("chat_20240105_103000.log").exists());
    }

    #[test]
    fn test_fixed_categories_ignore_other_dirs() -> std::result::Result<(), Error> {
        let temp_dir = TempDir::new().unwrap();
        for dir in ["app", "billing", "chat"] {
            std::fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
        }

        let fixed = engine(temp_dir.path()).category_dirs()?;
        assert_eq!(
            fixed,
            vec![temp_dir.path().join("app"), temp_dir.path().join("chat")]
        );

        let mut config = EngineConfig::new(temp_dir.path(), RetentionPolicy::default());
        config.categories = Categories::Discover;
        let discovered = LifecycleEngine::new(config).category_dirs()?;
        assert_eq!(discovered.len(), 3);
        Ok(())
    }
}
