//! Wiring of the lifecycle engine, uploader and cleanup into one scheduler.

use std::sync::Arc;

use log::{error, info};
use time::UtcOffset;

use crate::clock::Clock;
use crate::config::{DaemonConfig, RemoteBackend};
use crate::error::{Error, Result};
use crate::lifecycle::{CycleStats, LifecycleEngine, SweepStats, UploadStats};
use crate::remote::{DirectoryStore, ObjectStore, Uploader};
use crate::schedule::{Scheduler, Shutdown};

pub const ROTATE_JOB: &str = "rotate";
pub const UPLOAD_JOB: &str = "upload";
pub const CLEANUP_JOB: &str = "cleanup";

/// Build the object store named by `config.remote`.
pub fn build_store(config: &DaemonConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.remote.backend {
        RemoteBackend::Directory => Ok(Arc::new(DirectoryStore::new(&config.remote.bucket))),
        #[cfg(feature = "s3")]
        RemoteBackend::S3 => Ok(Arc::new(crate::remote::S3Store::new(
            config.remote.bucket.clone(),
            config.remote.region.clone(),
            config.remote_timeout(),
        )?)),
        #[cfg(not(feature = "s3"))]
        RemoteBackend::S3 => Err(Error::Config(
            "remote.backend is s3 but this build lacks the `s3` feature".to_string(),
        )),
    }
}

/// Results of one pass over every task.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub cycle: CycleStats,
    pub upload: Option<UploadStats>,
    pub sweep: SweepStats,
}

/// The long-running lifecycle daemon.
pub struct Daemon {
    engine: Arc<LifecycleEngine>,
    uploader: Option<Arc<Uploader>>,
    scheduler: Scheduler,
}

impl Daemon {
    /// Assemble the daemon.
    ///
    /// With a store, its bucket is checked once up front; an unreachable
    /// store is a startup failure.
    pub fn new(
        config: &DaemonConfig,
        store: Option<Arc<dyn ObjectStore>>,
        clock: Arc<dyn Clock>,
        offset: UtcOffset,
    ) -> Result<Self> {
        let engine = Arc::new(LifecycleEngine::new(config.engine_config()?).with_clock(clock.clone()));

        let uploader = match store {
            Some(store) => {
                store.head_bucket().map_err(|err| {
                    Error::Config(format!("remote store {} unreachable: {err}", store.describe()))
                })?;
                info!("Remote store verified: {}", store.describe());
                Some(Arc::new(
                    Uploader::new(config.upload_config(), store).with_clock(clock.clone()),
                ))
            }
            None => None,
        };

        let mut scheduler = Scheduler::new(config.tick(), clock).with_utc_offset(offset);

        let rotate_engine = engine.clone();
        scheduler.every(ROTATE_JOB, config.rotation_interval(), move || {
            rotate_engine.run_once();
        });

        if let Some(uploader) = &uploader {
            let uploader = uploader.clone();
            scheduler.every(UPLOAD_JOB, config.upload_interval(), move || {
                let stats = uploader.process_all();
                if stats.has_errors() {
                    error!("Upload cycle had {} failures", stats.error_count);
                }
            });
        }

        let sweep_engine = engine.clone();
        scheduler.daily_at(CLEANUP_JOB, config.cleanup_time(), move || {
            sweep_engine.sweep();
        });

        info!("Monitoring: {}", config.log_path.display());
        info!(
            "Rotation every {:?}, cleanup daily at {}, uploads {}",
            config.rotation_interval(),
            config.cleanup.at,
            if uploader.is_some() {
                format!("every {:?}", config.upload_interval())
            } else {
                "disabled".to_string()
            }
        );

        Ok(Self {
            engine,
            uploader,
            scheduler,
        })
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Rotate, upload, then sweep, once each, in that order.
    pub fn run_once(&self) -> PassReport {
        PassReport {
            cycle: self.engine.run_once(),
            upload: self.uploader.as_ref().map(|u| u.process_all()),
            sweep: self.engine.sweep(),
        }
    }

    /// Run the primary tasks immediately, then poll until shutdown.
    pub fn run(&mut self, shutdown: &Shutdown) {
        self.scheduler.run_now(ROTATE_JOB);
        if self.uploader.is_some() && !shutdown.is_requested() {
            self.scheduler.run_now(UPLOAD_JOB);
        }
        if shutdown.is_requested() {
            info!("Shutdown requested during startup run");
            return;
        }
        self.scheduler.run(shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            log_path: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_jobs_registered_per_variant() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());

        let local = Daemon::new(&config, None, Arc::new(SystemClock), UtcOffset::UTC)?;
        assert_eq!(local.scheduler().job_names(), vec![ROTATE_JOB, CLEANUP_JOB]);

        config.remote.bucket = bucket.path().display().to_string();
        let store = build_store(&config)?;
        let remote = Daemon::new(&config, Some(store), Arc::new(SystemClock), UtcOffset::UTC)?;
        assert_eq!(
            remote.scheduler().job_names(),
            vec![ROTATE_JOB, UPLOAD_JOB, CLEANUP_JOB]
        );
        Ok(())
    }

    #[test]
    fn test_unreachable_store_fails_startup() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.remote.bucket = temp_dir.path().join("no-bucket").display().to_string();

        let store = build_store(&config).unwrap();
        let result = Daemon::new(&config, Some(store), Arc::new(SystemClock), UtcOffset::UTC);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_run_returns_when_already_shut_down() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let mut daemon = Daemon::new(
            &config(temp_dir.path()),
            None,
            Arc::new(SystemClock),
            UtcOffset::UTC,
        )?;
        let shutdown = Shutdown::new();
        shutdown.request();

        daemon.run(&shutdown);
        Ok(())
    }

    #[test]
    fn test_run_rotates_immediately_at_startup() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();
        let file = std::fs::File::create(app.join("app.log")).unwrap();
        file.set_len(51 * 1024 * 1024).unwrap();
        drop(file);

        let mut daemon = Daemon::new(
            &config(temp_dir.path()),
            None,
            Arc::new(SystemClock),
            UtcOffset::UTC,
        )?;
        let shutdown = Shutdown::new();
        shutdown.request();
        daemon.run(&shutdown);

        let names: Vec<String> = std::fs::read_dir(&app)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].starts_with("app_") && names[0].ends_with(".log.gz"), "{names:?}");
        Ok(())
    }

    #[test]
    fn test_huge_intervals_do_not_panic() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.rotation.interval_minutes = 200_000_000_000_000_000;
        config.schedule.check_interval_minutes = u64::MAX;
        config.remote.bucket = bucket.path().display().to_string();

        let store = build_store(&config)?;
        let daemon = Daemon::new(&config, Some(store), Arc::new(SystemClock), UtcOffset::UTC)?;
        assert!(daemon.scheduler().next_run(ROTATE_JOB).is_some());
        assert!(daemon.scheduler().next_run(UPLOAD_JOB).is_some());
        Ok(())
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_backend_requires_feature() {
        let mut config = DaemonConfig::default();
        config.remote.backend = RemoteBackend::S3;
        assert!(matches!(build_store(&config), Err(Error::Config(_))));
    }
}
