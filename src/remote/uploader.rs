//! Discovery and upload of compressed artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::clock::{Clock, SystemClock};
use crate::error::{IoContext, Result};
use crate::lifecycle::{FsMetadata, LogFile, LogState, MetadataSource, UploadStats};
use crate::remote::{
    object_key, ObjectStore, PutObject, CONTENT_ENCODING_GZIP, CONTENT_TYPE_GZIP,
};

/// Configuration for the uploader.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root of the log tree to search for artifacts.
    pub root: PathBuf,

    /// First segment of every object key.
    pub key_prefix: String,

    /// Value of the `source` metadata entry.
    pub source_tag: String,

    /// Remove the local artifact once the store has accepted it.
    pub delete_after_upload: bool,
}

impl UploadConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key_prefix: "logkeep-logs".to_string(),
            source_tag: "logkeep".to_string(),
            delete_after_upload: true,
        }
    }
}

/// A completed upload. Exists only between the store accepting an artifact
/// and the local copy being released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub category: String,
    pub uploaded_at: OffsetDateTime,
    /// `Uploaded` until the local copy is released, then `Deleted`.
    pub state: LogState,
}

/// Ships `Compressed` artifacts to an [`ObjectStore`].
///
/// A local artifact is removed only after the store reports success, so a
/// crash in between leads to a re-upload to the same key rather than a loss.
pub struct Uploader {
    config: UploadConfig,
    store: Arc<dyn ObjectStore>,
    metadata: Box<dyn MetadataSource>,
    clock: Arc<dyn Clock>,
}

impl Uploader {
    pub fn new(config: UploadConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            metadata: Box::new(FsMetadata),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Find every compressed artifact under the root.
    pub fn discover(&self) -> Result<Vec<LogFile>> {
        let root = &self.config.root;
        if !root.exists() {
            warn!("Log directory does not exist: {}", root.display());
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match LogFile::probe(self.metadata.as_ref(), entry.path()) {
                Ok(Some(file)) if file.state == LogState::Compressed => found.push(file),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => warn!("Failed to inspect {}: {}", entry.path().display(), err),
            }
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    /// Remote key the artifact is (or would be) stored under.
    pub fn remote_key(&self, artifact: &LogFile) -> String {
        object_key(&self.config.key_prefix, artifact)
    }

    /// Push one artifact to the store. The local file is never touched here.
    pub fn upload(&self, artifact: &LogFile) -> Result<UploadRecord> {
        let content_length = std::fs::metadata(&artifact.path).at(&artifact.path)?.len();
        let uploaded_at = OffsetDateTime::from(self.clock.now());
        let key = self.remote_key(artifact);

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), self.config.source_tag.clone());
        metadata.insert("category".to_string(), artifact.category.clone());
        metadata.insert(
            "upload_time".to_string(),
            uploaded_at.format(&Rfc3339).unwrap_or_default(),
        );

        self.store.put_object(PutObject {
            key: key.clone(),
            source: artifact.path.clone(),
            content_length,
            content_type: CONTENT_TYPE_GZIP.to_string(),
            content_encoding: CONTENT_ENCODING_GZIP.to_string(),
            metadata,
        })?;

        info!(
            "Uploaded: {} -> {}/{}",
            artifact.file_name(),
            self.store.describe(),
            key
        );
        Ok(UploadRecord {
            local_path: artifact.path.clone(),
            remote_key: key,
            category: artifact.category.clone(),
            uploaded_at,
            state: LogState::Uploaded,
        })
    }

    /// Release the local copy of an uploaded artifact.
    ///
    /// Returns whether this call removed the file. Failure to remove is logged
    /// only; the remote copy is already durable. A record already marked
    /// `Deleted` is never acted on again, so a file later recreated at the same
    /// path is safe.
    pub fn confirm_and_cleanup(&self, record: &mut UploadRecord) -> bool {
        if !record.state.can_advance_to(LogState::Deleted) {
            debug!("Local copy of {} already released", record.local_path.display());
            return false;
        }
        if !self.config.delete_after_upload {
            debug!("Keeping local copy of {}", record.local_path.display());
            return false;
        }
        match std::fs::remove_file(&record.local_path) {
            Ok(()) => {
                info!("Cleaned up local file: {}", record.local_path.display());
                record.state = LogState::Deleted;
                true
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("Local file {} already gone", record.local_path.display());
                record.state = LogState::Deleted;
                false
            }
            Err(err) => {
                warn!(
                    "Failed to delete local file {}: {}",
                    record.local_path.display(),
                    err
                );
                false
            }
        }
    }

    /// Discover and upload everything, one artifact at a time.
    ///
    /// A failed artifact stays in place for the next cycle and does not stop
    /// the others.
    pub fn process_all(&self) -> UploadStats {
        let start = Instant::now();
        let mut stats = UploadStats::default();
        info!("Starting log upload cycle");

        let artifacts = match self.discover() {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!("Error during log discovery: {}", err);
                stats.record_error(err.to_string());
                return stats;
            }
        };
        stats.total = artifacts.len();
        if artifacts.is_empty() {
            debug!("No compressed log files found for upload");
            return stats;
        }
        info!("Found {} files to upload", artifacts.len());

        for artifact in &artifacts {
            match self.upload(artifact) {
                Ok(mut record) => {
                    stats.record_upload(artifact.size_bytes);
                    if self.confirm_and_cleanup(&mut record) {
                        stats.cleaned_up += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        "Skipping cleanup for failed upload {}: {}",
                        artifact.path.display(),
                        err
                    );
                    stats.record_error(format!("{}: {}", artifact.path.display(), err));
                }
            }
        }

        stats.duration = start.elapsed();
        info!("Upload cycle completed - {}", stats.summary());
        stats
    }
}
