//! Statistics for lifecycle operations.

use std::time::Duration;

/// Statistics from one rotation + compression cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Number of `.log` files inspected.
    pub scanned_count: usize,

    /// Number of active files renamed.
    pub rotated_count: usize,

    /// Number of rotated files turned into `.gz` artifacts.
    pub compressed_count: usize,

    /// Total bytes saved by compression.
    pub bytes_saved: u64,

    /// Number of errors encountered.
    pub error_count: usize,

    /// Errors encountered during the run.
    pub errors: Vec<String>,

    /// Time taken for the run.
    pub duration: Duration,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rotation(&mut self) {
        self.rotated_count += 1;
    }

    pub fn record_compression(&mut self, original_size: u64, compressed_size: u64) {
        self.compressed_count += 1;
        self.bytes_saved += original_size.saturating_sub(compressed_size);
    }

    pub fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Scanned: {}, Rotated: {}, Compressed: {}, Saved: {} bytes, Errors: {}, Duration: {:?}",
            self.scanned_count,
            self.rotated_count,
            self.compressed_count,
            self.bytes_saved,
            self.error_count,
            self.duration
        )
    }
}

/// Statistics from one cleanup sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Number of lifecycle files inspected.
    pub scanned_count: usize,

    /// Number of files deleted.
    pub deleted_count: usize,

    /// Bytes reclaimed.
    pub bytes_freed: u64,

    pub error_count: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl SweepStats {
    pub fn record_deletion(&mut self, size: u64) {
        self.deleted_count += 1;
        self.bytes_freed += size;
    }

    pub fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Scanned: {}, Deleted: {}, Freed: {} bytes, Errors: {}, Duration: {:?}",
            self.scanned_count, self.deleted_count, self.bytes_freed, self.error_count, self.duration
        )
    }
}

/// Statistics from one upload cycle.
#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    /// Artifacts discovered.
    pub total: usize,

    /// Artifacts the remote store accepted.
    pub uploaded: usize,

    /// Uploaded artifacts whose local copy was removed.
    pub cleaned_up: usize,

    /// Bytes sent.
    pub bytes_uploaded: u64,

    pub error_count: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl UploadStats {
    pub fn record_upload(&mut self, size: u64) {
        self.uploaded += 1;
        self.bytes_uploaded += size;
    }

    pub fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.errors.push(error);
    }

    pub fn failed(&self) -> usize {
        self.total.saturating_sub(self.uploaded)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} files uploaded, {} bytes, Errors: {}, Duration: {:?}",
            self.uploaded, self.total, self.bytes_uploaded, self.error_count, self.duration
        )
    }
}
