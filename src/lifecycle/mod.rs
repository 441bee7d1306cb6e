//! Log lifecycle management.
//!
//! This module moves application logs through their local lifecycle:
//! - Rotation policy evaluation (size or age)
//! - Atomic rename of active logs to timestamped names
//! - Two-phase gzip compression that never loses the source early
//! - Retention sweeps that reclaim anything past the cleanup horizon
//!
//! # Example
//!
//! ```rust,no_run
//! use logkeep::lifecycle::{EngineConfig, LifecycleEngine, RetentionPolicy};
//!
//! let policy = RetentionPolicy::new(3, 50, 7)?;
//! let engine = LifecycleEngine::new(EngineConfig::new("/var/log/logkeep", policy));
//!
//! let stats = engine.run_once();
//! println!("Rotated {} logs, saved {} bytes", stats.rotated_count, stats.bytes_saved);
//!
//! let swept = engine.sweep();
//! println!("Deleted {} expired files", swept.deleted_count);
//! # Ok::<(), logkeep::Error>(())
//! ```

pub mod cleanup;
mod compressor;
mod engine;
mod log_file;
mod policy;
mod rotator;
mod stats;

pub use compressor::{
    artifact_path, compress, write_artifact, write_artifact_from, CompressedArtifact,
    PendingArtifact,
};
pub use engine::{Categories, EngineConfig, LifecycleEngine, DEFAULT_CATEGORIES};
pub use log_file::{
    category_of, partial_source, rotation_time, FileStat, FsMetadata, LogFile, LogState,
    MetadataSource,
};
pub use policy::{is_reclaimable, RetentionPolicy};
pub use rotator::{format_stamp, rotate, rotated_file_name};
pub use stats::{CycleStats, SweepStats, UploadStats};
