//! Log lifecycle daemon.
//!
//! Rotates application logs by size or age, gzips the rotated files, optionally
//! ships the artifacts to object storage, and reclaims anything older than the
//! retention horizon.

pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod remote;
pub mod schedule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleEngine, RetentionPolicy};
pub use remote::{ObjectStore, Uploader};
pub use schedule::{Scheduler, Shutdown};
