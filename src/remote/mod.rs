//! Remote shipping of compressed artifacts.
//!
//! The remote store is reached through the [`ObjectStore`] capability; the
//! [`Uploader`] decides what to send and when the local copy may go.

mod dir_store;
#[cfg(feature = "s3")]
mod s3;
mod uploader;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use time::{Date, OffsetDateTime};

use crate::error::Result;
use crate::lifecycle::{rotation_time, LogFile};

pub use dir_store::{DirectoryStore, ObjectMeta};
#[cfg(feature = "s3")]
pub use s3::S3Store;
pub use uploader::{UploadConfig, UploadRecord, Uploader};

pub const CONTENT_TYPE_GZIP: &str = "application/gzip";
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

/// One object write.
///
/// The body is never held in memory; stores stream it from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub key: String,
    /// Local file whose contents become the object body.
    pub source: PathBuf,
    /// Size of `source` when the request was built.
    pub content_length: u64,
    pub content_type: String,
    pub content_encoding: String,
    pub metadata: BTreeMap<String, String>,
}

/// Durable object storage.
///
/// Writes to an existing key overwrite it, which is what makes repeated
/// uploads of one artifact harmless.
pub trait ObjectStore: Send + Sync {
    /// Check that the store is reachable and the bucket exists.
    fn head_bucket(&self) -> Result<()>;

    /// Store the contents of `request.source` under `request.key`.
    fn put_object(&self, request: PutObject) -> Result<()>;

    /// Human-readable location, for logs (`s3://bucket`, a directory path).
    fn describe(&self) -> String;
}

/// Deterministic key for an artifact:
/// `<prefix>/<YYYY>/<MM>/<DD>/<category>/<file name>`.
///
/// The date partition comes from the rotation stamp in the file name, so every
/// retry of the same artifact lands on the same key. Artifacts without a stamp
/// fall back to their modification date.
pub fn object_key(prefix: &str, artifact: &LogFile) -> String {
    let date = partition_date(artifact.file_name(), artifact.modified_at);
    let mut key = String::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        key.push_str(prefix);
        key.push('/');
    }
    key.push_str(&format!(
        "{:04}/{:02}/{:02}/{}/{}",
        date.year(),
        date.month() as u8,
        date.day(),
        artifact.category,
        artifact.file_name()
    ));
    key
}

fn partition_date(file_name: &str, modified_at: SystemTime) -> Date {
    match rotation_time(file_name) {
        Some(stamp) => stamp.date(),
        None => OffsetDateTime::from(modified_at).date(),
    }
}
