//! Object store backed by a local or mounted directory.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoContext, Result};
use crate::remote::{ObjectStore, PutObject};

/// Sidecar written next to every object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub content_type: String,
    pub content_encoding: String,
    pub size_bytes: u64,
    pub metadata: std::collections::BTreeMap<String, String>,
}

/// Stores each object at `<root>/<key>` with a `<key>.meta.json` sidecar.
///
/// The root plays the role of the bucket: it must exist up front and is never
/// created by the store.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path an object key maps to.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(Error::Remote(format!("invalid object key: {key}")));
            }
            path.push(part);
        }
        Ok(path)
    }

    /// Read back the sidecar for `key`.
    pub fn object_meta(&self, key: &str) -> Result<ObjectMeta> {
        let path = meta_path(&self.object_path(key)?);
        let file = File::open(&path).at(&path)?;
        serde_json::from_reader(file).map_err(|e| Error::Remote(format!("{}: {e}", path.display())))
    }
}

impl ObjectStore for DirectoryStore {
    fn head_bucket(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Remote(format!(
                "bucket directory {} does not exist",
                self.root.display()
            )))
        }
    }

    fn put_object(&self, request: PutObject) -> Result<()> {
        self.head_bucket()?;
        let target = self.object_path(&request.key)?;
        let parent = target
            .parent()
            .ok_or_else(|| Error::Remote(format!("invalid object key: {}", request.key)))?;
        std::fs::create_dir_all(parent).at(parent)?;

        let input = File::open(&request.source).at(&request.source)?;
        let size_bytes = write_atomic(&target, |output| {
            io::copy(&mut BufReader::new(input), output)
        })?;

        let meta = ObjectMeta {
            content_type: request.content_type,
            content_encoding: request.content_encoding,
            size_bytes,
            metadata: request.metadata,
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| Error::Remote(format!("encode metadata: {e}")))?;
        write_atomic(&meta_path(&target), |output| {
            output.write_all(&meta_bytes).map(|()| meta_bytes.len() as u64)
        })?;

        debug!("Stored {} bytes at {}", size_bytes, target.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

fn meta_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Fill a temporary sibling of `dest` through `fill`, sync it, then rename it
/// into place. Returns what `fill` reports as written.
fn write_atomic(dest: &Path, fill: impl FnOnce(&mut File) -> io::Result<u64>) -> Result<u64> {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .at(&tmp)?;
    let written = fill(&mut output)
        .and_then(|n| output.sync_all().map(|()| n))
        .and_then(|n| std::fs::rename(&tmp, dest).map(|()| n));
    match written {
        Ok(n) => Ok(n),
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(Error::io(dest, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn request(staging: &Path, key: &str, body: &[u8]) -> PutObject {
        let source = staging.join("artifact.log.gz");
        std::fs::write(&source, body).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("category".to_string(), "app".to_string());
        PutObject {
            key: key.to_string(),
            source,
            content_length: body.len() as u64,
            content_type: "application/gzip".to_string(),
            content_encoding: "gzip".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_put_writes_object_and_sidecar() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path());

        store.put_object(request(staging.path(), "logs/2024/01/05/app/a.log.gz", b"payload"))?;

        let path = store.object_path("logs/2024/01/05/app/a.log.gz")?;
        assert_eq!(std::fs::read(path).unwrap(), b"payload");
        let meta = store.object_meta("logs/2024/01/05/app/a.log.gz")?;
        assert_eq!(meta.size_bytes, 7);
        assert_eq!(meta.metadata["category"], "app");
        Ok(())
    }

    #[test]
    fn test_put_overwrites_same_key() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path());

        store.put_object(request(staging.path(), "k/a.gz", b"one"))?;
        store.put_object(request(staging.path(), "k/a.gz", b"two"))?;

        assert_eq!(std::fs::read(store.object_path("k/a.gz")?).unwrap(), b"two");
        let entries = std::fs::read_dir(temp_dir.path().join("k")).unwrap().count();
        assert_eq!(entries, 2, "object plus sidecar only");
        Ok(())
    }

    #[test]
    fn test_missing_source_leaves_no_object() {
        let temp_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path());
        let put = request(staging.path(), "k/a.gz", b"x");
        std::fs::remove_file(&put.source).unwrap();

        let err = store.put_object(put).unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.object_path("k/a.gz").unwrap().exists());
    }

    #[test]
    fn test_missing_bucket_is_remote_error() {
        let temp_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path().join("absent"));

        assert!(matches!(store.head_bucket(), Err(Error::Remote(_))));
        assert!(store.put_object(request(staging.path(), "a.gz", b"x")).is_err());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let store = DirectoryStore::new("/tmp/bucket");
        assert!(store.object_path("../etc/passwd").is_err());
        assert!(store.object_path("a//b").is_err());
    }
}
