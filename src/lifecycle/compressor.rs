//! Two-phase gzip compression of rotated logs.
//!
//! Compression is split so that the source is only ever removed once a
//! complete artifact sits at its final name:
//!
//! 1. [`write_artifact`] streams the source into `<name>.gz.tmp`, syncs it and
//!    verifies it decodes back to the source length.
//! 2. [`PendingArtifact::commit_if_unchanged`] checks the source has not grown
//!    and renames the partial file to `<name>.gz`.
//! 3. [`CompressedArtifact::release_source`] deletes the rotated source.
//!
//! Any failure before step 3 removes the partial file and leaves the source
//! untouched, so the next cycle retries from a clean state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use crate::error::{Error, IoContext, Result};
use crate::lifecycle::log_file::PARTIAL_SUFFIX;

const COPY_BUFFER: usize = 64 * 1024;

/// A fully written artifact that has not yet taken its final name.
#[derive(Debug)]
#[must_use = "a pending artifact must be committed or it is discarded"]
pub struct PendingArtifact {
    source: PathBuf,
    partial: PathBuf,
    target: PathBuf,
    original_size: u64,
}

/// A committed artifact whose source may still exist.
#[derive(Debug, Clone)]
pub struct CompressedArtifact {
    /// Path of the `.gz` file.
    pub path: PathBuf,

    /// Rotated file the artifact was produced from.
    pub source: PathBuf,

    /// Uncompressed size in bytes.
    pub original_size: u64,

    /// Size of the `.gz` file in bytes.
    pub compressed_size: u64,
}

/// Path of the compressed artifact for `rotated`.
pub fn artifact_path(rotated: &Path) -> PathBuf {
    let mut name = rotated.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn partial_path(rotated: &Path) -> PathBuf {
    let mut name = rotated.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Compress `rotated` in full: write, commit, then delete the source.
///
/// # Returns
///
/// The committed artifact. Its `source` no longer exists.
pub fn compress(rotated: &Path) -> Result<CompressedArtifact> {
    let artifact = write_artifact(rotated)?.commit_if_unchanged()?;
    artifact.release_source()?;
    info!(
        "Compressed: {} -> {} ({} -> {} bytes)",
        rotated.display(),
        artifact.path.file_name().unwrap_or_default().to_string_lossy(),
        artifact.original_size,
        artifact.compressed_size
    );
    Ok(artifact)
}

/// Phase one: stream `rotated` into a partial artifact.
pub fn write_artifact(rotated: &Path) -> Result<PendingArtifact> {
    let input = File::open(rotated).at(rotated)?;
    write_artifact_from(BufReader::with_capacity(COPY_BUFFER, input), rotated)
}

/// Phase one with an explicit byte source standing in for `rotated`'s contents.
///
/// The partial file is removed on any failure.
pub fn write_artifact_from<R: Read>(reader: R, rotated: &Path) -> Result<PendingArtifact> {
    let partial = partial_path(rotated);

    // A crash may have left one behind
    if partial.exists() {
        debug!("Removing stale partial artifact {}", partial.display());
        let _ = std::fs::remove_file(&partial);
    }

    match stream_into(reader, &partial) {
        Ok(original_size) => Ok(PendingArtifact {
            source: rotated.to_path_buf(),
            target: artifact_path(rotated),
            partial,
            original_size,
        }),
        Err(err) => {
            discard(&partial);
            Err(err)
        }
    }
}

fn stream_into<R: Read>(mut reader: R, partial: &Path) -> Result<u64> {
    let output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(partial)
        .at(partial)?;
    let mut encoder = GzEncoder::new(
        BufWriter::with_capacity(COPY_BUFFER, output),
        Compression::default(),
    );

    let original_size = io::copy(&mut reader, &mut encoder).at(partial)?;
    let mut writer = encoder.finish().at(partial)?;
    writer.flush().at(partial)?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::io(partial, e.into_error()))?;
    file.sync_all().at(partial)?;
    drop(file);

    verify(partial, original_size)?;
    Ok(original_size)
}

/// Decode the artifact end to end and check it yields `expected` bytes.
fn verify(partial: &Path, expected: u64) -> Result<()> {
    let input = File::open(partial).at(partial)?;
    let mut decoder = GzDecoder::new(BufReader::with_capacity(COPY_BUFFER, input));
    let decoded = io::copy(&mut decoder, &mut io::sink()).at(partial)?;
    if decoded != expected {
        return Err(Error::io(
            partial,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("verification failed: decoded {decoded} of {expected} bytes"),
            ),
        ));
    }
    Ok(())
}

fn discard(partial: &Path) {
    if let Err(err) = std::fs::remove_file(partial) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial artifact {}: {}", partial.display(), err);
        }
    }
}

impl PendingArtifact {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn partial(&self) -> &Path {
        &self.partial
    }

    /// Phase two: give the artifact its final name.
    pub fn commit(self) -> Result<CompressedArtifact> {
        if let Err(err) = std::fs::rename(&self.partial, &self.target) {
            discard(&self.partial);
            return Err(Error::io(&self.partial, err));
        }
        if let Some(parent) = self.target.parent() {
            // best effort: not every platform can fsync a directory
            if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!("fsync of {} skipped: {}", parent.display(), err);
            }
        }
        let compressed_size = std::fs::metadata(&self.target).at(&self.target)?.len();
        Ok(CompressedArtifact {
            path: self.target,
            source: self.source,
            original_size: self.original_size,
            compressed_size,
        })
    }

    /// Phase two, guarded: commit only if the source still has the size that
    /// was compressed.
    ///
    /// A writer that kept its descriptor across the rotation rename may still
    /// append to the rotated file. In that case the partial is abandoned and
    /// the source is left for the next cycle.
    pub fn commit_if_unchanged(self) -> Result<CompressedArtifact> {
        let current = match std::fs::metadata(&self.source) {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                let source = self.source.clone();
                self.abandon();
                return Err(Error::io(source, err));
            }
        };
        if current != self.original_size {
            let err = io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "source changed while compressing: {} -> {} bytes",
                    self.original_size, current
                ),
            );
            let source = self.source.clone();
            self.abandon();
            return Err(Error::io(source, err));
        }
        self.commit()
    }

    /// Throw the partial artifact away and keep the source.
    pub fn abandon(self) {
        discard(&self.partial);
    }
}

impl CompressedArtifact {
    /// Phase three: delete the rotated source.
    ///
    /// A source that is already gone counts as released.
    pub fn release_source(&self) -> Result<()> {
        match std::fs::remove_file(&self.source) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(&self.source, err)),
        }
    }
}
