//! Flat, hash-keyed download cache shared by the remote services.
//!
//! Entries are named `<sha256 hex>.<extension>` inside a single directory and
//! never expire; callers refetch explicitly. Writes land in a temporary file in
//! the same directory and are renamed into place.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::app_dirs;

/// Where a returned artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Served from an existing cache entry.
    Cache,
    /// Freshly downloaded during this call.
    NewDownload,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => f.write_str("cache"),
            Self::NewDownload => f.write_str("new download"),
        }
    }
}

/// Hex-encoded SHA-256 of a cache key string.
pub fn cache_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve (and create) a cache directory, expanding a leading `~`.
pub fn prepare_cache_dir(dir: &Path) -> io::Result<PathBuf> {
    let dir = app_dirs::expand_tilde(dir);
    app_dirs::ensure_dir(&dir).map_err(|err| io::Error::other(err.to_string()))?;
    Ok(dir)
}

/// Write `bytes` gzip-compressed to `dest`.
pub fn write_gzip(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(dest, |file| {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?.flush()
    })
}

/// Write `bytes` uncompressed to `dest`.
pub fn write_plain(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(dest, |file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()
    })
}

/// Read and decompress a gzip cache entry.
pub fn read_gzip(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn write_atomic(
    dest: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)?;
    write(tmp.as_file_mut())?;
    tmp.persist(dest).map_err(|err| err.error)?;
    Ok(())
}
