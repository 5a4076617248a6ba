//! File-backed cache of VNIC descriptors shared by concurrent driver
//! invocations on a node.
//!
//! Opening the cache takes an exclusive advisory lock on the whole file and
//! reads every entry into memory. Closing rewrites the file and releases the
//! lock, so concurrent processes serialise on [`VnicCache::open`].

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cloud::Vnic;

/// File name of the cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "nodenamecache.json";

const CACHE_FILE_MODE: u32 = 0o644;

/// Errors raised while opening or persisting the cache.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CacheError {
    /// Raised when the cache file cannot be created or opened.
    #[error("failed to open cache {path}: {message}")]
    Open {
        /// Cache file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        message: String,
    },
    /// Raised when the advisory lock cannot be taken.
    #[error("failed to lock cache {path}: {message}")]
    Lock {
        /// Cache file path.
        path: Utf8PathBuf,
        /// Underlying errno description.
        message: String,
    },
    /// Raised when the cache contents cannot be written back.
    #[error("failed to write cache {path}: {message}")]
    Write {
        /// Cache file path.
        path: Utf8PathBuf,
        /// Underlying I/O or encoding error.
        message: String,
    },
}

/// An open, locked cache file.
#[derive(Debug)]
pub struct VnicCache {
    path: Utf8PathBuf,
    file: Option<Flock<File>>,
    entries: BTreeMap<String, Vnic>,
}

impl VnicCache {
    /// Opens (creating if needed) and locks the cache at `path`.
    ///
    /// Unreadable or undecodable contents are logged and treated as an
    /// empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Open`] when the file cannot be opened and
    /// [`CacheError::Lock`] when the lock cannot be acquired.
    pub fn open(path: &Utf8Path) -> Result<Self, CacheError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(CACHE_FILE_MODE)
            .open(path)
            .map_err(|err| CacheError::Open {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            CacheError::Lock {
                path: path.to_path_buf(),
                message: errno.desc().to_owned(),
            }
        })?;

        let entries = read_entries(path, &mut locked);
        debug!(%path, entries = entries.len(), "opened vnic cache");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(locked),
            entries,
        })
    }

    /// Returns the cached descriptor for `vnic_id`.
    #[must_use]
    pub fn get(&self, vnic_id: &str) -> Option<&Vnic> {
        self.entries.get(vnic_id)
    }

    /// Stores a descriptor for `vnic_id`, replacing any previous entry.
    pub fn set(&mut self, vnic_id: impl Into<String>, vnic: Vnic) {
        self.entries.insert(vnic_id.into(), vnic);
    }

    /// Number of cached descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the cache back to disk and releases the lock.
    ///
    /// Closing an already closed cache does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] when the contents cannot be persisted.
    /// The lock is released either way.
    pub fn close(&mut self) -> Result<(), CacheError> {
        let Some(mut locked) = self.file.take() else {
            return Ok(());
        };

        let written = write_entries(&mut locked, &self.entries).map_err(|message| {
            CacheError::Write {
                path: self.path.clone(),
                message,
            }
        });

        if let Err((_, errno)) = locked.unlock() {
            warn!(path = %self.path, error = %errno, "failed to release vnic cache lock");
        }
        written
    }
}

impl Drop for VnicCache {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "vnic cache was not persisted");
        }
    }
}

fn read_entries(path: &Utf8Path, file: &mut File) -> BTreeMap<String, Vnic> {
    let mut contents = String::new();
    if let Err(err) = file.read_to_string(&mut contents) {
        warn!(%path, error = %err, "failed to read vnic cache; starting empty");
        return BTreeMap::new();
    }
    if contents.trim().is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str(&contents).unwrap_or_else(|err| {
        warn!(%path, error = %err, "failed to decode vnic cache; starting empty");
        BTreeMap::new()
    })
}

fn write_entries(file: &mut File, entries: &BTreeMap<String, Vnic>) -> Result<(), String> {
    let encoded = serde_json::to_vec(entries).map_err(|err| err.to_string())?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| err.to_string())?;
    file.set_len(0).map_err(|err| err.to_string())?;
    file.write_all(&encoded).map_err(|err| err.to_string())?;
    file.flush().map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests;
