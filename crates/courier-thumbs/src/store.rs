//! Key to blob stores behind the thumbnail cache.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a [`ThumbnailStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error on a store file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A sidecar could not be parsed.
    #[error("Corrupt cache record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A cached preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailEntry {
    /// Stable identity of the source file.
    pub key: String,
    /// Opaque image bytes.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// When the preview was generated.
    pub fresh_at: DateTime<Utc>,
}

impl ThumbnailEntry {
    /// Create an entry stamped with the current time.
    pub fn new(key: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            data,
            fresh_at: Utc::now(),
        }
    }

    /// The same entry under a different key.
    pub fn rekeyed(&self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..self.clone()
        }
    }
}

/// Persistence behind [`ThumbnailCache`](crate::ThumbnailCache).
///
/// Stores do no locking of their own beyond what keeps them memory safe;
/// callers serialize access per key.
pub trait ThumbnailStore: Send + Sync {
    /// Look up an entry.
    fn get(&self, key: &str) -> Result<Option<ThumbnailEntry>, StoreError>;

    /// Insert or overwrite an entry.
    fn put(&self, entry: ThumbnailEntry) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Re-key an entry without touching its data. Returns whether it existed.
    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        match self.get(from)? {
            Some(entry) => {
                self.put(entry.rekeyed(to))?;
                self.remove(from)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Keys naming `prefix` itself or a path below it.
    fn keys_under(&self, prefix: &str) -> Vec<String>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Check if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `key` names `prefix` or something below it, compared by path
/// component so `/a/bc` is not under `/a/b`.
pub(crate) fn is_under(key: &str, prefix: &str) -> bool {
    Path::new(key).starts_with(prefix)
}

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, ThumbnailEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThumbnailStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<ThumbnailEntry>, StoreError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn put(&self, entry: ThumbnailEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        match self.entries.remove(from) {
            Some((_, entry)) => {
                self.entries.insert(to.to_string(), entry.rekeyed(to));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| is_under(e.key(), prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
