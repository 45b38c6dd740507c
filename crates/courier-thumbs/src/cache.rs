//! The thumbnail cache service shared by jobs and the display layer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::disk::DiskStore;
use crate::store::{MemoryStore, StoreError, ThumbnailEntry, ThumbnailStore};

/// Cache key for a path.
pub fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Thumbnail cache kept consistent with file moves, copies and deletes.
///
/// Every notification is best-effort: failures are logged and swallowed,
/// and a missing entry is simply regenerated by whoever reads it next.
/// Mutations are serialized per key, so unrelated files never wait on
/// each other.
pub struct ThumbnailCache {
    store: Box<dyn ThumbnailStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("entries", &self.store.len())
            .finish()
    }
}

impl ThumbnailCache {
    /// Cache over an arbitrary store.
    pub fn with_store(store: impl ThumbnailStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            locks: DashMap::new(),
        }
    }

    /// Cache that is never persisted.
    pub fn in_memory() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Cache persisted under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::with_store(DiskStore::open(dir)?))
    }

    /// Number of cached previews.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Store a freshly generated preview for `path`.
    pub fn put(&self, path: &Path, data: Vec<u8>) {
        let key = cache_key(path);
        self.with_locked(&[key.as_str()], || {
            if let Err(err) = self.store.put(ThumbnailEntry::new(key.clone(), data)) {
                tracing::warn!(key = %key, error = %err, "failed to store thumbnail");
            }
        });
    }

    /// Cached preview for `path`, regardless of age.
    pub fn get(&self, path: &Path) -> Option<ThumbnailEntry> {
        let key = cache_key(path);
        self.with_locked(&[key.as_str()], || self.load(&key))
    }

    /// Cached preview for `path`, only if it is not older than `modified`.
    pub fn get_fresh(&self, path: &Path, modified: SystemTime) -> Option<ThumbnailEntry> {
        let modified = DateTime::<Utc>::from(modified);
        self.get(path).filter(|entry| entry.fresh_at >= modified)
    }

    /// Check if a preview is cached for `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// `src` was renamed to `dst`: re-key its entry and those of everything
    /// below it.
    pub fn on_move(&self, src: &Path, dst: &Path) {
        for (from, to) in self.subtree_pairs(src, dst) {
            self.with_locked(&[from.as_str(), to.as_str()], || match self.store.rename(&from, &to) {
                Ok(true) => tracing::debug!(from = %from, to = %to, "moved thumbnail"),
                Ok(false) => {}
                Err(err) => tracing::warn!(from = %from, to = %to, error = %err, "failed to move thumbnail"),
            });
        }
    }

    /// `src` was copied to `dst`: duplicate its entries under the new keys.
    pub fn on_copy(&self, src: &Path, dst: &Path) {
        for (from, to) in self.subtree_pairs(src, dst) {
            self.with_locked(&[from.as_str(), to.as_str()], || {
                let Some(entry) = self.load(&from) else {
                    return;
                };
                match self.store.put(entry.rekeyed(to.clone())) {
                    Ok(()) => tracing::debug!(from = %from, to = %to, "copied thumbnail"),
                    Err(err) => tracing::warn!(from = %from, to = %to, error = %err, "failed to copy thumbnail"),
                }
            });
        }
    }

    /// `path` was deleted or trashed: drop its entry.
    pub fn on_delete(&self, path: &Path) {
        let key = cache_key(path);
        self.with_locked(&[key.as_str()], || self.remove(&key));
    }

    /// Drop every entry for `prefix` and anything below it.
    pub fn cleanup(&self, prefix: &Path) {
        let keys = self.store.keys_under(&cache_key(prefix));
        for key in keys {
            self.with_locked(&[key.as_str()], || self.remove(&key));
        }
    }

    fn load(&self, key: &str) -> Option<ThumbnailEntry> {
        match self.store.get(key) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "failed to read thumbnail");
                None
            }
        }
    }

    fn remove(&self, key: &str) {
        match self.store.remove(key) {
            Ok(true) => tracing::debug!(key = %key, "dropped thumbnail"),
            Ok(false) => {}
            Err(err) => tracing::warn!(key = %key, error = %err, "failed to drop thumbnail"),
        }
    }

    /// Old and new keys for `src` and every cached key below it.
    fn subtree_pairs(&self, src: &Path, dst: &Path) -> Vec<(String, String)> {
        let mut pairs = vec![(cache_key(src), cache_key(dst))];
        for key in self.store.keys_under(&cache_key(src)) {
            let Ok(rel) = Path::new(&key).strip_prefix(src) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            pairs.push((key.clone(), cache_key(&dst.join(rel))));
        }
        pairs
    }

    /// Run `f` holding the locks of `keys`, taken in sorted order.
    fn with_locked<R>(&self, keys: &[&str], f: impl FnOnce() -> R) -> R {
        let mut keys: Vec<&str> = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let locks: Vec<Arc<Mutex<()>>> = keys
            .iter()
            .map(|k| self.locks.entry((*k).to_string()).or_default().clone())
            .collect();
        let guards: Vec<_> = locks
            .iter()
            .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let result = f();

        drop(guards);
        drop(locks);
        for key in keys {
            self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
        result
    }
}
