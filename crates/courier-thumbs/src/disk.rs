//! On-disk thumbnail store.
//!
//! Each entry is two files named by the BLAKE3 hash of its key: the image
//! bytes in `<hash>.png` and a JSON sidecar in `<hash>.json` holding the key
//! and the freshness timestamp. Keys are kept in memory for prefix scans and
//! rebuilt from the sidecars on open.

use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashSet;

use crate::store::{is_under, StoreError, ThumbnailEntry, ThumbnailStore};

const BLOB_EXT: &str = "png";
const SIDECAR_EXT: &str = "json";

/// A store persisted in a directory.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    keys: DashSet<String>,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Unreadable sidecars are skipped with a warning.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;

        let keys = DashSet::new();
        for dirent in fs::read_dir(&root).map_err(|e| StoreError::io(&root, e))? {
            let path = dirent.map_err(|e| StoreError::io(&root, e))?.path();
            if path.extension().is_none_or(|ext| ext != SIDECAR_EXT) {
                continue;
            }
            match read_sidecar(&path) {
                Ok(entry) => {
                    keys.insert(entry.key);
                }
                Err(err) => tracing::warn!(error = %err, "skipping thumbnail record"),
            }
        }

        tracing::debug!(root = %root.display(), entries = keys.len(), "opened thumbnail store");
        Ok(Self { root, keys })
    }

    fn file_stem(key: &str) -> String {
        blake3::hash(key.as_bytes()).to_hex().to_string()
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root
            .join(Self::file_stem(key))
            .with_extension(BLOB_EXT)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root
            .join(Self::file_stem(key))
            .with_extension(SIDECAR_EXT)
    }

    fn write_sidecar(&self, entry: &ThumbnailEntry) -> Result<(), StoreError> {
        let path = self.sidecar_path(&entry.key);
        let json = serde_json::to_vec(entry).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json)
    }
}

impl ThumbnailStore for DiskStore {
    fn get(&self, key: &str) -> Result<Option<ThumbnailEntry>, StoreError> {
        if !self.keys.contains(key) {
            return Ok(None);
        }

        let mut entry = read_sidecar(&self.sidecar_path(key))?;
        let blob = self.blob_path(key);
        entry.data = match fs::read(&blob) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(blob, e)),
        };
        Ok(Some(entry))
    }

    fn put(&self, entry: ThumbnailEntry) -> Result<(), StoreError> {
        write_atomic(&self.blob_path(&entry.key), &entry.data)?;
        self.write_sidecar(&entry)?;
        self.keys.insert(entry.key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.keys.remove(key).is_some();
        for path in [self.blob_path(key), self.sidecar_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(existed)
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        if !self.keys.contains(from) {
            return Ok(false);
        }

        let mut entry = read_sidecar(&self.sidecar_path(from))?;
        entry.key = to.to_string();

        let (src_blob, dst_blob) = (self.blob_path(from), self.blob_path(to));
        fs::rename(&src_blob, &dst_blob).map_err(|e| StoreError::io(&src_blob, e))?;
        self.write_sidecar(&entry)?;
        self.keys.insert(entry.key);

        self.keys.remove(from);
        let old_sidecar = self.sidecar_path(from);
        fs::remove_file(&old_sidecar).map_err(|e| StoreError::io(old_sidecar, e))?;
        Ok(true)
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| is_under(k.as_str(), prefix))
            .map(|k| k.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

fn read_sidecar(path: &Path) -> Result<ThumbnailEntry, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a temporary sibling so readers never see a torn file.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}
