//! The filesystem capability consumed by jobs.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::FsError;

/// Inode information, used to detect directory cycles and hardlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (never followed unless asked for).
    Symlink,
    /// Other file types (sockets, devices, etc.).
    Other,
}

impl FileKind {
    /// Check if this is a directory.
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }

    /// Check if this is a symbolic link.
    pub fn is_symlink(self) -> bool {
        self == Self::Symlink
    }
}

/// Metadata of a single path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Entry type.
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, if the platform reports it.
    pub modified: Option<SystemTime>,
    /// Inode and device, if the platform reports them.
    pub inode: Option<InodeInfo>,
}

impl Metadata {
    /// Check if the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// A child returned by [`FilesystemPort::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// File name of the child.
    pub name: CompactString,
    /// Full path of the child.
    pub path: PathBuf,
    /// Entry type, without following symlinks.
    pub kind: FileKind,
}

/// Where a trashed item went, enough to restore it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashRecord {
    /// The path the item had before it was trashed.
    pub original_path: PathBuf,
    /// When the item was trashed.
    pub trashed_at: DateTime<Utc>,
    /// Location inside the trash store, when the backend exposes it.
    pub location: Option<PathBuf>,
}

impl TrashRecord {
    /// Create a record stamped with the current time.
    pub fn now(original_path: impl Into<PathBuf>, location: Option<PathBuf>) -> Self {
        Self {
            original_path: original_path.into(),
            trashed_at: Utc::now(),
            location,
        }
    }
}

/// Abstract capability over real filesystem operations.
///
/// Every method is a single blocking call. Jobs only observe cancellation
/// between calls, so no call is ever interrupted half-way.
pub trait FilesystemPort: Send + Sync {
    /// Stat a path. Symlinks are only resolved when `follow_symlinks` is set.
    fn stat(&self, path: &Path, follow_symlinks: bool) -> Result<Metadata, FsError>;

    /// List the children of a directory.
    fn list(&self, dir: &Path) -> Result<Vec<Entry>, FsError>;

    /// Copy up to `len` bytes of `src`, starting at `offset`, to the same
    /// offset of `dst`. An `offset` of zero creates or truncates `dst`.
    ///
    /// Returns the number of bytes written; zero means end of file.
    fn copy_chunk(&self, src: &Path, dst: &Path, offset: u64, len: u64) -> Result<u64, FsError>;

    /// Copy permission bits from `src` to `dst`.
    fn copy_attributes(&self, _src: &Path, _dst: &Path) -> Result<(), FsError> {
        Ok(())
    }

    /// Create a single directory. Fails with `Exists` if anything is there.
    fn create_dir(&self, path: &Path) -> Result<(), FsError>;

    /// Atomically rename `src` to `dst`.
    ///
    /// Fails with `Exists` when `dst` exists and `CrossDevice` when the two
    /// paths live on different filesystems.
    fn rename(&self, src: &Path, dst: &Path) -> Result<(), FsError>;

    /// Create a symbolic link at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), FsError>;

    /// Read the target of a symbolic link.
    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError>;

    /// Move a path to the platform trash store.
    ///
    /// Returns `Unsupported` when no trash is available for this path.
    fn trash(&self, path: &Path) -> Result<TrashRecord, FsError>;

    /// Delete a file, a symlink or an empty directory.
    fn delete(&self, path: &Path) -> Result<(), FsError>;

    /// Bytes available to unprivileged users on the volume holding `dir`.
    fn free_space(&self, dir: &Path) -> Result<u64, FsError>;

    /// Check whether anything exists at `path` (dangling symlinks included).
    fn exists(&self, path: &Path) -> bool {
        self.stat(path, false).is_ok()
    }
}
