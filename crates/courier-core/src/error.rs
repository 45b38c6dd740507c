//! Error types for filesystem operations and recorded job errors.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a [`FilesystemPort`](crate::FilesystemPort).
#[derive(Debug, Error)]
pub enum FsError {
    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// The destination already exists.
    #[error("Already exists: {path}")]
    Exists { path: PathBuf },

    /// A rename would cross a filesystem boundary.
    #[error("Cannot rename across filesystems: {path}")]
    CrossDevice { path: PathBuf },

    /// The filesystem does not support the operation.
    #[error("Operation not supported: {path}")]
    Unsupported { path: PathBuf },

    /// The destination volume is full.
    #[error("No space left on device: {path}")]
    NoSpace { path: PathBuf },

    /// A path component is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A directory still has children.
    #[error("Directory not empty: {path}")]
    NotEmpty { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Create an error with path context, classifying the I/O error kind.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => Self::Exists { path },
            io::ErrorKind::CrossesDevices => Self::CrossDevice { path },
            io::ErrorKind::Unsupported => Self::Unsupported { path },
            io::ErrorKind::StorageFull => Self::NoSpace { path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty { path },
            _ => Self::Io { path, source },
        }
    }

    /// The path this error refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path }
            | Self::PermissionDenied { path }
            | Self::Exists { path }
            | Self::CrossDevice { path }
            | Self::Unsupported { path }
            | Self::NoSpace { path }
            | Self::NotADirectory { path }
            | Self::NotEmpty { path }
            | Self::Io { path, .. } => path,
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Exists { .. } => ErrorKind::Exists,
            Self::CrossDevice { .. } => ErrorKind::CrossDevice,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::NoSpace { .. } => ErrorKind::NoSpace,
            Self::NotADirectory { .. } => ErrorKind::NotADirectory,
            Self::NotEmpty { .. } => ErrorKind::NotEmpty,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether this error must abort all remaining work of a job.
    ///
    /// Running out of space mid-copy is the only condition the filesystem
    /// itself reports as fatal; a vanished destination volume is detected
    /// by the job, which knows which path is the destination root.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoSpace { .. })
    }
}

/// Kind of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Exists,
    CrossDevice,
    Unsupported,
    NoSpace,
    NotADirectory,
    NotEmpty,
    Io,
    /// The destination volume disappeared while the job was running.
    VolumeGone,
    /// An internal invariant did not hold.
    Internal,
}

/// An error recorded by a job.
///
/// Unlike [`FsError`] this is plain data: it is cloned into events and
/// into the final job summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Path where the error occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of error.
    pub kind: ErrorKind,
    /// Whether the error aborted the job.
    pub fatal: bool,
}

impl ItemError {
    /// Create a new recoverable error.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
            fatal: false,
        }
    }

    /// Create a job-fatal error.
    pub fn fatal(path: impl Into<PathBuf>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            fatal: true,
            ..Self::new(path, message, kind)
        }
    }

    /// Mark this error as job-fatal.
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl From<&FsError> for ItemError {
    fn from(err: &FsError) -> Self {
        Self {
            path: err.path().to_path_buf(),
            message: err.to_string(),
            kind: err.kind(),
            fatal: err.is_fatal(),
        }
    }
}

impl From<FsError> for ItemError {
    fn from(err: FsError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
