//! Core types for courier.
//!
//! This crate provides the filesystem capability that every job talks
//! through, a local implementation of it, the error taxonomy and the
//! configuration shared by all job kinds.

mod config;
mod error;
mod fs;
mod local;

pub use config::{JobConfig, JobConfigBuilder, DEFAULT_CHUNK_SIZE};
pub use error::{ErrorKind, FsError, ItemError};
pub use fs::{Entry, FileKind, FilesystemPort, InodeInfo, Metadata, TrashRecord};
pub use local::{LocalFs, TrashBackend};
