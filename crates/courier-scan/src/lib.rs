//! Deep traversal engine for courier.
//!
//! This crate walks directory trees through a
//! [`FilesystemPort`](courier_core::FilesystemPort) and counts what it finds.
//!
//! # Overview
//!
//! `courier-scan` backs both the deep-count job and the pre-pass of every
//! transfer. Key features:
//!
//! - **Deterministic order**: children are visited sorted by name
//! - **Symlink policy**: links are leaves unless following is enabled
//! - **Cycle detection** by inode when links are followed
//! - **Cooperative stopping** through [`ScanObserver::should_stop`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use courier_core::{ItemError, LocalFs};
//! use courier_scan::{DeepCounter, ScanObserver};
//!
//! struct Quiet;
//!
//! impl ScanObserver for Quiet {
//!     fn should_stop(&mut self) -> bool {
//!         false
//!     }
//!
//!     fn on_error(&mut self, error: ItemError) {
//!         eprintln!("{error}");
//!     }
//! }
//!
//! let counter = DeepCounter::new(Arc::new(LocalFs::new()));
//! let result = counter.count(&[PathBuf::from("/path/to/count")], &mut Quiet).unwrap();
//!
//! println!("{} files, {} bytes", result.files, result.total_size);
//! ```

mod counter;
mod progress;
mod visited;

pub use counter::{CountResult, DeepCounter, Interrupted, ScanNode, ScanObserver};
pub use progress::CountProgress;
pub use visited::VisitedSet;
