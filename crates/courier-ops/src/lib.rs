//! File-operation jobs for courier.
//!
//! This crate runs long filesystem operations (copy, move, link, trash,
//! delete and deep count) on dedicated worker threads. A controller
//! follows each [`Job`] through its [`EventStream`], answers the
//! [`Question`]s it asks, and may pause or cancel it at any time.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_ops::{Engine, JobEvent, Response};
//!
//! let engine = Engine::local();
//! let job = engine.copy(vec!["/tmp/a.txt".into()], "/tmp/backup").unwrap();
//! let events = job.events().unwrap();
//! job.start().unwrap();
//!
//! for event in events {
//!     match event {
//!         JobEvent::Question(_) => job.respond(Response::Skip).unwrap(),
//!         JobEvent::Finished(summary) => println!("{}", summary.summary()),
//!         _ => {}
//!     }
//! }
//! ```

mod context;
mod copy;
mod deep_count;
mod delete;
mod engine;
mod error;
mod event;
mod job;
mod move_op;
mod progress;
mod question;
mod transfer;

pub use engine::Engine;
pub use error::JobError;
pub use event::{EntryOutcome, EntryState, EventStream, JobEvent, JobState, JobSummary};
pub use job::{Job, JobId, JobKind};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use question::{unique_name, Question, QuestionKind, Response};
pub use transfer::{TransferItem, TransferKind};

// Re-export the types jobs are built from
pub use courier_core::{FilesystemPort, ItemError, JobConfig, LocalFs, TrashBackend};
pub use courier_scan::CountResult;
pub use courier_thumbs::ThumbnailCache;
