//! Controller-facing errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the job handle and the job factories.
///
/// Failures of the work itself never surface here; they are reported as
/// events and collected in the job summary.
#[derive(Debug, Error)]
pub enum JobError {
    /// `start` was called on a job that is no longer pending.
    #[error("Job has already been started")]
    AlreadyStarted,

    /// `respond` was called while no question was outstanding.
    #[error("No question is pending")]
    NoPendingQuestion,

    /// The response is not one of the answers the question offered.
    #[error("Response {response} is not valid for this question")]
    InvalidResponse { response: String },

    /// The event stream was already handed out.
    #[error("Event stream has already been taken")]
    EventsTaken,

    /// The same entry appears twice in a work list.
    #[error("Duplicate entry in work list: {path}")]
    DuplicateEntry { path: PathBuf },

    /// A job was created without anything to do.
    #[error("Work list is empty")]
    EmptyWorkList,

    /// The worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}
