//! Events a job reports to its controller.

use std::path::PathBuf;

use courier_core::{ItemError, TrashRecord};
use courier_scan::CountResult;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::progress::ProgressSnapshot;
use crate::question::Question;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr)]
#[repr(u8)]
pub enum JobState {
    Pending,
    Running,
    /// All work completed.
    Finished,
    Cancelled,
    /// A job-fatal error aborted the remaining work.
    Failed,
}

impl JobState {
    /// Check if the job reached one of its final states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }
}

/// Processing state of one work-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum EntryState {
    Queued,
    Counting,
    Resolving,
    Executing,
    Done,
    Skipped,
    Failed,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }
}

/// Final state of one work-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub source: PathBuf,
    /// Where the entry ended up, when it was written somewhere.
    pub destination: Option<PathBuf>,
    pub state: EntryState,
}

/// Terminal report of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Terminal state.
    pub state: JobState,
    pub items_done: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Every error recorded during the job, in order.
    pub errors: Vec<ItemError>,
    /// Top-level paths the job created.
    pub new_files: Vec<PathBuf>,
    /// Items moved to the trash.
    pub trashed: Vec<TrashRecord>,
    /// Per-entry results, in work-list order.
    pub entries: Vec<EntryOutcome>,
    /// Totals of a deep count.
    pub count: Option<CountResult>,
}

impl JobSummary {
    /// Check if the job completed without errors.
    pub fn is_success(&self) -> bool {
        self.state == JobState::Finished && self.errors.is_empty()
    }

    /// Get a human-readable summary line.
    pub fn summary(&self) -> String {
        let mut line = format!("{}: {} done", self.state, self.items_done);
        if self.items_skipped > 0 {
            line.push_str(&format!(", {} skipped", self.items_skipped));
        }
        if self.items_failed > 0 {
            line.push_str(&format!(", {} failed", self.items_failed));
        }
        if !self.errors.is_empty() {
            line.push_str(&format!(", {} errors", self.errors.len()));
        }
        line
    }
}

/// Something a job reports while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// Status text, usually the display name of the item being processed.
    Info(String),
    Progress(ProgressSnapshot),
    /// The job waits for [`Job::respond`](crate::Job::respond).
    Question(Question),
    /// A recoverable per-item error.
    Error(ItemError),
    /// Always the last event, sent exactly once.
    Finished(JobSummary),
}

impl JobEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// The single-consumer event sequence of one job.
///
/// The sequence ends after [`JobEvent::Finished`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<JobEvent>,
    finished: bool,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<JobEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event)
    }

    /// Block the current thread until the next event.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.blocking_recv();
        self.observe(event)
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => self.observe(Some(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.observe(None),
        }
    }

    fn observe(&mut self, event: Option<JobEvent>) -> Option<JobEvent> {
        match &event {
            Some(e) if e.is_finished() => self.finished = true,
            None => self.finished = true,
            _ => {}
        }
        event
    }
}

impl Iterator for EventStream {
    type Item = JobEvent;

    fn next(&mut self) -> Option<JobEvent> {
        self.blocking_recv()
    }
}
