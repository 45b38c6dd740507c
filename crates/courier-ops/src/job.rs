//! The controller-facing job handle.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use courier_core::{ErrorKind, FilesystemPort, ItemError, JobConfig};
use courier_thumbs::ThumbnailCache;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::{lock, JobContext, Shared, Stop, WorkResult};
use crate::deep_count::DeepCountWork;
use crate::delete::DeleteWork;
use crate::error::JobError;
use crate::event::{EventStream, JobState, JobSummary};
use crate::progress::ProgressSnapshot;
use crate::question::{Question, QuestionKind, Response};
use crate::transfer::{TransferKind, TransferWork};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Transfer(TransferKind),
    Delete,
    DeepCount,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer(kind) => write!(f, "{kind}"),
            Self::Delete => write!(f, "delete"),
            Self::DeepCount => write!(f, "deep-count"),
        }
    }
}

/// The work function of each job variant.
pub(crate) enum Work {
    Transfer(TransferWork),
    Delete(DeleteWork),
    DeepCount(DeepCountWork),
}

impl Work {
    fn run(self, ctx: &mut JobContext) -> WorkResult {
        match self {
            Self::Transfer(work) => work.run(ctx),
            Self::Delete(work) => work.run(ctx),
            Self::DeepCount(work) => work.run(ctx),
        }
    }
}

struct Launch {
    work: Work,
    ctx: JobContext,
}

/// A cancellable, observable unit of filesystem work.
///
/// Created by [`Engine`](crate::Engine). The job does nothing until
/// [`start`](Self::start) hands its work to a dedicated worker thread; from
/// then on the controller follows it through [`events`](Self::events) and
/// steers it with [`respond`](Self::respond), [`pause`](Self::pause) and
/// [`cancel`](Self::cancel). None of the handle's methods block on the
/// worker.
pub struct Job {
    id: JobId,
    kind: JobKind,
    shared: Arc<Shared>,
    launch: Mutex<Option<Launch>>,
    events: Mutex<Option<EventStream>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Job {
    pub(crate) fn new(
        kind: JobKind,
        work: Work,
        fs: Arc<dyn FilesystemPort>,
        config: JobConfig,
        thumbnails: Option<Arc<ThumbnailCache>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let ctx = JobContext::new(fs, config, thumbnails, Arc::clone(&shared), tx);

        Self {
            id: JobId::next(),
            kind,
            shared,
            launch: Mutex::new(Some(Launch { work, ctx })),
            events: Mutex::new(Some(EventStream::new(rx))),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Pre-answer every question of `kind` before the job starts, e.g. to
    /// run without a human in the loop.
    ///
    /// Only "apply to all" answers offered by that kind are accepted.
    pub fn pin_answer(&self, kind: QuestionKind, response: Response) -> Result<(), JobError> {
        let mut launch = lock(&self.launch);
        let launch = launch.as_mut().ok_or(JobError::AlreadyStarted)?;
        if !response.is_global() || !kind.responses().contains(&response) {
            return Err(JobError::InvalidResponse {
                response: response.to_string(),
            });
        }
        launch.ctx.pin(kind, response);
        Ok(())
    }

    /// Take the event stream. There is exactly one per job.
    pub fn events(&self) -> Result<EventStream, JobError> {
        lock(&self.events).take().ok_or(JobError::EventsTaken)
    }

    /// Launch the work on its own thread.
    pub fn start(&self) -> Result<(), JobError> {
        let Launch { work, ctx } = lock(&self.launch).take().ok_or(JobError::AlreadyStarted)?;
        self.shared.set_state(JobState::Running);

        let (id, kind) = (self.id, self.kind);
        let spawned = thread::Builder::new()
            .name(format!("courier-job-{}", id.0))
            .spawn(move || run_worker(id, kind, work, ctx));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(JobState::Failed);
                Err(JobError::Spawn(e))
            }
        }
    }

    /// Request cancellation. Safe to call any number of times from any
    /// thread; the worker stops at its next safe point. Does nothing once
    /// the job has ended.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        if !self.shared.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.id, "cancel requested");
        }
        self.shared.cancel.cancel();
        // Dropping the reply sender wakes a worker blocked on a question.
        lock(&self.shared.pending).take();
        self.shared.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Park the worker at its next safe point.
    pub fn pause(&self) {
        *lock(&self.shared.paused) = true;
    }

    pub fn resume(&self) {
        *lock(&self.shared.paused) = false;
        self.shared.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.shared.paused)
    }

    /// The question the worker is waiting on, if any.
    pub fn pending_question(&self) -> Option<Question> {
        lock(&self.shared.pending)
            .as_ref()
            .map(|pending| pending.question.clone())
    }

    /// Answer the outstanding question.
    pub fn respond(&self, response: Response) -> Result<(), JobError> {
        let mut pending = lock(&self.shared.pending);
        let Some(current) = pending.take() else {
            return Err(JobError::NoPendingQuestion);
        };
        if !current.question.accepts(response) {
            *pending = Some(current);
            return Err(JobError::InvalidResponse {
                response: response.to_string(),
            });
        }
        current
            .reply
            .try_send(response)
            .map_err(|_| JobError::NoPendingQuestion)
    }

    /// Current progress. Never blocks.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot()
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> Vec<ItemError> {
        lock(&self.shared.errors).clone()
    }

    /// The terminal report, once the job has ended.
    pub fn summary(&self) -> Option<JobSummary> {
        lock(&self.shared.summary).clone()
    }

    /// Block until the worker thread has exited and return the summary.
    ///
    /// Returns `None` right away for a job that was never started.
    pub fn wait(&self) -> Option<JobSummary> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(job_id = %self.id, "worker thread panicked");
            }
        }
        self.summary()
    }
}

fn run_worker(id: JobId, kind: JobKind, work: Work, mut ctx: JobContext) {
    let span = tracing::info_span!("job", job_id = %id, kind = %kind);
    let _enter = span.enter();
    tracing::info!("job started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run(&mut ctx)));
    let state = match outcome {
        Ok(Ok(())) => JobState::Finished,
        Ok(Err(Stop::Cancelled)) => JobState::Cancelled,
        Ok(Err(Stop::Fatal(error))) => {
            ctx.record_error(error.into_fatal());
            JobState::Failed
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            ctx.record_error(ItemError::fatal("", message, ErrorKind::Internal));
            JobState::Failed
        }
    };

    tracing::info!(%state, "job ended");
    ctx.finish(state);
}
