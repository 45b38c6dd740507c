//! Worker-side half of a job: everything the work function talks to.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use courier_core::{ErrorKind, FilesystemPort, FsError, ItemError, JobConfig, TrashRecord};
use courier_scan::{CountProgress, CountResult, ScanObserver};
use courier_thumbs::ThumbnailCache;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::event::{EntryOutcome, JobEvent, JobState, JobSummary};
use crate::progress::ProgressTracker;
use crate::question::{PinnedAnswers, Question, QuestionKind, Response};

/// Why a work function stopped early.
#[derive(Debug)]
pub(crate) enum Stop {
    Cancelled,
    Fatal(ItemError),
}

pub(crate) type WorkResult<T = ()> = Result<T, Stop>;

/// Failure of a single filesystem step.
#[derive(Debug)]
pub(crate) enum OpError {
    /// Cancellation was observed inside the step.
    Cancelled,
    Fs(FsError),
}

impl From<FsError> for OpError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The question currently waiting for an answer.
pub(crate) struct Pending {
    pub question: Question,
    pub reply: SyncSender<Response>,
}

/// State shared between the job handle and its worker.
pub(crate) struct Shared {
    state: AtomicU8,
    pub cancel: CancellationToken,
    pub paused: Mutex<bool>,
    pub resumed: Condvar,
    pub pending: Mutex<Option<Pending>>,
    pub progress: ProgressTracker,
    pub errors: Mutex<Vec<ItemError>>,
    pub summary: Mutex<Option<JobSummary>>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(JobState::Pending as u8),
            cancel: CancellationToken::new(),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            pending: Mutex::new(None),
            progress: ProgressTracker::new(),
            errors: Mutex::new(Vec::new()),
            summary: Mutex::new(None),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(JobState::Failed)
    }

    pub fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Services and bookkeeping handed to a work function.
pub(crate) struct JobContext {
    pub fs: Arc<dyn FilesystemPort>,
    pub config: JobConfig,
    thumbnails: Option<Arc<ThumbnailCache>>,
    shared: Arc<Shared>,
    events: UnboundedSender<JobEvent>,
    pinned: PinnedAnswers,
    questions: u64,
    last_progress: Option<Instant>,
    pub new_files: Vec<PathBuf>,
    pub trashed: Vec<TrashRecord>,
    pub entries: Vec<EntryOutcome>,
    pub count: Option<CountResult>,
}

impl JobContext {
    pub fn new(
        fs: Arc<dyn FilesystemPort>,
        config: JobConfig,
        thumbnails: Option<Arc<ThumbnailCache>>,
        shared: Arc<Shared>,
        events: UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            fs,
            config,
            thumbnails,
            shared,
            events,
            pinned: PinnedAnswers::default(),
            questions: 0,
            last_progress: None,
            new_files: Vec::new(),
            trashed: Vec::new(),
            entries: Vec::new(),
            count: None,
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.shared.progress
    }

    pub fn thumbnails(&self) -> Option<&ThumbnailCache> {
        self.thumbnails.as_deref()
    }

    pub fn pin(&mut self, kind: QuestionKind, response: Response) {
        self.pinned.record(kind, response);
    }

    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Safe point: fails once the job is cancelled and parks while it is
    /// paused.
    pub fn checkpoint(&self) -> WorkResult {
        let mut paused = lock(&self.shared.paused);
        while *paused && !self.is_cancelled() {
            paused = self
                .shared
                .resumed
                .wait_timeout(paused, self.config.liveness_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(paused);

        if self.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: JobEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event dropped, controller is gone");
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(JobEvent::Info(text.into()));
    }

    /// Show `path` as the item in flight.
    pub fn set_current(&self, path: &Path) {
        let name = display_name(path);
        self.progress().set_current(name.clone());
        self.info(name);
    }

    /// Emit a progress event now.
    pub fn report_progress(&mut self) {
        self.last_progress = Some(Instant::now());
        self.emit(JobEvent::Progress(self.progress().snapshot()));
    }

    /// Emit a progress event unless one went out very recently.
    pub fn report_progress_throttled(&mut self) {
        let due = self
            .last_progress
            .is_none_or(|at| at.elapsed() >= self.config.progress_interval);
        if due {
            self.report_progress();
        }
    }

    /// Record a recoverable error and surface it to the controller.
    pub fn record_error(&mut self, error: ItemError) {
        tracing::warn!(path = %error.path.display(), kind = ?error.kind, "{}", error.message);
        lock(&self.shared.errors).push(error.clone());
        self.emit(JobEvent::Error(error));
    }

    /// Ask the controller and block until it answers.
    ///
    /// A pinned answer for the same kind is returned without asking. Global
    /// answers come back in their single-item form. A `Cancel` answer, or
    /// giving up on the controller, cancels the job.
    pub fn ask(
        &mut self,
        kind: QuestionKind,
        message: impl Into<String>,
        source: Option<&Path>,
        destination: Option<&Path>,
    ) -> Response {
        if let Some(response) = self.pinned.get(kind) {
            tracing::debug!(%kind, %response, "using pinned answer");
            return response;
        }
        if self.is_cancelled() {
            return Response::Cancel;
        }

        self.questions += 1;
        let question =
            Question::new(self.questions, kind, message).with_paths(source, destination);
        let response = self.wait_for_answer(question);
        tracing::debug!(%kind, %response, "question answered");

        if response == Response::Cancel {
            self.shared.cancel.cancel();
        }
        self.pinned.record(kind, response);
        response.to_single()
    }

    fn wait_for_answer(&mut self, question: Question) -> Response {
        let (reply, answers) = mpsc::sync_channel(1);
        *lock(&self.shared.pending) = Some(Pending {
            question: question.clone(),
            reply,
        });
        self.emit(JobEvent::Question(question));

        let asked = Instant::now();
        let response = loop {
            match answers.recv_timeout(self.config.liveness_interval) {
                Ok(response) => break response,
                Err(RecvTimeoutError::Disconnected) => break Response::Cancel,
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_cancelled() {
                        break Response::Cancel;
                    }
                    if self.events.is_closed() {
                        tracing::warn!("controller went away while a question was pending");
                        break Response::Cancel;
                    }
                    if let Some(limit) = self.config.ask_timeout {
                        if asked.elapsed() >= limit {
                            tracing::warn!(timeout = ?limit, "question timed out");
                            break Response::Cancel;
                        }
                    }
                }
            }
        };

        lock(&self.shared.pending).take();
        // An answer may have raced with giving up.
        if response == Response::Cancel {
            if let Ok(late) = answers.try_recv() {
                return late;
            }
        }
        response
    }

    /// Run `op` until it succeeds, the controller skips it, or the job stops.
    ///
    /// Every failure is recorded. A vanished source is not worth a question
    /// and is skipped right away. Running out of space, or losing
    /// `destination_root`, is fatal. Returns `None` when the step was
    /// given up.
    pub fn attempt<T>(
        &mut self,
        action: &str,
        destination_root: Option<&Path>,
        mut op: impl FnMut(&mut Self) -> Result<T, OpError>,
    ) -> WorkResult<Option<T>> {
        loop {
            let err = match op(self) {
                Ok(value) => return Ok(Some(value)),
                Err(OpError::Cancelled) => return Err(Stop::Cancelled),
                Err(OpError::Fs(err)) => err,
            };

            if let Some(root) = destination_root {
                if !self.fs.exists(root) {
                    return Err(Stop::Fatal(ItemError::fatal(
                        root,
                        format!("Destination is no longer available: {}", root.display()),
                        ErrorKind::VolumeGone,
                    )));
                }
            }
            if err.is_fatal() {
                return Err(Stop::Fatal(ItemError::from(&err)));
            }

            let path = err.path().to_path_buf();
            self.record_error(ItemError::new(
                &path,
                format!("{action}: {err}"),
                err.kind(),
            ));
            if err.kind() == ErrorKind::NotFound {
                return Ok(None);
            }

            let message = format!("{action} “{}”: {err}", display_name(&path));
            match self.ask(QuestionKind::Skip, message, Some(&path), None) {
                Response::Retry => {
                    tracing::debug!(path = %path.display(), "retrying");
                }
                Response::Skip => return Ok(None),
                _ => return Err(Stop::Cancelled),
            }
        }
    }

    /// Build the summary, publish it and send `Finished`.
    pub fn finish(self, state: JobState) -> JobSummary {
        let progress = self.progress().snapshot();
        let summary = JobSummary {
            state,
            items_done: progress.items_done,
            items_skipped: progress.items_skipped,
            items_failed: progress.items_failed,
            bytes_done: progress.bytes_done,
            bytes_total: progress.bytes_total,
            errors: lock(&self.shared.errors).clone(),
            new_files: self.new_files,
            trashed: self.trashed,
            entries: self.entries,
            count: self.count,
        };

        *lock(&self.shared.summary) = Some(summary.clone());
        self.shared.set_state(state);
        if self.events.send(JobEvent::Finished(summary.clone())).is_err() {
            tracing::debug!("finished with nobody listening");
        }
        summary
    }
}

/// What a traversal feeds back into the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanMode {
    /// Transfer pre-pass: only the current path is shown.
    Totals,
    /// Deep count: everything seen is progress.
    Count,
}

/// Adapts a job to a traversal.
pub(crate) struct ScanBridge<'a> {
    ctx: &'a mut JobContext,
    mode: ScanMode,
}

impl<'a> ScanBridge<'a> {
    pub fn new(ctx: &'a mut JobContext, mode: ScanMode) -> Self {
        Self { ctx, mode }
    }
}

impl ScanObserver for ScanBridge<'_> {
    fn should_stop(&mut self) -> bool {
        self.ctx.checkpoint().is_err()
    }

    fn on_progress(&mut self, progress: &CountProgress) {
        self.ctx
            .progress()
            .set_current(display_name(&progress.current_path));
        if self.mode == ScanMode::Count {
            self.ctx
                .progress()
                .record_scanned(progress.total_items(), progress.bytes_scanned);
        }
        self.ctx.report_progress_throttled();
    }

    fn on_error(&mut self, error: ItemError) {
        self.ctx.record_error(error);
    }
}

/// Name shown for a path: its file name, or the whole path for roots.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
