//! Questions a job asks its controller, and the answers it accepts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use courier_core::FilesystemPort;
use serde::{Deserialize, Serialize};
use strum::Display;

/// What a question is about.
///
/// Answers that apply to all remaining questions are remembered per kind,
/// so pinning "skip all" for conflicts does not answer a later error
/// question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum QuestionKind {
    /// The destination already exists.
    Replace,
    /// An item cannot be trashed; delete it permanently instead?
    Delete,
    /// A destination directory does not exist; create it?
    Create,
    /// An item failed; skip it, retry it or stop?
    Skip,
    /// The destination lacks free space for the whole job.
    NoSpace,
}

impl QuestionKind {
    /// The answers a question of this kind offers.
    pub fn responses(self) -> &'static [Response] {
        use Response::*;
        match self {
            Self::Replace => &[Replace, ReplaceAll, Rename, RenameAll, Skip, SkipAll, Cancel],
            Self::Delete => &[Yes, YesToAll, No, NoToAll, Cancel],
            Self::Create => &[Yes, YesToAll, No, NoToAll, Cancel],
            Self::Skip => &[Skip, SkipAll, Retry, Cancel],
            Self::NoSpace => &[Force, Cancel],
        }
    }
}

/// An answer to a [`Question`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Response {
    Yes,
    YesToAll,
    No,
    NoToAll,
    /// Stop the whole job.
    Cancel,
    /// Try the failed operation again.
    Retry,
    /// Go ahead despite the warning.
    Force,
    /// Overwrite the existing destination.
    Replace,
    ReplaceAll,
    /// Use a generated name such as "file (1).txt".
    Rename,
    RenameAll,
    /// Leave source and destination untouched and move on.
    Skip,
    SkipAll,
}

impl Response {
    /// Check if this answer applies to all remaining questions of its kind.
    pub fn is_global(self) -> bool {
        matches!(
            self,
            Self::YesToAll | Self::NoToAll | Self::ReplaceAll | Self::RenameAll | Self::SkipAll
        )
    }

    /// Convert a global answer to its single-item equivalent.
    pub fn to_single(self) -> Self {
        match self {
            Self::YesToAll => Self::Yes,
            Self::NoToAll => Self::No,
            Self::ReplaceAll => Self::Replace,
            Self::RenameAll => Self::Rename,
            Self::SkipAll => Self::Skip,
            other => other,
        }
    }
}

/// A decision the job cannot make on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Sequence number within the job.
    pub id: u64,
    /// What the question is about.
    pub kind: QuestionKind,
    /// Human-readable prompt.
    pub message: String,
    /// The item being processed.
    pub source: Option<PathBuf>,
    /// The destination involved, if any.
    pub destination: Option<PathBuf>,
    /// The answers the job accepts.
    pub responses: Vec<Response>,
}

impl Question {
    pub(crate) fn new(id: u64, kind: QuestionKind, message: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            message: message.into(),
            source: None,
            destination: None,
            responses: kind.responses().to_vec(),
        }
    }

    pub(crate) fn with_paths(mut self, source: Option<&Path>, destination: Option<&Path>) -> Self {
        self.source = source.map(Path::to_path_buf);
        self.destination = destination.map(Path::to_path_buf);
        self
    }

    /// Check if `response` is one of the offered answers.
    pub fn accepts(&self, response: Response) -> bool {
        self.responses.contains(&response)
    }
}

/// "Apply to all" answers remembered for the rest of a job.
#[derive(Debug, Clone, Default)]
pub(crate) struct PinnedAnswers {
    answers: HashMap<QuestionKind, Response>,
}

impl PinnedAnswers {
    pub fn get(&self, kind: QuestionKind) -> Option<Response> {
        self.answers.get(&kind).copied()
    }

    /// Remember `response` if it applies to all questions of `kind`.
    pub fn record(&mut self, kind: QuestionKind, response: Response) {
        if response.is_global() && kind != QuestionKind::NoSpace {
            self.answers.insert(kind, response.to_single());
        }
    }
}

/// First free sibling of `dir/name`, trying "name (1).ext", "name (2).ext"
/// and so on.
pub fn unique_name(fs: &dyn FilesystemPort, dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let candidate = |suffix: String| match &extension {
        Some(ext) => dir.join(format!("{stem} ({suffix}).{ext}")),
        None => dir.join(format!("{stem} ({suffix})")),
    };

    for i in 1..1000 {
        let new_path = candidate(i.to_string());
        if !fs.exists(&new_path) {
            return new_path;
        }
    }

    candidate(chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string())
}
