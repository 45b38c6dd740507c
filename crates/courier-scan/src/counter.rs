//! Recursive traversal through a [`FilesystemPort`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use compact_str::CompactString;
use courier_core::{ErrorKind, FileKind, FilesystemPort, FsError, ItemError, Metadata};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::{CountProgress, ProgressTracker};
use crate::visited::VisitedSet;

/// Returned when the observer asked the traversal to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Traversal interrupted")]
pub struct Interrupted;

/// Receives traversal events and decides whether to keep going.
pub trait ScanObserver {
    /// Polled before every entry. Returning `true` stops the traversal.
    ///
    /// Implementations may block here, e.g. while a job is paused.
    fn should_stop(&mut self) -> bool;

    /// Called after each directory has been listed.
    fn on_progress(&mut self, _progress: &CountProgress) {}

    /// Called for every entry that could not be read; the traversal
    /// continues with the next entry.
    fn on_error(&mut self, error: ItemError);
}

/// Aggregated counts of a traversal.
///
/// Roots that are directories are not counted themselves, so an empty
/// directory yields zero items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResult {
    /// Regular files and other non-directory, non-symlink entries.
    pub files: u64,
    /// Directories below the roots.
    pub directories: u64,
    /// Symbolic links that were not followed.
    pub symlinks: u64,
    /// Sum of all non-directory sizes.
    pub total_size: u64,
    /// Size of the largest file.
    pub largest_file: u64,
    /// Entries that could not be read.
    pub unreadable: u64,
}

impl CountResult {
    /// Total number of entries counted.
    pub fn item_count(&self) -> u64 {
        self.files + self.directories + self.symlinks
    }

    /// Number of non-directory entries.
    pub fn leaf_count(&self) -> u64 {
        self.files + self.symlinks
    }

    fn record_leaf(&mut self, kind: FileKind, size: u64) {
        if kind.is_symlink() {
            self.symlinks += 1;
        } else {
            self.files += 1;
            self.largest_file = self.largest_file.max(size);
        }
        self.total_size = self.total_size.saturating_add(size);
    }
}

/// One entry of an expanded tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanNode {
    /// File name.
    pub name: CompactString,
    /// Full path.
    pub path: PathBuf,
    /// Entry type as seen by the traversal.
    pub kind: FileKind,
    /// Own size in bytes (0 for directories).
    pub size: u64,
    /// Children sorted by name (empty for non-directories).
    pub children: Vec<ScanNode>,
}

impl ScanNode {
    fn new(path: &Path, kind: FileKind, size: u64) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| CompactString::from(n.to_string_lossy()))
                .unwrap_or_default(),
            path: path.to_path_buf(),
            kind,
            size,
            children: Vec::new(),
        }
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Total size of this node and everything below it.
    pub fn total_size(&self) -> u64 {
        self.children
            .iter()
            .fold(self.size, |acc, child| acc.saturating_add(child.total_size()))
    }

    /// Number of non-directory entries at or below this node.
    pub fn leaf_count(&self) -> u64 {
        if self.is_dir() {
            self.children.iter().map(ScanNode::leaf_count).sum()
        } else {
            1
        }
    }
}

/// Deep counter over one or more roots.
///
/// Children are visited in name order so repeated traversals of the same
/// tree produce the same sequence.
#[derive(Clone)]
pub struct DeepCounter {
    fs: Arc<dyn FilesystemPort>,
    follow_symlinks: bool,
}

impl DeepCounter {
    /// Create a counter that does not follow symlinks.
    pub fn new(fs: Arc<dyn FilesystemPort>) -> Self {
        Self {
            fs,
            follow_symlinks: false,
        }
    }

    /// Set the symlink-following policy.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Count everything below `roots`.
    pub fn count(
        &self,
        roots: &[PathBuf],
        observer: &mut dyn ScanObserver,
    ) -> Result<CountResult, Interrupted> {
        let mut walk = Walk::new(self, observer, false);
        for root in roots {
            walk.visit_root(root)?;
        }
        Ok(walk.result)
    }

    /// Expand `root` into a tree, counting as it goes.
    ///
    /// Returns `None` for the tree when the root itself cannot be read; the
    /// error has then been reported to the observer.
    pub fn expand(
        &self,
        root: &Path,
        observer: &mut dyn ScanObserver,
    ) -> Result<(Option<ScanNode>, CountResult), Interrupted> {
        let mut walk = Walk::new(self, observer, true);
        let node = walk.visit_root(root)?;
        Ok((node, walk.result))
    }
}

struct Walk<'a> {
    fs: &'a dyn FilesystemPort,
    follow_symlinks: bool,
    observer: &'a mut dyn ScanObserver,
    visited: VisitedSet,
    progress: ProgressTracker,
    result: CountResult,
    keep_tree: bool,
}

impl<'a> Walk<'a> {
    fn new(counter: &'a DeepCounter, observer: &'a mut dyn ScanObserver, keep_tree: bool) -> Self {
        Self {
            fs: counter.fs.as_ref(),
            follow_symlinks: counter.follow_symlinks,
            observer,
            visited: VisitedSet::new(),
            progress: ProgressTracker::new(),
            result: CountResult::default(),
            keep_tree,
        }
    }

    fn visit_root(&mut self, root: &Path) -> Result<Option<ScanNode>, Interrupted> {
        if self.observer.should_stop() {
            return Err(Interrupted);
        }

        let metadata = match self.fs.stat(root, self.follow_symlinks) {
            Ok(m) => m,
            Err(err) => {
                self.report(&err);
                return Ok(None);
            }
        };

        if !self.first_visit(&metadata) {
            return Ok(None);
        }

        let mut node = ScanNode::new(root, metadata.kind, metadata.size);
        if metadata.is_dir() {
            node.children = self.visit_dir(root)?;
        } else {
            self.record_leaf(&metadata);
        }
        self.observer.on_progress(&self.progress.snapshot());
        Ok(Some(node))
    }

    fn visit_dir(&mut self, dir: &Path) -> Result<Vec<ScanNode>, Interrupted> {
        self.progress.set_current_path(dir.to_path_buf());

        let mut entries = match self.fs.list(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.report(&err);
                return Ok(Vec::new());
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut children = Vec::new();
        for entry in entries {
            if self.observer.should_stop() {
                return Err(Interrupted);
            }

            let follow = self.follow_symlinks && entry.kind.is_symlink();
            let metadata = match self.fs.stat(&entry.path, follow) {
                Ok(m) => m,
                Err(err) => {
                    if follow {
                        self.report_broken_link(&entry.path, &err);
                    } else {
                        self.report(&err);
                    }
                    continue;
                }
            };

            if !self.first_visit(&metadata) {
                continue;
            }

            let mut node = ScanNode::new(&entry.path, metadata.kind, metadata.size);
            if metadata.is_dir() {
                self.result.directories += 1;
                self.progress.record_dir();
                node.children = self.visit_dir(&entry.path)?;
            } else {
                self.record_leaf(&metadata);
            }

            if self.keep_tree {
                children.push(node);
            }
        }

        self.observer.on_progress(&self.progress.snapshot());
        Ok(children)
    }

    fn first_visit(&self, metadata: &Metadata) -> bool {
        if !self.follow_symlinks {
            return true;
        }
        match metadata.inode {
            Some(inode) => self.visited.first_visit(inode),
            None => true,
        }
    }

    fn record_leaf(&mut self, metadata: &Metadata) {
        self.result.record_leaf(metadata.kind, metadata.size);
        self.progress.record_file(metadata.size);
    }

    fn report(&mut self, err: &FsError) {
        tracing::debug!(path = %err.path().display(), error = %err, "unreadable entry");
        self.result.unreadable += 1;
        self.progress.record_error();
        self.observer.on_error(ItemError::from(err));
    }

    fn report_broken_link(&mut self, path: &Path, err: &FsError) {
        self.result.unreadable += 1;
        self.progress.record_error();
        self.observer.on_error(ItemError::new(
            path,
            format!("Broken symlink: {}: {err}", path.display()),
            ErrorKind::NotFound,
        ));
    }
}
