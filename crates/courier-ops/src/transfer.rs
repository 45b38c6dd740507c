//! Copy, move, link and trash jobs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compact_str::CompactString;
use courier_core::{ErrorKind, FileKind, FilesystemPort, FsError, ItemError, Metadata};
use courier_scan::{DeepCounter, ScanNode};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::context::{display_name, JobContext, OpError, ScanBridge, ScanMode, Stop, WorkResult};
use crate::delete::delete_tree;
use crate::error::JobError;
use crate::event::{EntryOutcome, EntryState};
use crate::question::{unique_name, QuestionKind, Response};

/// The operation a transfer job performs on every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransferKind {
    Copy,
    Move,
    /// Create symbolic links pointing at the sources.
    Link,
    /// Move the sources to the trash; destinations are ignored.
    Trash,
}

impl TransferKind {
    /// Whether entries are written into a destination directory.
    pub fn has_destination(self) -> bool {
        !matches!(self, Self::Trash)
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Copy => "Could not copy",
            Self::Move => "Could not move",
            Self::Link => "Could not link",
            Self::Trash => "Could not trash",
        }
    }
}

/// One entry of a transfer work list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferItem {
    pub source: PathBuf,
    /// Directory the entry is written into.
    pub target_dir: PathBuf,
    /// Desired name inside `target_dir`.
    pub name: CompactString,
}

impl TransferItem {
    /// Keep the source's own name.
    pub fn new(source: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let name = source
            .file_name()
            .map(|n| CompactString::from(n.to_string_lossy()))
            .unwrap_or_default();
        Self {
            source,
            target_dir: target_dir.into(),
            name,
        }
    }

    /// Write the entry under a different name.
    pub fn with_name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    pub fn destination(&self) -> PathBuf {
        self.target_dir.join(self.name.as_str())
    }
}

/// Where an entry goes after conflict resolution.
pub(crate) enum Resolution {
    /// Write to this path, which is free.
    Write(PathBuf),
    /// Write to `dest`, whose previous item was moved to `backup`.
    Replace { dest: PathBuf, backup: PathBuf },
    /// Merge a directory into this existing directory.
    Merge(PathBuf),
    Skip,
    /// Resolution failed; the error has been recorded.
    Fail,
}

pub(crate) struct TransferWork {
    kind: TransferKind,
    items: Vec<TransferItem>,
}

impl TransferWork {
    pub fn new(kind: TransferKind, items: Vec<TransferItem>) -> Result<Self, JobError> {
        if items.is_empty() {
            return Err(JobError::EmptyWorkList);
        }
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item) {
                return Err(JobError::DuplicateEntry {
                    path: item.source.clone(),
                });
            }
        }
        Ok(Self { kind, items })
    }

    pub fn run(self, ctx: &mut JobContext) -> WorkResult {
        let TransferWork { kind, items } = self;
        ctx.entries = items
            .iter()
            .map(|item| EntryOutcome {
                source: item.source.clone(),
                destination: None,
                state: EntryState::Queued,
            })
            .collect();

        let trees = count_entries(ctx, kind, &items)?;
        let usable = prepare_destinations(ctx, kind, &items, &trees)?;

        let mut transfer = Transfer { ctx, kind };
        for (index, (item, tree)) in items.iter().zip(trees).enumerate() {
            transfer.ctx.checkpoint()?;
            let Some(tree) = tree else {
                transfer.set_state(index, EntryState::Failed);
                continue;
            };
            if kind.has_destination() && !usable.contains(&item.target_dir) {
                transfer.ctx.progress().fail(transfer.items_in(&tree));
                transfer.set_state(index, EntryState::Failed);
                continue;
            }
            transfer.process(index, item, &tree)?;
            transfer.ctx.report_progress();
        }
        Ok(())
    }
}

/// Pre-pass: expand every entry and publish the totals before any byte
/// moves. Entries whose source cannot be read yield `None`.
fn count_entries(
    ctx: &mut JobContext,
    kind: TransferKind,
    items: &[TransferItem],
) -> WorkResult<Vec<Option<ScanNode>>> {
    ctx.progress().set_counting(true);
    ctx.report_progress();

    let counter = DeepCounter::new(Arc::clone(&ctx.fs));
    let mut trees = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        ctx.entries[index].state = EntryState::Counting;
        let tree = match kind {
            TransferKind::Copy | TransferKind::Move => {
                let mut bridge = ScanBridge::new(ctx, ScanMode::Totals);
                counter
                    .expand(&item.source, &mut bridge)
                    .map_err(|_| Stop::Cancelled)?
                    .0
            }
            TransferKind::Link | TransferKind::Trash => {
                ctx.checkpoint()?;
                match ctx.fs.stat(&item.source, false) {
                    Ok(metadata) => Some(shallow_node(&item.source, &metadata)),
                    Err(err) => {
                        ctx.record_error(ItemError::from(&err));
                        None
                    }
                }
            }
        };

        match &tree {
            Some(tree) => {
                let items = match kind {
                    TransferKind::Link | TransferKind::Trash => 1,
                    _ => tree.leaf_count(),
                };
                let bytes = match kind {
                    TransferKind::Copy | TransferKind::Move => tree.total_size(),
                    _ => 0,
                };
                ctx.progress().add_totals(items, bytes);
            }
            None => ctx.progress().fail(1),
        }
        trees.push(tree);
    }

    ctx.progress().set_counting(false);
    ctx.report_progress();
    Ok(trees)
}

fn shallow_node(path: &Path, metadata: &Metadata) -> ScanNode {
    ScanNode {
        name: path
            .file_name()
            .map(|n| CompactString::from(n.to_string_lossy()))
            .unwrap_or_default(),
        path: path.to_path_buf(),
        kind: metadata.kind,
        size: metadata.size,
        children: Vec::new(),
    }
}

/// Make sure every destination directory exists and has room. Returns the
/// directories entries may be written into.
fn prepare_destinations(
    ctx: &mut JobContext,
    kind: TransferKind,
    items: &[TransferItem],
    trees: &[Option<ScanNode>],
) -> WorkResult<HashSet<PathBuf>> {
    let mut usable = HashSet::new();
    if !kind.has_destination() {
        return Ok(usable);
    }

    let mut needed: Vec<(PathBuf, u64)> = Vec::new();
    for (item, tree) in items.iter().zip(trees) {
        let bytes = tree.as_ref().map_or(0, ScanNode::total_size);
        match needed.iter_mut().find(|(dir, _)| *dir == item.target_dir) {
            Some((_, total)) => *total += bytes,
            None => needed.push((item.target_dir.clone(), bytes)),
        }
    }

    for (dir, _) in &needed {
        ctx.checkpoint()?;
        if ctx.fs.exists(dir) {
            usable.insert(dir.clone());
            continue;
        }

        let message = format!(
            "The folder “{}” does not exist. Do you want to create it?",
            display_name(dir)
        );
        match ctx.ask(QuestionKind::Create, message, None, Some(dir)) {
            Response::Yes => {
                if create_dir_all(ctx, dir)? {
                    usable.insert(dir.clone());
                }
            }
            _ => {
                ctx.cancel();
                return Err(Stop::Cancelled);
            }
        }
    }

    if kind == TransferKind::Copy && ctx.config.check_free_space {
        for (dir, bytes) in &needed {
            if !usable.contains(dir) {
                continue;
            }
            let free = match ctx.fs.free_space(dir) {
                Ok(free) => free,
                Err(err) => {
                    tracing::debug!(dir = %dir.display(), error = %err, "free space unknown");
                    continue;
                }
            };
            if free >= *bytes {
                continue;
            }

            let message = format!(
                "There is not enough space in “{}”: {bytes} bytes needed, {free} bytes available",
                display_name(dir)
            );
            match ctx.ask(QuestionKind::NoSpace, message, None, Some(dir)) {
                Response::Force => {}
                _ => return Err(Stop::Cancelled),
            }
        }
    }

    Ok(usable)
}

/// Create `dir` and any missing ancestors. Returns whether it exists.
fn create_dir_all(ctx: &mut JobContext, dir: &Path) -> WorkResult<bool> {
    let mut missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !ctx.fs.exists(p))
        .collect();
    missing.reverse();

    for path in missing {
        let created = ctx.attempt("Could not create folder", None, |ctx| {
            match ctx.fs.create_dir(path) {
                Err(FsError::Exists { .. }) => Ok(()),
                other => other.map_err(OpError::from),
            }
        })?;
        if created.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove `path` and everything below it without asking or reporting
/// progress.
fn remove_all(fs: &dyn FilesystemPort, path: &Path) -> Result<(), FsError> {
    if fs.stat(path, false)?.is_dir() {
        for entry in fs.list(path)? {
            remove_all(fs, &entry.path)?;
        }
    }
    fs.delete(path)
}

/// Per-entry execution state of a transfer.
pub(crate) struct Transfer<'a> {
    pub ctx: &'a mut JobContext,
    pub kind: TransferKind,
}

impl Transfer<'_> {
    fn set_state(&mut self, index: usize, state: EntryState) {
        let entry = &mut self.ctx.entries[index];
        tracing::trace!(source = %entry.source.display(), from = %entry.state, to = %state, "entry state");
        entry.state = state;
    }

    /// Items an entry contributes to the totals.
    pub fn items_in(&self, node: &ScanNode) -> u64 {
        match self.kind {
            TransferKind::Link | TransferKind::Trash => 1,
            _ => node.leaf_count(),
        }
    }

    fn process(&mut self, index: usize, item: &TransferItem, tree: &ScanNode) -> WorkResult {
        tracing::debug!(source = %item.source.display(), "processing entry");
        self.set_state(index, EntryState::Resolving);

        if self.kind == TransferKind::Trash {
            self.set_state(index, EntryState::Executing);
            let state = self.trash_entry(tree)?;
            self.set_state(index, state);
            return Ok(());
        }

        let (dest, created, backup) = match self.resolve(tree, item.destination())? {
            Resolution::Write(dest) => (dest, true, None),
            Resolution::Replace { dest, backup } => (dest, true, Some(backup)),
            Resolution::Merge(dest) => (dest, false, None),
            Resolution::Skip => {
                self.ctx.progress().skip(self.items_in(tree));
                self.set_state(index, EntryState::Skipped);
                return Ok(());
            }
            Resolution::Fail => {
                self.ctx.progress().fail(self.items_in(tree));
                self.set_state(index, EntryState::Failed);
                return Ok(());
            }
        };

        self.set_state(index, EntryState::Executing);
        self.ctx.entries[index].destination = Some(dest.clone());
        let root = item.target_dir.as_path();
        let state = match backup {
            Some(backup) => {
                self.replacing(tree, &dest, backup, |t| t.execute(tree, &dest, root))?
            }
            None => self.execute(tree, &dest, root)?,
        };

        if state == EntryState::Done && created {
            self.ctx.new_files.push(dest);
        }
        self.set_state(index, state);
        Ok(())
    }

    fn execute(&mut self, node: &ScanNode, dest: &Path, root: &Path) -> WorkResult<EntryState> {
        match self.kind {
            TransferKind::Copy => self.copy_node(node, dest, root, false),
            TransferKind::Move => self.move_node(node, dest, root),
            _ => self.link_entry(node, dest, root),
        }
    }

    /// Decide where `node` goes when its desired destination is `dest`.
    pub(crate) fn resolve(&mut self, node: &ScanNode, dest: PathBuf) -> WorkResult<Resolution> {
        if dest == node.path {
            return Ok(match self.kind {
                TransferKind::Move => Resolution::Skip,
                _ => {
                    let parent = dest.parent().unwrap_or(Path::new(""));
                    Resolution::Write(unique_name(self.ctx.fs.as_ref(), parent, &node.name))
                }
            });
        }

        if node.is_dir() && self.kind != TransferKind::Link && dest.starts_with(&node.path) {
            self.ctx.record_error(ItemError::new(
                &node.path,
                format!("Cannot {} a folder into itself", self.kind),
                ErrorKind::Internal,
            ));
            return Ok(Resolution::Fail);
        }

        let existing = match self.ctx.fs.stat(&dest, false) {
            Ok(metadata) => metadata,
            Err(_) => return Ok(Resolution::Write(dest)),
        };
        if node.is_dir() && existing.is_dir() && self.kind != TransferKind::Link {
            return Ok(Resolution::Merge(dest));
        }

        let parent = dest.parent().unwrap_or(Path::new("")).to_path_buf();
        let message = format!(
            "“{}” already exists in “{}”. Do you want to replace it?",
            display_name(&dest),
            display_name(&parent)
        );
        match self
            .ctx
            .ask(QuestionKind::Replace, message, Some(&node.path), Some(&dest))
        {
            Response::Replace => {
                if node.path.starts_with(&dest) {
                    self.ctx.record_error(ItemError::new(
                        &dest,
                        "Cannot replace a folder that contains the item",
                        ErrorKind::Exists,
                    ));
                    return Ok(Resolution::Fail);
                }
                match self.set_aside(&dest, &existing)? {
                    Some(backup) => Ok(Resolution::Replace { dest, backup }),
                    None => Ok(Resolution::Fail),
                }
            }
            Response::Rename => {
                let name = display_name(&dest);
                Ok(Resolution::Write(unique_name(self.ctx.fs.as_ref(), &parent, &name)))
            }
            Response::Skip => Ok(Resolution::Skip),
            _ => Err(Stop::Cancelled),
        }
    }

    /// Move the item at `dest` to a hidden sibling so the replacement can be
    /// written. The original is only deleted once the replacement is done.
    fn set_aside(&mut self, dest: &Path, existing: &Metadata) -> WorkResult<Option<PathBuf>> {
        let parent = dest.parent().unwrap_or(Path::new(""));
        let hidden = format!(".{}.replacing", display_name(dest));
        let backup = if self.ctx.fs.exists(&parent.join(&hidden)) {
            unique_name(self.ctx.fs.as_ref(), parent, &hidden)
        } else {
            parent.join(hidden)
        };

        let moved = self.ctx.attempt("Could not replace", None, |ctx| {
            ctx.fs.rename(dest, &backup).map_err(OpError::from)
        })?;
        if moved.is_none() {
            return Ok(None);
        }

        tracing::debug!(path = %dest.display(), backup = %backup.display(), "existing item set aside");
        if let Some(thumbnails) = self.ctx.thumbnails() {
            if existing.is_dir() {
                thumbnails.cleanup(dest);
            } else {
                thumbnails.on_delete(dest);
            }
        }
        Ok(Some(backup))
    }

    /// Run `op`, which writes `node` to `dest`, then settle the item set
    /// aside in `backup`: delete it when the write completed, put it back
    /// otherwise.
    pub(crate) fn replacing(
        &mut self,
        node: &ScanNode,
        dest: &Path,
        backup: PathBuf,
        op: impl FnOnce(&mut Self) -> WorkResult<EntryState>,
    ) -> WorkResult<EntryState> {
        let result = op(self);
        if matches!(result, Ok(EntryState::Done)) {
            if let Err(err) = remove_all(self.ctx.fs.as_ref(), &backup) {
                tracing::warn!(path = %backup.display(), error = %err, "could not remove replaced item");
            }
        } else {
            self.restore(node, dest, &backup);
        }
        result
    }

    /// Put a set-aside item back at `dest` after its replacement failed.
    fn restore(&mut self, node: &ScanNode, dest: &Path, backup: &Path) {
        if self.ctx.fs.exists(dest) {
            // Moved children are gone from the source; dropping them here
            // would lose data.
            if self.kind == TransferKind::Move && node.is_dir() {
                tracing::warn!(path = %dest.display(), backup = %backup.display(), "partial move kept next to replaced item");
                self.ctx.record_error(ItemError::new(
                    dest,
                    format!("The replaced item was kept as “{}”", display_name(backup)),
                    ErrorKind::Exists,
                ));
                return;
            }
            if let Err(err) = remove_all(self.ctx.fs.as_ref(), dest) {
                tracing::warn!(path = %dest.display(), error = %err, "could not remove partial replacement");
            }
        }

        match self.ctx.fs.rename(backup, dest) {
            Ok(()) => tracing::debug!(path = %dest.display(), "replaced item restored"),
            Err(err) => {
                tracing::warn!(path = %backup.display(), error = %err, "could not restore replaced item");
                self.ctx.record_error(ItemError::new(
                    dest,
                    format!("The replaced item was kept as “{}”", display_name(backup)),
                    err.kind(),
                ));
            }
        }
    }

    fn link_entry(&mut self, node: &ScanNode, dest: &Path, root: &Path) -> WorkResult<EntryState> {
        self.ctx.set_current(&node.path);
        let linked = self.ctx.attempt(self.kind.verb(), Some(root), |ctx| {
            ctx.fs.symlink(&node.path, dest).map_err(OpError::from)
        })?;
        if linked.is_none() {
            self.ctx.progress().fail(1);
            return Ok(EntryState::Failed);
        }

        if let Some(thumbnails) = self.ctx.thumbnails() {
            thumbnails.on_copy(&node.path, dest);
        }
        self.ctx.progress().complete(1, 0);
        Ok(EntryState::Done)
    }

    fn trash_entry(&mut self, node: &ScanNode) -> WorkResult<EntryState> {
        self.ctx.set_current(&node.path);
        let trashed = self.ctx.attempt(self.kind.verb(), None, |ctx| {
            match ctx.fs.trash(&node.path) {
                Ok(record) => Ok(Some(record)),
                Err(FsError::Unsupported { .. }) => Ok(None),
                Err(err) => Err(OpError::from(err)),
            }
        })?;

        match trashed {
            Some(Some(record)) => {
                tracing::debug!(path = %node.path.display(), "moved to trash");
                self.ctx.trashed.push(record);
            }
            Some(None) => {
                let state = self.delete_instead(node)?;
                if state != EntryState::Done {
                    return Ok(state);
                }
            }
            None => {
                self.ctx.progress().fail(1);
                return Ok(EntryState::Failed);
            }
        }

        self.forget_thumbnails(node);
        self.ctx.progress().complete(1, 0);
        Ok(EntryState::Done)
    }

    /// The trash refused `node`: offer to delete it permanently.
    fn delete_instead(&mut self, node: &ScanNode) -> WorkResult<EntryState> {
        let message = format!(
            "“{}” cannot be moved to the trash. Do you want to delete it permanently?",
            display_name(&node.path)
        );
        match self
            .ctx
            .ask(QuestionKind::Delete, message, Some(&node.path), None)
        {
            Response::Yes => {}
            Response::No => {
                self.ctx.progress().skip(1);
                return Ok(EntryState::Skipped);
            }
            _ => return Err(Stop::Cancelled),
        }

        let tree = if node.kind == FileKind::Directory {
            let counter = DeepCounter::new(Arc::clone(&self.ctx.fs));
            let mut bridge = ScanBridge::new(self.ctx, ScanMode::Totals);
            counter
                .expand(&node.path, &mut bridge)
                .map_err(|_| Stop::Cancelled)?
                .0
        } else {
            Some(node.clone())
        };

        let state = match tree {
            Some(tree) => delete_tree(self.ctx, &tree, false)?,
            None => EntryState::Failed,
        };
        if state != EntryState::Done {
            self.ctx.progress().fail(1);
            return Ok(EntryState::Failed);
        }
        Ok(EntryState::Done)
    }

    /// Drop cached previews of `node` and everything below it.
    pub fn forget_thumbnails(&self, node: &ScanNode) {
        if let Some(thumbnails) = self.ctx.thumbnails() {
            if node.is_dir() {
                thumbnails.cleanup(&node.path);
            } else {
                thumbnails.on_delete(&node.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_keeps_source_name() {
        let item = TransferItem::new("/src/photo.jpg", "/dst");
        assert_eq!(item.name, "photo.jpg");
        assert_eq!(item.destination(), PathBuf::from("/dst/photo.jpg"));

        let renamed = item.with_name("holiday.jpg");
        assert_eq!(renamed.destination(), PathBuf::from("/dst/holiday.jpg"));
    }

    #[test]
    fn test_work_list_rejects_duplicates() {
        let items = vec![
            TransferItem::new("/src/a", "/dst"),
            TransferItem::new("/src/a", "/dst"),
        ];
        assert!(matches!(
            TransferWork::new(TransferKind::Copy, items),
            Err(JobError::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn test_work_list_rejects_empty() {
        assert!(matches!(
            TransferWork::new(TransferKind::Move, Vec::new()),
            Err(JobError::EmptyWorkList)
        ));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransferKind::Copy.to_string(), "copy");
        assert_eq!(TransferKind::Trash.to_string(), "trash");
        assert!(!TransferKind::Trash.has_destination());
    }
}
