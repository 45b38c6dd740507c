//! Permanent deletion.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use courier_scan::{DeepCounter, ScanNode};

use crate::context::{JobContext, OpError, ScanBridge, ScanMode, Stop, WorkResult};
use crate::error::JobError;
use crate::event::{EntryOutcome, EntryState};

pub(crate) struct DeleteWork {
    paths: Vec<PathBuf>,
}

impl DeleteWork {
    pub fn new(paths: Vec<PathBuf>) -> Result<Self, JobError> {
        if paths.is_empty() {
            return Err(JobError::EmptyWorkList);
        }
        let mut seen = HashSet::new();
        for path in &paths {
            if !seen.insert(path) {
                return Err(JobError::DuplicateEntry { path: path.clone() });
            }
        }
        Ok(Self { paths })
    }

    pub fn run(self, ctx: &mut JobContext) -> WorkResult {
        ctx.entries = self
            .paths
            .iter()
            .map(|path| EntryOutcome {
                source: path.clone(),
                destination: None,
                state: EntryState::Queued,
            })
            .collect();

        ctx.progress().set_counting(true);
        let counter = DeepCounter::new(Arc::clone(&ctx.fs));
        let mut trees = Vec::with_capacity(self.paths.len());
        for (index, path) in self.paths.iter().enumerate() {
            ctx.entries[index].state = EntryState::Counting;
            let mut bridge = ScanBridge::new(ctx, ScanMode::Totals);
            let (tree, _) = counter
                .expand(path, &mut bridge)
                .map_err(|_| Stop::Cancelled)?;
            match &tree {
                Some(tree) => ctx.progress().add_totals(tree.leaf_count(), tree.total_size()),
                None => ctx.progress().fail(1),
            }
            trees.push(tree);
        }
        ctx.progress().set_counting(false);
        ctx.report_progress();

        for (index, tree) in trees.into_iter().enumerate() {
            ctx.checkpoint()?;
            let Some(tree) = tree else {
                ctx.entries[index].state = EntryState::Failed;
                continue;
            };
            ctx.entries[index].state = EntryState::Executing;
            let state = delete_tree(ctx, &tree, true)?;
            ctx.entries[index].state = state;
            ctx.report_progress();
        }
        Ok(())
    }
}

/// Delete `node` and everything below it, children before parents.
///
/// A directory is only removed once all its children are gone. With
/// `count_items` every removed non-directory counts as a completed item.
pub(crate) fn delete_tree(
    ctx: &mut JobContext,
    node: &ScanNode,
    count_items: bool,
) -> WorkResult<EntryState> {
    let mut state = EntryState::Done;
    for child in &node.children {
        ctx.checkpoint()?;
        if delete_tree(ctx, child, count_items)? != EntryState::Done {
            state = EntryState::Failed;
        }
    }
    if state != EntryState::Done {
        return Ok(state);
    }

    if !node.is_dir() {
        ctx.set_current(&node.path);
    }
    let removed = ctx.attempt("Could not delete", None, |ctx| {
        ctx.fs.delete(&node.path).map_err(OpError::from)
    })?;
    if removed.is_none() {
        if count_items && !node.is_dir() {
            ctx.progress().fail(1);
        }
        return Ok(EntryState::Failed);
    }

    tracing::debug!(path = %node.path.display(), "deleted");
    if let Some(thumbnails) = ctx.thumbnails() {
        if node.is_dir() {
            thumbnails.cleanup(&node.path);
        } else {
            thumbnails.on_delete(&node.path);
        }
    }
    if count_items && !node.is_dir() {
        ctx.progress().complete(1, node.size);
        ctx.report_progress_throttled();
    }
    Ok(EntryState::Done)
}
