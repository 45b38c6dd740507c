//! Moving entries: rename first, copy then delete across filesystems.

use std::path::Path;

use courier_core::FsError;
use courier_scan::ScanNode;

use crate::context::{OpError, WorkResult};
use crate::event::EntryState;
use crate::transfer::{Resolution, Transfer};

/// Outcome of the rename attempt.
enum Renamed {
    Done,
    /// Source and destination live on different filesystems.
    CrossDevice,
}

impl Transfer<'_> {
    /// Move `node` to the already resolved `dest`.
    ///
    /// A directory landing on an existing directory is merged child by
    /// child; the source directory goes away only once it is empty.
    pub(crate) fn move_node(
        &mut self,
        node: &ScanNode,
        dest: &Path,
        root: &Path,
    ) -> WorkResult<EntryState> {
        let merge = node.is_dir()
            && self
                .ctx
                .fs
                .stat(dest, false)
                .is_ok_and(|metadata| metadata.is_dir());
        if merge {
            return self.merge_dir(node, dest, root);
        }

        self.ctx.set_current(&node.path);
        let renamed = self.ctx.attempt("Could not move", Some(root), |ctx| {
            match ctx.fs.rename(&node.path, dest) {
                Ok(()) => Ok(Renamed::Done),
                Err(FsError::CrossDevice { .. }) => Ok(Renamed::CrossDevice),
                Err(err) => Err(OpError::from(err)),
            }
        })?;

        match renamed {
            Some(Renamed::Done) => {
                tracing::debug!(from = %node.path.display(), to = %dest.display(), "renamed");
                if let Some(thumbnails) = self.ctx.thumbnails() {
                    thumbnails.on_move(&node.path, dest);
                }
                self.ctx
                    .progress()
                    .complete(node.leaf_count(), node.total_size());
                self.ctx.report_progress_throttled();
                Ok(EntryState::Done)
            }
            Some(Renamed::CrossDevice) => {
                tracing::debug!(from = %node.path.display(), "crossing filesystems, copying instead");
                self.copy_node(node, dest, root, true)
            }
            None => {
                self.ctx.progress().fail(node.leaf_count());
                Ok(EntryState::Failed)
            }
        }
    }

    fn merge_dir(&mut self, node: &ScanNode, dest: &Path, root: &Path) -> WorkResult<EntryState> {
        let mut state = EntryState::Done;
        for child in &node.children {
            self.ctx.checkpoint()?;
            let child_state = match self.resolve(child, dest.join(child.name.as_str()))? {
                Resolution::Write(child_dest) | Resolution::Merge(child_dest) => {
                    self.move_node(child, &child_dest, root)?
                }
                Resolution::Replace { dest: child_dest, backup } => {
                    self.replacing(child, &child_dest, backup, |t| {
                        t.move_node(child, &child_dest, root)
                    })?
                }
                Resolution::Skip => {
                    self.ctx.progress().skip(child.leaf_count());
                    EntryState::Skipped
                }
                Resolution::Fail => {
                    self.ctx.progress().fail(child.leaf_count());
                    EntryState::Failed
                }
            };
            if child_state == EntryState::Failed {
                state = EntryState::Failed;
            }
        }

        self.remove_source_dir(&node.path);
        Ok(state)
    }
}
