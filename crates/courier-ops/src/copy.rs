//! Chunked copying of files and trees.

use std::path::Path;

use courier_core::{ErrorKind, FileKind, FsError, ItemError};
use courier_scan::ScanNode;

use crate::context::{display_name, JobContext, OpError, WorkResult};
use crate::event::EntryState;
use crate::transfer::{Resolution, Transfer};

/// Copy `src` to `dst` chunk by chunk, observing cancellation and pause
/// between chunks.
///
/// A destination left behind by a failed or cancelled copy is removed, so
/// `dst` either holds the complete file or nothing.
pub(crate) fn copy_file(ctx: &mut JobContext, src: &Path, dst: &Path) -> Result<u64, OpError> {
    let chunk = ctx.config.chunk_size;
    let mut offset = 0u64;

    let result = loop {
        if ctx.checkpoint().is_err() {
            break Err(OpError::Cancelled);
        }
        match ctx.fs.copy_chunk(src, dst, offset, chunk) {
            Ok(0) => break Ok(offset),
            Ok(written) => {
                offset += written;
                ctx.progress().set_item_bytes(offset);
                ctx.report_progress_throttled();
            }
            Err(err) => break Err(OpError::Fs(err)),
        }
    };

    match result {
        Ok(bytes) => {
            if let Err(err) = ctx.fs.copy_attributes(src, dst) {
                tracing::debug!(path = %dst.display(), error = %err, "could not copy attributes");
            }
            Ok(bytes)
        }
        Err(err) => {
            ctx.progress().set_item_bytes(0);
            discard_partial(ctx, dst);
            Err(err)
        }
    }
}

fn discard_partial(ctx: &JobContext, dst: &Path) {
    match ctx.fs.delete(dst) {
        Ok(()) => tracing::debug!(path = %dst.display(), "removed partial copy"),
        Err(FsError::NotFound { .. }) => {}
        Err(err) => tracing::warn!(path = %dst.display(), error = %err, "could not remove partial copy"),
    }
}

impl Transfer<'_> {
    /// Copy `node` to the already resolved `dest`.
    ///
    /// With `remove_source` every source entry is deleted once its copy is
    /// complete, which turns this into a cross-device move.
    pub(crate) fn copy_node(
        &mut self,
        node: &ScanNode,
        dest: &Path,
        root: &Path,
        remove_source: bool,
    ) -> WorkResult<EntryState> {
        match node.kind {
            FileKind::Directory => self.copy_dir(node, dest, root, remove_source),
            FileKind::Symlink => self.copy_leaf(node, dest, root, remove_source, |ctx| {
                let target = ctx.fs.read_link(&node.path)?;
                ctx.fs.symlink(&target, dest)?;
                Ok(node.size)
            }),
            FileKind::File => self.copy_leaf(node, dest, root, remove_source, |ctx| {
                copy_file(ctx, &node.path, dest)
            }),
            FileKind::Other => Ok(self.refuse_special(node)),
        }
    }

    /// Pipes, sockets and device nodes have no content worth streaming and
    /// may block or never end when read, so they are reported and left alone.
    fn refuse_special(&mut self, node: &ScanNode) -> EntryState {
        self.ctx.set_current(&node.path);
        tracing::debug!(path = %node.path.display(), "not copying special file");
        self.ctx.record_error(ItemError::new(
            &node.path,
            format!("Cannot copy special file “{}”", display_name(&node.path)),
            ErrorKind::Unsupported,
        ));
        self.ctx.progress().fail(1);
        EntryState::Failed
    }

    fn copy_leaf(
        &mut self,
        node: &ScanNode,
        dest: &Path,
        root: &Path,
        remove_source: bool,
        op: impl FnMut(&mut JobContext) -> Result<u64, OpError>,
    ) -> WorkResult<EntryState> {
        self.ctx.set_current(&node.path);
        let verb = if remove_source { "Could not move" } else { "Could not copy" };
        let Some(bytes) = self.ctx.attempt(verb, Some(root), op)? else {
            self.ctx.progress().fail(1);
            return Ok(EntryState::Failed);
        };

        if remove_source {
            // The copy is complete, so losing the source is now safe.
            let removed = self.ctx.attempt("Could not remove source", None, |ctx| {
                ctx.fs.delete(&node.path).map_err(OpError::from)
            })?;
            if removed.is_none() {
                self.ctx.progress().fail(1);
                return Ok(EntryState::Failed);
            }
        }

        if let Some(thumbnails) = self.ctx.thumbnails() {
            if remove_source {
                thumbnails.on_move(&node.path, dest);
            } else {
                thumbnails.on_copy(&node.path, dest);
            }
        }
        self.ctx.progress().complete(1, bytes);
        self.ctx.report_progress_throttled();
        Ok(EntryState::Done)
    }

    fn copy_dir(
        &mut self,
        node: &ScanNode,
        dest: &Path,
        root: &Path,
        remove_source: bool,
    ) -> WorkResult<EntryState> {
        if !self.ctx.fs.exists(dest) {
            let created = self.ctx.attempt("Could not create folder", Some(root), |ctx| {
                ctx.fs.create_dir(dest).map_err(OpError::from)
            })?;
            if created.is_none() {
                self.ctx.progress().fail(node.leaf_count());
                return Ok(EntryState::Failed);
            }
        }

        let mut state = EntryState::Done;
        for child in &node.children {
            self.ctx.checkpoint()?;
            let child_state = match self.resolve(child, dest.join(child.name.as_str()))? {
                Resolution::Write(child_dest) | Resolution::Merge(child_dest) => {
                    self.copy_node(child, &child_dest, root, remove_source)?
                }
                Resolution::Replace { dest: child_dest, backup } => {
                    self.replacing(child, &child_dest, backup, |t| {
                        t.copy_node(child, &child_dest, root, remove_source)
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

        if let Err(err) = self.ctx.fs.copy_attributes(&node.path, dest) {
            tracing::debug!(path = %dest.display(), error = %err, "could not copy folder attributes");
        }
        if remove_source {
            self.remove_source_dir(&node.path);
        }
        Ok(state)
    }

    /// Remove a source directory whose children have all been moved away.
    /// Anything skipped keeps it alive.
    pub(crate) fn remove_source_dir(&mut self, path: &Path) {
        match self.ctx.fs.delete(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed moved folder"),
            Err(err) => tracing::debug!(path = %path.display(), error = %err, "source folder kept"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_core::{JobConfig, LocalFs};

    use super::*;
    use crate::context::Shared;

    fn context(chunk_size: u64) -> JobContext {
        let config = JobConfig::builder().chunk_size(chunk_size).build().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        JobContext::new(
            Arc::new(LocalFs::new()),
            config,
            None,
            Arc::new(Shared::new()),
            tx,
        )
    }

    #[test]
    fn test_copy_file_in_small_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let mut ctx = context(512);
        let copied = copy_file(&mut ctx, &src, &dst).unwrap();

        assert_eq!(copied, 5000);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn test_copy_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty");
        std::fs::write(&src, b"").unwrap();

        let mut ctx = context(512);
        assert_eq!(copy_file(&mut ctx, &src, &dir.path().join("copy")).unwrap(), 0);
        assert!(dir.path().join("copy").exists());
    }

    #[test]
    fn test_cancelled_copy_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, vec![1u8; 4096]).unwrap();

        let mut ctx = context(512);
        ctx.cancel();
        assert!(matches!(
            copy_file(&mut ctx, &src, &dst),
            Err(OpError::Cancelled)
        ));
        assert!(!dst.exists());
    }
}
