//! Job factory holding the services every job needs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_core::{FilesystemPort, JobConfig, LocalFs};
use courier_thumbs::ThumbnailCache;

use crate::deep_count::DeepCountWork;
use crate::delete::DeleteWork;
use crate::error::JobError;
use crate::job::{Job, JobKind, Work};
use crate::transfer::{TransferItem, TransferKind, TransferWork};

/// Creates jobs bound to one filesystem, one configuration and, optionally,
/// one thumbnail cache.
///
/// Cloning is cheap; clones share the filesystem and the cache.
#[derive(Clone)]
pub struct Engine {
    fs: Arc<dyn FilesystemPort>,
    config: JobConfig,
    thumbnails: Option<Arc<ThumbnailCache>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("thumbnails", &self.thumbnails.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(fs: Arc<dyn FilesystemPort>) -> Self {
        Self {
            fs,
            config: JobConfig::default(),
            thumbnails: None,
        }
    }

    /// An engine over the local filesystem and the desktop trash.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalFs::new()))
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep `cache` in sync with everything the jobs move, copy or delete.
    pub fn with_thumbnails(mut self, cache: Arc<ThumbnailCache>) -> Self {
        self.thumbnails = Some(cache);
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn filesystem(&self) -> &Arc<dyn FilesystemPort> {
        &self.fs
    }

    fn job(&self, kind: JobKind, work: Work) -> Job {
        Job::new(
            kind,
            work,
            Arc::clone(&self.fs),
            self.config.clone(),
            self.thumbnails.clone(),
        )
    }

    /// A transfer over an explicit work list, processed in order.
    pub fn transfer(&self, kind: TransferKind, items: Vec<TransferItem>) -> Result<Job, JobError> {
        let work = TransferWork::new(kind, items)?;
        Ok(self.job(JobKind::Transfer(kind), Work::Transfer(work)))
    }

    /// Copy `sources` into `target_dir`.
    pub fn copy(&self, sources: Vec<PathBuf>, target_dir: impl AsRef<Path>) -> Result<Job, JobError> {
        self.transfer(TransferKind::Copy, items_into(sources, target_dir.as_ref()))
    }

    /// Move `sources` into `target_dir`.
    pub fn move_to(
        &self,
        sources: Vec<PathBuf>,
        target_dir: impl AsRef<Path>,
    ) -> Result<Job, JobError> {
        self.transfer(TransferKind::Move, items_into(sources, target_dir.as_ref()))
    }

    /// Create symbolic links to `sources` inside `target_dir`.
    pub fn link(&self, sources: Vec<PathBuf>, target_dir: impl AsRef<Path>) -> Result<Job, JobError> {
        self.transfer(TransferKind::Link, items_into(sources, target_dir.as_ref()))
    }

    /// Move `sources` to the trash.
    pub fn trash(&self, sources: Vec<PathBuf>) -> Result<Job, JobError> {
        let items = sources
            .into_iter()
            .map(|source| {
                let parent = source.parent().map(Path::to_path_buf).unwrap_or_default();
                TransferItem::new(source, parent)
            })
            .collect();
        self.transfer(TransferKind::Trash, items)
    }

    /// Permanently delete `paths` and everything below them.
    pub fn delete(&self, paths: Vec<PathBuf>) -> Result<Job, JobError> {
        let work = DeleteWork::new(paths)?;
        Ok(self.job(JobKind::Delete, Work::Delete(work)))
    }

    /// Count items and bytes below `roots`.
    pub fn deep_count(&self, roots: Vec<PathBuf>) -> Result<Job, JobError> {
        let work = DeepCountWork::new(roots)?;
        Ok(self.job(JobKind::DeepCount, Work::DeepCount(work)))
    }
}

fn items_into(sources: Vec<PathBuf>, target_dir: &Path) -> Vec<TransferItem> {
    sources
        .into_iter()
        .map(|source| TransferItem::new(source, target_dir))
        .collect()
}
