//! Recursive counting of items and bytes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use courier_scan::DeepCounter;

use crate::context::{JobContext, ScanBridge, ScanMode, Stop, WorkResult};
use crate::error::JobError;
use crate::event::{EntryOutcome, EntryState};

pub(crate) struct DeepCountWork {
    roots: Vec<PathBuf>,
}

impl DeepCountWork {
    pub fn new(roots: Vec<PathBuf>) -> Result<Self, JobError> {
        if roots.is_empty() {
            return Err(JobError::EmptyWorkList);
        }
        let mut seen = HashSet::new();
        for root in &roots {
            if !seen.insert(root) {
                return Err(JobError::DuplicateEntry { path: root.clone() });
            }
        }
        Ok(Self { roots })
    }

    pub fn run(self, ctx: &mut JobContext) -> WorkResult {
        let counter = DeepCounter::new(Arc::clone(&ctx.fs)).follow_symlinks(ctx.config.follow_symlinks);
        ctx.progress().set_counting(true);

        let mut bridge = ScanBridge::new(ctx, ScanMode::Count);
        let result = counter
            .count(&self.roots, &mut bridge)
            .map_err(|_| Stop::Cancelled)?;

        tracing::debug!(
            items = result.item_count(),
            bytes = result.total_size,
            "count complete"
        );
        ctx.progress()
            .record_scanned(result.item_count(), result.total_size);
        ctx.progress().set_counting(false);
        ctx.entries = self
            .roots
            .into_iter()
            .map(|root| EntryOutcome {
                source: root,
                destination: None,
                state: EntryState::Done,
            })
            .collect();
        ctx.count = Some(result);
        ctx.report_progress();
        Ok(())
    }
}
