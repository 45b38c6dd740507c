//! Progress counters shared between a worker and its observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// A point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Bytes of completed items.
    pub bytes_done: u64,
    /// Bytes copied so far of the item in flight.
    pub item_bytes_done: u64,
    /// Total bytes to process (grows while counting).
    pub bytes_total: u64,
    /// Items completed successfully.
    pub items_done: u64,
    /// Items skipped, on request or by a pinned answer.
    pub items_skipped: u64,
    /// Items that failed.
    pub items_failed: u64,
    /// Total items to process (grows while counting).
    pub items_total: u64,
    /// Display name of the item in flight.
    pub current_item: String,
    /// Whether totals are still being computed.
    pub counting: bool,
    /// Time since the job started.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Items that reached a terminal state.
    pub fn items_processed(&self) -> u64 {
        self.items_done + self.items_skipped + self.items_failed
    }

    /// Completion in percent, or `None` while totals are unknown.
    pub fn percentage(&self) -> Option<f64> {
        if self.counting {
            return None;
        }
        let ratio = if self.bytes_total > 0 {
            (self.bytes_done + self.item_bytes_done) as f64 / self.bytes_total as f64
        } else {
            self.items_processed() as f64 / self.items_total.max(1) as f64
        };
        Some((ratio * 100.0).min(100.0))
    }

    /// Average transfer rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_done + self.item_bytes_done) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Lock-free progress counters.
///
/// The worker is the only writer. Readers take snapshots at any time
/// without blocking it. Done counters never exceed their totals: adding
/// past a total raises the total.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    bytes_done: AtomicU64,
    item_bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    items_done: AtomicU64,
    items_skipped: AtomicU64,
    items_failed: AtomicU64,
    items_total: AtomicU64,
    counting: AtomicBool,
    current_item: ArcSwap<String>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes_done: AtomicU64::new(0),
            item_bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            items_done: AtomicU64::new(0),
            items_skipped: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            items_total: AtomicU64::new(0),
            counting: AtomicBool::new(false),
            current_item: ArcSwap::from_pointee(String::new()),
        }
    }

    pub fn set_counting(&self, counting: bool) {
        self.counting.store(counting, Ordering::Release);
    }

    pub fn add_totals(&self, items: u64, bytes: u64) {
        self.items_total.fetch_add(items, Ordering::AcqRel);
        self.bytes_total.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn set_current(&self, name: impl Into<String>) {
        self.current_item.store(Arc::new(name.into()));
    }

    /// Bytes of the item in flight.
    pub fn set_item_bytes(&self, bytes: u64) {
        self.item_bytes_done.store(bytes, Ordering::Release);
    }

    /// Mark items as completed together with their bytes.
    pub fn complete(&self, items: u64, bytes: u64) {
        self.item_bytes_done.store(0, Ordering::Release);
        let done = self.bytes_done.load(Ordering::Acquire) + bytes;
        self.bytes_total.fetch_max(done, Ordering::AcqRel);
        self.bytes_done.store(done, Ordering::Release);
        self.bump_items(&self.items_done, items);
    }

    /// Running totals of a traversal, where everything seen counts as done.
    pub fn record_scanned(&self, items: u64, bytes: u64) {
        self.items_total.fetch_max(items, Ordering::AcqRel);
        self.items_done.fetch_max(items, Ordering::AcqRel);
        self.bytes_total.fetch_max(bytes, Ordering::AcqRel);
        self.bytes_done.fetch_max(bytes, Ordering::AcqRel);
    }

    pub fn skip(&self, items: u64) {
        self.item_bytes_done.store(0, Ordering::Release);
        self.bump_items(&self.items_skipped, items);
    }

    pub fn fail(&self, items: u64) {
        self.item_bytes_done.store(0, Ordering::Release);
        self.bump_items(&self.items_failed, items);
    }

    /// Raise the item total first so readers never see more processed
    /// items than the total.
    fn bump_items(&self, counter: &AtomicU64, items: u64) {
        let processed = self.items_done.load(Ordering::Acquire)
            + self.items_skipped.load(Ordering::Acquire)
            + self.items_failed.load(Ordering::Acquire)
            + items;
        self.items_total.fetch_max(processed, Ordering::AcqRel);
        counter.fetch_add(items, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self.bytes_done.load(Ordering::Acquire),
            item_bytes_done: self.item_bytes_done.load(Ordering::Acquire),
            bytes_total: self.bytes_total.load(Ordering::Acquire),
            items_done: self.items_done.load(Ordering::Acquire),
            items_skipped: self.items_skipped.load(Ordering::Acquire),
            items_failed: self.items_failed.load(Ordering::Acquire),
            items_total: self.items_total.load(Ordering::Acquire),
            current_item: self.current_item.load_full().as_ref().clone(),
            counting: self.counting.load(Ordering::Acquire),
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_unknown_while_counting() {
        let tracker = ProgressTracker::new();
        tracker.set_counting(true);
        tracker.add_totals(3, 300);
        assert_eq!(tracker.snapshot().percentage(), None);

        tracker.set_counting(false);
        tracker.complete(1, 150);
        assert_eq!(tracker.snapshot().percentage(), Some(50.0));
    }

    #[test]
    fn test_percentage_without_bytes_uses_items() {
        let tracker = ProgressTracker::new();
        tracker.add_totals(4, 0);
        tracker.complete(1, 0);
        tracker.skip(1);
        assert_eq!(tracker.snapshot().percentage(), Some(50.0));
    }

    #[test]
    fn test_zero_totals_do_not_divide_by_zero() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.snapshot().percentage(), Some(0.0));
    }

    #[test]
    fn test_done_never_exceeds_total() {
        let tracker = ProgressTracker::new();
        tracker.add_totals(1, 10);
        tracker.complete(2, 25);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.bytes_total, 25);
        assert_eq!(snapshot.items_total, 2);
        assert!(snapshot.bytes_done <= snapshot.bytes_total);
    }

    #[test]
    fn test_in_flight_bytes_are_separate() {
        let tracker = ProgressTracker::new();
        tracker.add_totals(1, 100);
        tracker.set_item_bytes(40);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.bytes_done, 0);
        assert_eq!(snapshot.percentage(), Some(40.0));

        tracker.complete(1, 100);
        assert_eq!(tracker.snapshot().item_bytes_done, 0);
    }
}
