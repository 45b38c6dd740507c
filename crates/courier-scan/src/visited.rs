//! Inode tracking so every reachable entry is visited once.

use courier_core::InodeInfo;
use dashmap::DashSet;

/// Set of (inode, device) pairs already visited by a traversal.
///
/// Only needed when symlinks are followed: a followed link can lead back
/// into an ancestor directory or to a file that is also reachable through
/// its real path.
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: DashSet<InodeInfo>,
}

impl VisitedSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Mark an inode as visited. Returns `true` on the first visit only.
    pub fn first_visit(&self, info: InodeInfo) -> bool {
        self.seen.insert(info)
    }

    /// Number of distinct inodes visited.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if nothing was visited yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
