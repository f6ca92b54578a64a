//! Expand-all: breadth-first subtree expansion on a worker thread
//!
//! Starting from a row, every descendant that has children is fetched and
//! expanded, which in turn subscribes its children through the normal
//! controller path. A walk stops early when it is cancelled explicitly or
//! when its starting row is collapsed. At most one walk per row runs at a
//! time.

use crate::backend::client_trait::UaClient;
use crate::error::Result;
use crate::tree::model::{ChildSource, LiveTree};
use crate::types::TreePosition;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Result of one expand-all walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandAllSummary {
    pub root: TreePosition,
    /// Rows expanded by the walk, the root included
    pub expanded: usize,
    pub cancelled: bool,
}

/// Bookkeeping of running walks, keyed by starting row
#[derive(Debug, Default)]
pub struct ExpandAllTracker {
    running: Mutex<HashMap<TreePosition, u64>>,
    next_token: AtomicU64,
}

impl ExpandAllTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TreePosition, u64>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `root` for a new walk; None if one is already running
    pub fn begin(&self, root: TreePosition) -> Option<u64> {
        let mut running = self.lock();
        if running.contains_key(&root) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        running.insert(root, token);
        Some(token)
    }

    /// Stop the walk started at `root`, if any
    pub fn cancel(&self, root: TreePosition) -> bool {
        self.lock().remove(&root).is_some()
    }

    pub fn cancel_all(&self) {
        self.lock().clear();
    }

    pub fn is_active(&self, root: TreePosition, token: u64) -> bool {
        self.lock().get(&root) == Some(&token)
    }

    /// Release `root` if the walk identified by `token` still owns it
    pub fn finish(&self, root: TreePosition, token: u64) {
        let mut running = self.lock();
        if running.get(&root) == Some(&token) {
            running.remove(&root);
        }
    }

    pub fn running(&self) -> Vec<TreePosition> {
        let mut roots: Vec<_> = self.lock().keys().copied().collect();
        roots.sort();
        roots
    }
}

/// Walk the subtree below `root`, calling `expand` for each branch
///
/// `expand` is called for the root first, then for every descendant that has
/// children, in breadth-first order. The caller owns `token` (from
/// [`ExpandAllTracker::begin`]) and must call [`ExpandAllTracker::finish`].
pub fn expand_subtree(
    root: TreePosition,
    token: u64,
    tracker: &ExpandAllTracker,
    tree: &LiveTree,
    client: &dyn UaClient,
    expand: &mut dyn FnMut(TreePosition),
) -> Result<ExpandAllSummary> {
    let mut summary = ExpandAllSummary {
        root,
        expanded: 0,
        cancelled: false,
    };

    tree.fetch_more(root, client)?;
    expand(root);
    summary.expanded += 1;

    let mut queue = VecDeque::from([root]);
    while let Some(position) = queue.pop_front() {
        for (child, _) in tree.children_of(position)? {
            if !tracker.is_active(root, token) {
                tracing::info!("Expand-all from {} cancelled after {} rows", root, summary.expanded);
                summary.cancelled = true;
                return Ok(summary);
            }
            tree.fetch_more(child, client)?;
            if tree.children_of(child)?.is_empty() {
                continue;
            }
            expand(child);
            summary.expanded += 1;
            queue.push_back(child);
        }
    }

    tracing::debug!("Expand-all from {} expanded {} rows", root, summary.expanded);
    Ok(summary)
}
