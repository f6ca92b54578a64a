//! Per-tree-position subscription controller
//!
//! One [`SubscriptionController`] exists per expandable tree position. It
//! decides which background task runs next for the position's children so
//! that the live subscription set follows what the user can see:
//!
//! ```text
//!            expand                         collapse
//!   Idle ───────────▶ SubscribeRunning ───────────────▶ SubscribeRunning
//!    ▲ ▲                 │        ▲                     +UnsubscribeWaiting
//!    │ │      done       │        │ expand (clears wait)        │
//!    │ └─────────────────┘        └─────────────────────────────┤
//!    │                                                 done     │
//!    │   done      UnsubscribeRunning ◀─────────────────────────┘
//!    └──────────────────  │   ▲
//!         collapse (Idle)─┘   │ expand observed mid-walk ─▶ SubscribeRunning
//! ```
//!
//! Every decision is taken under the controller's flag lock, so two rapid
//! events can never both see a stale `is_expanded`. The flag lock is never
//! held across network I/O. Task bodies are additionally serialized by a
//! per-controller body lock.
//!
//! Controllers outlive collapse; they are dropped with the tree (disconnect).

use crate::tree::tasks::{SubscriptionTask, TaskKind, TaskOutcome};
use crate::types::{ControllerState, TreePosition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ControllerFlags {
    is_expanded: bool,
    subscribe_running: bool,
    unsubscribe_running: bool,
    unsubscribe_waiting: bool,
    /// Where the last preempted unsubscribe stopped; only set while the
    /// follow-up task it handed off to is running
    resume_from_index: Option<usize>,
}

/// Snapshot of a controller's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub position: TreePosition,
    pub state: ControllerState,
    pub is_expanded: bool,
    pub resume_from_index: Option<usize>,
}

pub struct SubscriptionController {
    position: TreePosition,
    flags: Mutex<ControllerFlags>,
    body_lock: Mutex<()>,
    epoch: AtomicU64,
}

impl SubscriptionController {
    pub fn new(position: TreePosition) -> Self {
        Self {
            position,
            flags: Mutex::new(ControllerFlags::default()),
            body_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn position(&self) -> TreePosition {
        self.position
    }

    fn flags(&self) -> MutexGuard<'_, ControllerFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Held for the whole body of a task
    pub(crate) fn lock_body(&self) -> MutexGuard<'_, ()> {
        self.body_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_expanded(&self) -> bool {
        self.flags().is_expanded
    }

    pub fn state(&self) -> ControllerState {
        Self::state_of(&self.flags())
    }

    fn state_of(f: &ControllerFlags) -> ControllerState {
        if f.subscribe_running && f.unsubscribe_waiting {
            ControllerState::SubscribeRunningUnsubscribeWaiting
        } else if f.subscribe_running {
            ControllerState::SubscribeRunning
        } else if f.unsubscribe_running {
            ControllerState::UnsubscribeRunning
        } else {
            ControllerState::Idle
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let f = self.flags();
        ControllerSnapshot {
            position: self.position,
            state: Self::state_of(&f),
            is_expanded: f.is_expanded,
            resume_from_index: f.resume_from_index,
        }
    }

    fn task(self: &Arc<Self>, kind: TaskKind, start: usize) -> SubscriptionTask {
        SubscriptionTask::new(self.clone(), kind, start, self.epoch())
    }

    /// Handle an expand event; returns the task to enqueue, if any
    pub fn expand(self: &Arc<Self>) -> Option<SubscriptionTask> {
        let mut f = self.flags();
        f.is_expanded = true;
        f.unsubscribe_waiting = false;

        if f.subscribe_running {
            tracing::trace!("{}: expand while subscribing, ignored", self.position);
            return None;
        }
        if f.unsubscribe_running {
            // The unsubscribe task sees the flag and hands off.
            tracing::trace!("{}: expand while unsubscribing, deferred to task", self.position);
            return None;
        }
        f.subscribe_running = true;
        tracing::debug!("{}: Idle -> SubscribeRunning", self.position);
        Some(self.task(TaskKind::Subscribe, 0))
    }

    /// Handle a collapse event; returns the task to enqueue, if any
    pub fn collapse(self: &Arc<Self>) -> Option<SubscriptionTask> {
        let mut f = self.flags();
        f.is_expanded = false;

        if f.subscribe_running {
            f.unsubscribe_waiting = true;
            tracing::debug!("{}: SubscribeRunning -> +UnsubscribeWaiting", self.position);
            return None;
        }
        if f.unsubscribe_running {
            return None;
        }
        f.unsubscribe_running = true;
        tracing::debug!("{}: Idle -> UnsubscribeRunning", self.position);
        Some(self.task(TaskKind::Unsubscribe, 0))
    }

    /// Handle a task's completion; returns the follow-up task, if any
    ///
    /// Runs before the follow-up is enqueued, so the next task for this
    /// controller always observes the decision taken here.
    pub fn finish(self: &Arc<Self>, task: &SubscriptionTask, outcome: &TaskOutcome) -> Option<SubscriptionTask> {
        let mut f = self.flags();
        if task.epoch() != self.epoch() || matches!(outcome, TaskOutcome::Aborted) {
            tracing::debug!("{}: stale {} task finished after reset", self.position, task.kind());
            return None;
        }

        match task.kind() {
            TaskKind::Subscribe => {
                if !f.subscribe_running {
                    Self::invariant_violation(self.position, "subscribe finished but not running");
                    return None;
                }
                f.subscribe_running = false;
                let waiting = std::mem::take(&mut f.unsubscribe_waiting);
                if !f.is_expanded {
                    debug_assert!(waiting, "collapsed without a waiting unsubscribe");
                    f.unsubscribe_running = true;
                    f.resume_from_index = None;
                    tracing::debug!("{}: SubscribeRunning -> UnsubscribeRunning", self.position);
                    return Some(self.task(TaskKind::Unsubscribe, 0));
                }
                // Any finished subscribe walk supersedes the hand-off index.
                f.resume_from_index = None;
                tracing::debug!("{}: SubscribeRunning -> Idle", self.position);
                None
            }
            TaskKind::Unsubscribe => {
                if !f.unsubscribe_running {
                    Self::invariant_violation(self.position, "unsubscribe finished but not running");
                    return None;
                }
                f.unsubscribe_running = false;
                if let TaskOutcome::Preempted { index } = *outcome {
                    f.resume_from_index = Some(index);
                    if !f.is_expanded {
                        // Collapsed again before the hand-off: keep unsubscribing.
                        f.unsubscribe_running = true;
                        return Some(self.task(TaskKind::Unsubscribe, index));
                    }
                }
                if f.is_expanded {
                    f.subscribe_running = true;
                    tracing::debug!("{}: UnsubscribeRunning -> SubscribeRunning", self.position);
                    return Some(self.task(TaskKind::Subscribe, 0));
                }
                f.resume_from_index = None;
                tracing::debug!("{}: UnsubscribeRunning -> Idle", self.position);
                None
            }
        }
    }

    /// Forget all flags and invalidate in-flight tasks (session teardown)
    pub fn reset(&self) {
        let mut f = self.flags();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *f = ControllerFlags::default();
    }

    fn invariant_violation(position: TreePosition, what: &str) {
        tracing::error!("{}: controller invariant violated: {}", position, what);
        debug_assert!(false, "{}: {}", position, what);
    }
}

impl std::fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("position", &self.position)
            .field("state", &self.state())
            .finish()
    }
}

/// Map from tree position to its controller, created lazily on first expand
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: Mutex<HashMap<TreePosition, Arc<SubscriptionController>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TreePosition, Arc<SubscriptionController>>> {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create(&self, position: TreePosition) -> Arc<SubscriptionController> {
        self.lock()
            .entry(position)
            .or_insert_with(|| Arc::new(SubscriptionController::new(position)))
            .clone()
    }

    pub fn get(&self, position: TreePosition) -> Option<Arc<SubscriptionController>> {
        self.lock().get(&position).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Controllers that still have a task running or queued
    pub fn busy(&self) -> Vec<ControllerSnapshot> {
        self.lock()
            .values()
            .map(|c| c.snapshot())
            .filter(|s| s.state != ControllerState::Idle)
            .collect()
    }

    /// Reset every controller and drop them all (tree cleared)
    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, c)| c).collect();
        for controller in drained {
            controller.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaBrowserError;

    fn controller() -> Arc<SubscriptionController> {
        Arc::new(SubscriptionController::new(TreePosition(1)))
    }

    #[test]
    fn test_expand_from_idle_starts_subscribe() {
        let c = controller();
        let task = c.expand().unwrap();
        assert_eq!(task.kind(), TaskKind::Subscribe);
        assert_eq!(task.start(), 0);
        assert_eq!(c.state(), ControllerState::SubscribeRunning);
        assert!(c.is_expanded());

        assert!(c.finish(&task, &TaskOutcome::Completed).is_none());
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_duplicate_expand_is_ignored() {
        let c = controller();
        let _task = c.expand().unwrap();
        assert!(c.expand().is_none());
        assert_eq!(c.state(), ControllerState::SubscribeRunning);
    }

    #[test]
    fn test_collapse_during_subscribe_waits() {
        let c = controller();
        let task = c.expand().unwrap();
        assert!(c.collapse().is_none());
        assert_eq!(c.state(), ControllerState::SubscribeRunningUnsubscribeWaiting);

        let next = c.finish(&task, &TaskOutcome::Completed).unwrap();
        assert_eq!(next.kind(), TaskKind::Unsubscribe);
        assert_eq!(next.start(), 0);
        assert_eq!(c.state(), ControllerState::UnsubscribeRunning);

        assert!(c.finish(&next, &TaskOutcome::Completed).is_none());
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_collapse_then_expand_during_subscribe_cancels_out() {
        let c = controller();
        let task = c.expand().unwrap();
        c.collapse();
        assert!(c.expand().is_none());
        assert_eq!(c.state(), ControllerState::SubscribeRunning);
        assert!(c.finish(&task, &TaskOutcome::Completed).is_none());
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_expand_during_unsubscribe_hands_off() {
        let c = controller();
        let task = c.expand().unwrap();
        c.finish(&task, &TaskOutcome::Completed);

        let unsub = c.collapse().unwrap();
        assert_eq!(unsub.kind(), TaskKind::Unsubscribe);
        assert!(c.expand().is_none());
        assert_eq!(c.state(), ControllerState::UnsubscribeRunning);

        let next = c.finish(&unsub, &TaskOutcome::Preempted { index: 2 }).unwrap();
        assert_eq!(next.kind(), TaskKind::Subscribe);
        assert_eq!(next.start(), 0);
        assert_eq!(c.snapshot().resume_from_index, Some(2));
        assert_eq!(c.state(), ControllerState::SubscribeRunning);
    }

    #[test]
    fn test_preempted_then_collapsed_resumes_unsubscribe() {
        let c = controller();
        let unsub = c.collapse().unwrap();
        c.expand();
        c.collapse();

        let next = c.finish(&unsub, &TaskOutcome::Preempted { index: 1 }).unwrap();
        assert_eq!(next.kind(), TaskKind::Unsubscribe);
        assert_eq!(next.start(), 1);
    }

    #[test]
    fn test_unsubscribe_completed_while_expanded_resubscribes() {
        let c = controller();
        let unsub = c.collapse().unwrap();
        c.expand();
        // The task walked past its last check before seeing the flag.
        let next = c.finish(&unsub, &TaskOutcome::Completed).unwrap();
        assert_eq!(next.kind(), TaskKind::Subscribe);
    }

    #[test]
    fn test_halted_subscribe_returns_to_idle() {
        let c = controller();
        let task = c.expand().unwrap();
        let outcome = TaskOutcome::Halted {
            index: 1,
            error: UaBrowserError::protocol("BadTimeout", "slow").to_string(),
        };
        assert!(c.finish(&task, &outcome).is_none());
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_halted_subscribe_after_hand_off_clears_resume_index() {
        let c = controller();
        let unsub = c.collapse().unwrap();
        c.expand();
        let sub = c.finish(&unsub, &TaskOutcome::Preempted { index: 2 }).unwrap();
        assert_eq!(c.snapshot().resume_from_index, Some(2));

        let outcome = TaskOutcome::Halted {
            index: 0,
            error: UaBrowserError::protocol("BadTimeout", "slow").to_string(),
        };
        assert!(c.finish(&sub, &outcome).is_none());
        assert_eq!(c.state(), ControllerState::Idle);
        assert_eq!(c.snapshot().resume_from_index, None);
    }

    #[test]
    fn test_reset_invalidates_in_flight_tasks() {
        let c = controller();
        let task = c.expand().unwrap();
        c.reset();
        assert_eq!(c.state(), ControllerState::Idle);
        assert!(!c.is_expanded());
        assert!(c.finish(&task, &TaskOutcome::Completed).is_none());
        assert_eq!(c.state(), ControllerState::Idle);

        // A fresh expand after reset works normally.
        assert!(c.expand().is_some());
    }

    #[test]
    fn test_registry_creates_lazily_and_clears() {
        let registry = ControllerRegistry::new();
        assert!(registry.get(TreePosition(4)).is_none());
        let a = registry.get_or_create(TreePosition(4));
        let b = registry.get_or_create(TreePosition(4));
        assert!(Arc::ptr_eq(&a, &b));

        let _task = a.expand();
        assert_eq!(registry.busy().len(), 1);
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(a.state(), ControllerState::Idle);
    }
}
