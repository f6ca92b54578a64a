//! Subscribe and unsubscribe walks over a position's children
//!
//! A [`SubscriptionTask`] is created by a [`SubscriptionController`] and run
//! on a worker thread. It walks the children of the controller's position in
//! display order, starting at `start`, and calls into the shared
//! [`DataChangeSubscriptionSet`] for each one.
//!
//! - A not-monitorable child is skipped; the walk goes on.
//! - Any other error halts the walk and is reported in the outcome.
//! - An unsubscribe walk checks the controller's expanded flag before every
//!   child and stops with [`TaskOutcome::Preempted`] once the user has
//!   re-expanded, leaving the remaining children subscribed.
//! - A walk whose controller was reset (disconnect) stops silently.

use crate::tree::controller::SubscriptionController;
use crate::tree::model::ChildSource;
use crate::tree::subscription_set::DataChangeSubscriptionSet;
use crate::types::{NodeId, TreePosition};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Subscribe => write!(f, "subscribe"),
            TaskKind::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// How a walk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every child from `start` on was processed
    Completed,
    /// A non-ignorable error stopped the walk at child `index`
    Halted { index: usize, error: String },
    /// Unsubscribe stopped before child `index` because the row was re-expanded
    Preempted { index: usize },
    /// The controller was reset while the task ran
    Aborted,
}

/// A failed walk, reported to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub position: TreePosition,
    pub kind: TaskKind,
    pub node: Option<NodeId>,
    pub error: String,
}

/// Shared resources a walk needs
#[derive(Clone)]
pub struct TaskContext {
    pub children: Arc<dyn ChildSource>,
    pub subscriptions: Arc<DataChangeSubscriptionSet>,
}

#[derive(Debug)]
pub struct SubscriptionTask {
    controller: Arc<SubscriptionController>,
    kind: TaskKind,
    start: usize,
    epoch: u64,
}

impl SubscriptionTask {
    pub(crate) fn new(controller: Arc<SubscriptionController>, kind: TaskKind, start: usize, epoch: u64) -> Self {
        Self {
            controller,
            kind,
            start,
            epoch,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// First child index this walk processes
    pub fn start(&self) -> usize {
        self.start
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn controller(&self) -> &Arc<SubscriptionController> {
        &self.controller
    }

    pub fn position(&self) -> TreePosition {
        self.controller.position()
    }

    fn stale(&self) -> bool {
        self.controller.epoch() != self.epoch
    }

    /// Run the walk to its end on the calling thread
    pub fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        let _body = self.controller.lock_body();
        // Read before the epoch check: a reset bumps the epoch before it
        // clears the set, so a fresh epoch implies this generation is current.
        let generation = ctx.subscriptions.generation();
        if self.stale() {
            return TaskOutcome::Aborted;
        }

        let position = self.position();
        let children = match ctx.children.children_of(position) {
            Ok(children) => children,
            Err(e) => {
                tracing::error!("{} task for {} could not list children: {}", self.kind, position, e);
                return TaskOutcome::Halted {
                    index: self.start,
                    error: e.to_string(),
                };
            }
        };
        tracing::debug!(
            "{} task for {} started at {} of {}",
            self.kind,
            position,
            self.start,
            children.len()
        );

        for (index, (_, node)) in children.iter().enumerate().skip(self.start) {
            if self.stale() {
                tracing::debug!("{} task for {} aborted at {}", self.kind, position, index);
                return TaskOutcome::Aborted;
            }
            let result = match self.kind {
                TaskKind::Subscribe => ctx.subscriptions.subscribe_in(node, generation),
                TaskKind::Unsubscribe => {
                    if self.controller.is_expanded() {
                        tracing::debug!("{} re-expanded, unsubscribe stops at {}", position, index);
                        return TaskOutcome::Preempted { index };
                    }
                    ctx.subscriptions.unsubscribe_in(node, generation)
                }
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_ignorable() => {
                    tracing::trace!("{}: {}", node, e);
                }
                Err(e) => {
                    tracing::error!("{} of {} failed, halting walk for {}: {}", self.kind, node, position, e);
                    return TaskOutcome::Halted {
                        index,
                        error: e.to_string(),
                    };
                }
            }
        }
        TaskOutcome::Completed
    }

    /// Describe a halted outcome for the UI
    pub fn failure(&self, outcome: &TaskOutcome, ctx: &TaskContext) -> Option<TaskFailure> {
        match outcome {
            TaskOutcome::Halted { index, error } => {
                let node = ctx
                    .children
                    .children_of(self.position())
                    .ok()
                    .and_then(|c| c.get(*index).map(|(_, n)| n.clone()));
                Some(TaskFailure {
                    position: self.position(),
                    kind: self.kind,
                    node,
                    error: error.clone(),
                })
            }
            _ => None,
        }
    }
}
