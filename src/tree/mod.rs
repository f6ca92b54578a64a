//! Live tree and the expand/collapse-driven subscription lifecycle
//!
//! # Components
//!
//! - [`LiveTree`] - Local mirror of the server's node hierarchy
//! - [`SignalTable`] - Per-node notification channels for UI consumers
//! - [`DataChangeDispatcher`] - Routes client notifications onto node signals
//! - [`DataChangeSubscriptionSet`] - At-most-one monitored item per node
//! - [`SubscriptionController`] - Per-row state machine deciding the next task
//! - [`SubscriptionTask`] - Subscribe/unsubscribe walk over a row's children
//! - [`EventSubscriptionSet`] - User-requested event subscriptions, one per node
//!
//! Expanding a row subscribes its visible children; collapsing it
//! unsubscribes them. Controllers only decide and enqueue; the walks run on
//! the worker pool in [`crate::backend`].

pub mod controller;
pub mod description;
pub mod dispatcher;
pub mod event_set;
pub mod model;
pub mod recursive_expand;
pub mod signals;
pub mod subscription_set;
pub mod tasks;

pub use controller::{ControllerRegistry, ControllerSnapshot, SubscriptionController};
pub use description::{data_type_to_string, load_description, NodeDescription};
pub use dispatcher::DataChangeDispatcher;
pub use event_set::EventSubscriptionSet;
pub use model::{ChildSource, LiveTree, TreeItem};
pub use recursive_expand::{expand_subtree, ExpandAllSummary, ExpandAllTracker};
pub use signals::{NodeSignal, SignalTable, DEFAULT_SIGNAL_CAPACITY};
pub use subscription_set::{DataChangeSubscriptionSet, SubscriptionStats};
pub use tasks::{SubscriptionTask, TaskContext, TaskFailure, TaskKind, TaskOutcome};
