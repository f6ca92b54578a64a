//! Backend module: protocol client seam, worker pool and session façade
//!
//! The UI talks to a [`BrowserSession`]. Every call returns immediately;
//! network work is queued on the [`WorkerPool`] and results come back as
//! [`UiEvent`]s on the [`UiReceiver`], or as live values on per-node
//! notification channels.
//!
//! # Components
//!
//! - [`UaClient`] - Trait over the OPC-UA client library
//! - [`MockClientBackend`] - In-memory server for tests and the demo binary
//!   (feature-gated)
//! - [`WorkerPool`] - Threads running subscription walks and attribute reads
//! - [`BrowserSession`] - Owns the tree, the subscription set and the
//!   controllers for one connection
//!
//! # Example
//!
//! ```ignore
//! use uabrowser::backend::{BrowserSession, MockClientBackend, MockAddressSpace, UiEvent};
//! use uabrowser::config::AppConfig;
//!
//! let client = Arc::new(MockClientBackend::new(MockAddressSpace::demo()));
//! let (session, ui) = BrowserSession::new(client, &AppConfig::default())?;
//!
//! let root = session.connect("opc.tcp://localhost:4840")?;
//! session.fetch_more(root)?;
//! session.on_tree_expanded(root);
//!
//! for event in ui.drain() {
//!     if let UiEvent::SubscriptionError(failure) = event {
//!         eprintln!("{}", failure.error);
//!     }
//! }
//! ```

pub mod client_trait;
#[cfg(feature = "mock-client")]
pub mod mock_client;
pub mod worker;

pub use client_trait::{DataChangeHandler, EventHandler, NodeHandle, UaClient};
#[cfg(feature = "mock-client")]
pub use mock_client::{MockAddressSpace, MockCall, MockClientBackend, MockDataPattern, MockFault};
pub use worker::{Job, JobHandler, JobQueue, WorkerPool, WorkerStats};

use crate::config::{AppConfig, AppState};
use crate::error::{Result, ResultExt, UaBrowserError};
use crate::tree::{
    expand_subtree, load_description, ChildSource, ControllerRegistry, DataChangeDispatcher,
    DataChangeSubscriptionSet, EventSubscriptionSet, ExpandAllSummary, ExpandAllTracker, LiveTree,
    NodeDescription, SignalTable, SubscriptionStats, TaskContext, TaskFailure,
};
use crate::types::{
    ConnectionStatus, ControllerState, DataChangeNotification, EventNotification, NodeId,
    TreePosition,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Message sent from the session to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Connection status changed
    ConnectionStatus(ConnectionStatus),
    /// A subscribe/unsubscribe walk halted on a protocol error
    SubscriptionError(TaskFailure),
    /// Description and data-type columns of a row are ready
    DescriptionLoaded(NodeDescription),
    /// An expand-all walk ended
    ExpandAllFinished(ExpandAllSummary),
    /// A node with an event subscription raised an event
    EventFired(EventNotification),
    /// Creating or deleting an event subscription failed
    EventSubscriptionFailed { node: NodeId, error: String },
}

/// UI-side handle for receiving session events
pub struct UiReceiver {
    receiver: Receiver<UiEvent>,
    dropped: Arc<AtomicU64>,
}

impl UiReceiver {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<UiEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UiEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain all pending events
    pub fn drain(&self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Events discarded because the UI fell behind
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Non-blocking sending half of the UI event channel
struct UiSender {
    events: Sender<UiEvent>,
    dropped: Arc<AtomicU64>,
}

impl UiSender {
    /// Send to the UI without blocking a worker
    fn send(&self, event: UiEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::warn!("UI event channel full, {} events dropped so far", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("UI receiver gone, event discarded");
            }
        }
    }
}

impl EventHandler for UiSender {
    fn event_notification(&self, event: EventNotification) {
        self.send(UiEvent::EventFired(event));
    }
}

/// Shared state the worker threads operate on
struct SessionCore {
    client: Arc<dyn UaClient>,
    tree: Arc<LiveTree>,
    signals: Arc<SignalTable>,
    dispatcher: Arc<DataChangeDispatcher>,
    subscriptions: Arc<DataChangeSubscriptionSet>,
    events: EventSubscriptionSet,
    controllers: ControllerRegistry,
    expansions: ExpandAllTracker,
    described: Mutex<HashSet<NodeId>>,
    task_context: TaskContext,
    status: Mutex<ConnectionStatus>,
    ui: Arc<UiSender>,
}

impl SessionCore {
    fn send_event(&self, event: UiEvent) {
        self.ui.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
        self.send_event(UiEvent::ConnectionStatus(status));
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expand(&self, position: TreePosition, queue: &JobQueue) {
        let controller = self.controllers.get_or_create(position);
        if let Some(task) = controller.expand() {
            queue.submit(Job::Subscription(task));
        }
    }

    fn collapse(&self, position: TreePosition, queue: &JobQueue) {
        if self.expansions.cancel(position) {
            tracing::debug!("Collapse of {} cancelled its expand-all", position);
        }
        // Never expanded: nothing was subscribed through this row.
        let Some(controller) = self.controllers.get(position) else {
            tracing::trace!("Collapse of {} without a controller ignored", position);
            return;
        };
        if let Some(task) = controller.collapse() {
            queue.submit(Job::Subscription(task));
        }
    }

    /// Queue description loads for rows not described yet
    fn describe(&self, positions: &[TreePosition], queue: &JobQueue) {
        let mut described = self.described.lock().unwrap_or_else(|e| e.into_inner());
        for position in positions {
            if let Some(node) = self.tree.node_id(*position) {
                if described.insert(node.clone()) {
                    queue.submit(Job::LoadDescription(node));
                }
            }
        }
    }

    fn describe_children(&self, position: TreePosition, queue: &JobQueue) {
        if let Ok(children) = self.tree.children_of(position) {
            let positions: Vec<_> = children.into_iter().map(|(p, _)| p).collect();
            self.describe(&positions, queue);
        }
    }
}

impl JobHandler for SessionCore {
    fn handle(&self, job: Job, queue: &JobQueue) {
        match job {
            Job::Subscription(task) => {
                let outcome = task.run(&self.task_context);
                if let Some(failure) = task.failure(&outcome, &self.task_context) {
                    self.send_event(UiEvent::SubscriptionError(failure));
                }
                if let Some(next) = task.controller().finish(&task, &outcome) {
                    queue.submit(Job::Subscription(next));
                }
            }
            Job::LoadDescription(node) => match load_description(self.client.as_ref(), &node) {
                Ok(description) => self.send_event(UiEvent::DescriptionLoaded(description)),
                Err(e) => tracing::warn!("{}", e),
            },
            Job::ExpandAll { root, token } => {
                let result = expand_subtree(
                    root,
                    token,
                    &self.expansions,
                    &self.tree,
                    self.client.as_ref(),
                    &mut |position| {
                        self.describe_children(position, queue);
                        self.expand(position, queue);
                    },
                );
                self.expansions.finish(root, token);
                match result {
                    Ok(summary) => self.send_event(UiEvent::ExpandAllFinished(summary)),
                    Err(e) => {
                        tracing::error!("Expand-all from {} failed: {}", root, e);
                        self.send_event(UiEvent::ExpandAllFinished(ExpandAllSummary {
                            root,
                            expanded: 0,
                            cancelled: true,
                        }));
                    }
                }
            }
            Job::SubscribeEvents(node) => {
                if let Err(e) = self.events.subscribe(&node) {
                    tracing::error!("Failed to subscribe to events of {}: {}", node, e);
                    self.send_event(UiEvent::EventSubscriptionFailed {
                        node,
                        error: e.to_string(),
                    });
                }
            }
            Job::UnsubscribeEvents(node) => {
                if let Err(e) = self.events.unsubscribe(&node) {
                    self.send_event(UiEvent::EventSubscriptionFailed {
                        node,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

/// One browsing session over a protocol client
///
/// Entry points are meant to be called from the UI/control thread and never
/// block on the network, except [`connect`](Self::connect) and
/// [`fetch_more`](Self::fetch_more), which mirror the tree widget's own
/// synchronous loading.
pub struct BrowserSession {
    core: Arc<SessionCore>,
    pool: WorkerPool,
    state: Mutex<AppState>,
    state_path: Option<PathBuf>,
}

impl BrowserSession {
    /// Create a session and the UI receiver paired with it
    pub fn new(client: Arc<dyn UaClient>, config: &AppConfig) -> Result<(Self, UiReceiver)> {
        config.validate()?;

        let (event_tx, event_rx) = bounded(config.workers.ui_event_buffer);
        let dropped = Arc::new(AtomicU64::new(0));

        let signals = Arc::new(SignalTable::new(config.workers.signal_capacity));
        let tree = Arc::new(LiveTree::new(signals.clone()));
        let dispatcher = Arc::new(DataChangeDispatcher::new(signals.clone()));
        let subscriptions = Arc::new(DataChangeSubscriptionSet::new(
            client.clone(),
            dispatcher.clone(),
        ));
        let children: Arc<dyn ChildSource> = tree.clone();
        let ui = Arc::new(UiSender {
            events: event_tx,
            dropped: dropped.clone(),
        });
        let events = EventSubscriptionSet::new(client.clone(), ui.clone());

        let core = Arc::new(SessionCore {
            client,
            tree,
            signals,
            dispatcher,
            subscriptions: subscriptions.clone(),
            events,
            controllers: ControllerRegistry::new(),
            expansions: ExpandAllTracker::new(),
            described: Mutex::new(HashSet::new()),
            task_context: TaskContext {
                children,
                subscriptions,
            },
            status: Mutex::new(ConnectionStatus::Disconnected),
            ui,
        });
        let pool = WorkerPool::new(config.workers.threads, core.clone())?;

        let session = Self {
            core,
            pool,
            state: Mutex::new(AppState::default()),
            state_path: None,
        };
        let ui = UiReceiver {
            receiver: event_rx,
            dropped,
        };
        Ok((session, ui))
    }

    /// Persist the address history to `path`, loading what is already there
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = AppState::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable app state {:?}: {}", path, e);
            AppState::default()
        });
        self.state = Mutex::new(state);
        self.state_path = Some(path);
        self
    }

    fn queue(&self) -> &JobQueue {
        self.pool.queue()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save_state(&self, state: &AppState) {
        if let Some(path) = &self.state_path {
            if let Err(e) = state.save_to(path) {
                tracing::warn!("Failed to save app state: {}", e);
            }
        }
    }

    // ==================== Connection ====================

    /// Open a session and materialize the root row
    pub fn connect(&self, endpoint: &str) -> Result<TreePosition> {
        if self.core.status() == ConnectionStatus::Connected {
            self.disconnect();
        }
        tracing::info!("Connecting to {}", endpoint);
        self.core.set_status(ConnectionStatus::Connecting);

        let result = self
            .core
            .client
            .connect(endpoint)
            .and_then(|()| self.core.tree.set_root_node(self.core.client.as_ref()))
            .with_context(|| format!("Failed to connect to {}", endpoint));
        let root = match result {
            Ok(root) => root,
            Err(e) => {
                tracing::error!("{}", e);
                self.core.set_status(ConnectionStatus::Error);
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            state.add_recent_address(endpoint);
            self.save_state(&state);
        }
        self.core.describe(&[root], self.queue());
        self.core.set_status(ConnectionStatus::Connected);
        tracing::info!("Connected to {}", endpoint);
        Ok(root)
    }

    /// Tear down the session: controllers, subscriptions and tree
    ///
    /// In-flight walks abort at their next child. Subscriptions are dropped
    /// locally without unsubscribe calls; the server removes them with the
    /// session. The client is closed before the set is cleared so a walk
    /// that is mid-call fails instead of re-creating a monitored item.
    pub fn disconnect(&self) {
        self.core.expansions.cancel_all();
        self.core.controllers.clear();
        if let Err(e) = self.core.client.disconnect() {
            tracing::warn!("Error while disconnecting: {}", e);
        }
        self.core.subscriptions.clear();
        self.core.events.clear();
        self.core.tree.clear();
        self.core
            .described
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        self.core.set_status(ConnectionStatus::Disconnected);
        tracing::info!("Disconnected");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core.status()
    }

    // ==================== Tree ====================

    /// Browse the children of a row (once) and queue their descriptions
    pub fn fetch_more(&self, position: TreePosition) -> Result<Vec<TreePosition>> {
        if !self.core.client.is_connected() {
            return Err(UaBrowserError::NotConnected);
        }
        let added = self.core.tree.fetch_more(position, self.core.client.as_ref())?;
        self.core.describe(&added, self.queue());
        Ok(added)
    }

    /// The row was expanded in the UI
    pub fn on_tree_expanded(&self, position: TreePosition) {
        tracing::debug!("Expanded {}", position);
        self.core.expand(position, self.queue());
    }

    /// The row was collapsed in the UI
    pub fn on_tree_collapsed(&self, position: TreePosition) {
        tracing::debug!("Collapsed {}", position);
        self.core.collapse(position, self.queue());
    }

    /// Expand every branch below `position` in the background
    ///
    /// Returns false if a walk from this row is already running.
    pub fn expand_all(&self, position: TreePosition) -> bool {
        match self.core.expansions.begin(position) {
            Some(token) => {
                if !self.queue().submit(Job::ExpandAll {
                    root: position,
                    token,
                }) {
                    self.core.expansions.finish(position, token);
                    return false;
                }
                true
            }
            None => {
                tracing::debug!("Expand-all from {} already running", position);
                false
            }
        }
    }

    pub fn cancel_expand_all(&self, position: TreePosition) -> bool {
        self.core.expansions.cancel(position)
    }

    /// Remember the selected row for the next session
    pub fn select_node(&self, position: TreePosition) {
        if let Some(node) = self.core.tree.node_id(position) {
            let mut state = self.state();
            state.last_node = Some(node);
            self.save_state(&state);
        }
    }

    pub fn tree(&self) -> &Arc<LiveTree> {
        &self.core.tree
    }

    // ==================== Live values ====================

    /// Connect a consumer to a node's notification channel
    ///
    /// None if the node has no row in the tree.
    pub fn subscribe_node(&self, node: &NodeId) -> Option<Receiver<DataChangeNotification>> {
        self.core.signals.subscribe(node)
    }

    pub fn is_subscribed(&self, node: &NodeId) -> bool {
        self.core.subscriptions.is_subscribed(node)
    }

    /// Nodes with a live data-change subscription, sorted
    pub fn subscribed_nodes(&self) -> Vec<NodeId> {
        self.core.subscriptions.subscribed_nodes()
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.core.subscriptions.stats()
    }

    /// Notifications routed to a node signal so far
    pub fn delivered_notifications(&self) -> u64 {
        self.core.dispatcher.delivered()
    }

    pub fn controller_state(&self, position: TreePosition) -> Option<ControllerState> {
        self.core.controllers.get(position).map(|c| c.state())
    }

    // ==================== Events ====================

    /// Subscribe to the events a node raises, in the background
    ///
    /// Fired events arrive as [`UiEvent::EventFired`]; a failure as
    /// [`UiEvent::EventSubscriptionFailed`].
    pub fn subscribe_events(&self, node: &NodeId) -> bool {
        if !self.core.client.is_connected() {
            tracing::warn!("Not connected, cannot subscribe to events of {}", node);
            return false;
        }
        self.queue().submit(Job::SubscribeEvents(node.clone()))
    }

    pub fn unsubscribe_events(&self, node: &NodeId) -> bool {
        self.queue().submit(Job::UnsubscribeEvents(node.clone()))
    }

    /// Nodes with an event subscription, sorted
    pub fn event_subscriptions(&self) -> Vec<NodeId> {
        self.core.events.subscribed_nodes()
    }

    // ==================== Lifecycle ====================

    /// Block until all queued walks and loads have settled
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue().wait_idle(timeout)
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.queue().stats()
    }

    pub fn app_state(&self) -> AppState {
        self.state().clone()
    }

    /// Stop the worker pool; the session is unusable afterwards
    pub fn shutdown(&mut self) {
        self.core.expansions.cancel_all();
        self.pool.shutdown();
    }
}
