//! Per-node notification channels
//!
//! The [`SignalTable`] maps a [`NodeId`] to a [`NodeSignal`], a fan-out point
//! that UI consumers subscribe to for `(node, value, timestamp)` updates. An
//! entry is created when a tree item for the node is added and lives until the
//! table is cleared (tree clear / disconnect).
//!
//! Each subscriber gets its own bounded crossbeam channel. Emission uses
//! `try_send` so a slow consumer never stalls the client's callback thread;
//! dropped notifications are counted. Notifications for one node reach every
//! subscriber in emission order.

use crate::types::{DataChangeNotification, NodeId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default per-subscriber channel capacity
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Fan-out channel for one node
#[derive(Debug)]
pub struct NodeSignal {
    subscribers: Mutex<Vec<Sender<DataChangeNotification>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl NodeSignal {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Connect a new consumer
    pub fn subscribe(&self) -> Receiver<DataChangeNotification> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver to every live consumer, returning how many received it
    pub fn emit(&self, notification: &DataChangeNotification) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Notifications discarded because a consumer's queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Registry of node signals, shared by the tree, the dispatcher and UI views
#[derive(Debug)]
pub struct SignalTable {
    signals: RwLock<HashMap<NodeId, Arc<NodeSignal>>>,
    capacity: usize,
}

impl SignalTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Ensure a signal exists for `node`
    ///
    /// Re-registering keeps the existing signal and its consumers.
    pub fn register(&self, node: &NodeId) -> Arc<NodeSignal> {
        let mut signals = self.signals.write().unwrap_or_else(|e| e.into_inner());
        signals
            .entry(node.clone())
            .or_insert_with(|| Arc::new(NodeSignal::new(self.capacity)))
            .clone()
    }

    pub fn get(&self, node: &NodeId) -> Option<Arc<NodeSignal>> {
        self.signals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .cloned()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.signals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(node)
    }

    /// Connect a consumer to a registered node
    pub fn subscribe(&self, node: &NodeId) -> Option<Receiver<DataChangeNotification>> {
        self.get(node).map(|signal| signal.subscribe())
    }

    /// Publish on the notification's node channel; false if the node is unknown
    pub fn emit(&self, notification: &DataChangeNotification) -> bool {
        match self.get(&notification.node) {
            Some(signal) => {
                signal.emit(notification);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.signals.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.signals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;
    use chrono::Utc;

    fn notification(node: &NodeId, v: f64) -> DataChangeNotification {
        DataChangeNotification {
            node: node.clone(),
            value: Variant::Double(v),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let table = SignalTable::default();
        let node = NodeId::new("ns=2;s=A");
        let first = table.register(&node);
        let rx = first.subscribe();
        let second = table.register(&node);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
        assert!(table.emit(&notification(&node, 1.0)));
        assert_eq!(rx.try_recv().unwrap().value, Variant::Double(1.0));
    }

    #[test]
    fn test_emit_preserves_order() {
        let table = SignalTable::default();
        let node = NodeId::new("ns=2;s=A");
        table.register(&node);
        let rx = table.subscribe(&node).unwrap();

        for i in 0..10 {
            table.emit(&notification(&node, i as f64));
        }
        let values: Vec<Variant> = rx.try_iter().map(|n| n.value).collect();
        let expected: Vec<Variant> = (0..10).map(|i| Variant::Double(i as f64)).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_emit_unknown_node() {
        let table = SignalTable::default();
        assert!(!table.emit(&notification(&NodeId::new("ns=2;s=Nope"), 0.0)));
        assert!(table.subscribe(&NodeId::new("ns=2;s=Nope")).is_none());
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let table = SignalTable::default();
        let node = NodeId::new("ns=2;s=A");
        let signal = table.register(&node);
        let rx = signal.subscribe();
        let _keep = signal.subscribe();
        drop(rx);

        assert_eq!(signal.emit(&notification(&node, 1.0)), 1);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let table = SignalTable::new(1);
        let node = NodeId::new("ns=2;s=A");
        let signal = table.register(&node);
        let _rx = signal.subscribe();

        signal.emit(&notification(&node, 1.0));
        signal.emit(&notification(&node, 2.0));
        assert_eq!(signal.dropped(), 1);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn test_clear() {
        let table = SignalTable::default();
        table.register(&NodeId::new("ns=2;s=A"));
        table.register(&NodeId::new("ns=2;s=B"));
        table.clear();
        assert!(table.is_empty());
    }
}
