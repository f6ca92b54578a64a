//! Data-change dispatcher
//!
//! Receives raw notifications from the client library and republishes them
//! on the node's [`SignalTable`] channel with a resolved timestamp: the
//! source timestamp if the server sent one, else the server timestamp, else
//! the local clock.

use crate::backend::client_trait::DataChangeHandler;
use crate::tree::signals::SignalTable;
use crate::types::{DataChangeNotification, DataValue, NodeId, Variant};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct DataChangeDispatcher {
    signals: Arc<SignalTable>,
    delivered: AtomicU64,
    unrouted: AtomicU64,
}

impl DataChangeDispatcher {
    pub fn new(signals: Arc<SignalTable>) -> Self {
        Self {
            signals,
            delivered: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    /// Notifications that reached a registered node signal
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Notifications for nodes with no signal (tree was cleared meanwhile)
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }
}

impl DataChangeHandler for DataChangeDispatcher {
    fn datachange_notification(&self, node: &NodeId, value: Variant, data: &DataValue) {
        let notification = DataChangeNotification {
            node: node.clone(),
            value,
            timestamp: data.resolved_timestamp(),
        };
        if self.signals.emit(&notification) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Dropping data change for unregistered node {}", node);
        }
    }
}
