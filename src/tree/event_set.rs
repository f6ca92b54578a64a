//! Event subscription set
//!
//! Nodes the user asked to receive events from, independent of the tree's
//! expand/collapse lifecycle. At most one event subscription exists per
//! [`NodeId`]. Protocol calls are made under the set's lock, so requests for
//! the same node never overlap.

use crate::backend::client_trait::{EventHandler, UaClient};
use crate::error::Result;
use crate::types::{NodeId, SubscriptionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct EventSubscriptionSet {
    client: Arc<dyn UaClient>,
    handler: Arc<dyn EventHandler>,
    nodes: Mutex<HashMap<NodeId, SubscriptionHandle>>,
}

impl EventSubscriptionSet {
    pub fn new(client: Arc<dyn UaClient>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            client,
            handler,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, SubscriptionHandle>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to events raised by `node`
    ///
    /// Returns false if the node was already subscribed.
    pub fn subscribe(&self, node: &NodeId) -> Result<bool> {
        let mut nodes = self.lock();
        if nodes.contains_key(node) {
            tracing::info!("Already subscribed to events of {}", node);
            return Ok(false);
        }
        let handle = self.client.subscribe_events(node, self.handler.clone())?;
        nodes.insert(node.clone(), handle);
        tracing::info!("Subscribed to events of {}", node);
        Ok(true)
    }

    /// Drop the event subscription of `node`; no-op if there is none
    ///
    /// The entry is forgotten even if the server call fails.
    pub fn unsubscribe(&self, node: &NodeId) -> Result<()> {
        let mut nodes = self.lock();
        if nodes.remove(node).is_none() {
            return Ok(());
        }
        self.client.unsubscribe_events(node).map_err(|e| {
            tracing::error!("Failed to unsubscribe from events of {}: {}", node, e);
            e
        })
    }

    /// Forget every event subscription without calling the server
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_subscribed(&self, node: &NodeId) -> bool {
        self.lock().contains_key(node)
    }

    /// Subscribed notifier nodes, sorted
    pub fn subscribed_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.lock().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
