//! UaClient trait for a unified protocol-client interface
//!
//! This module provides the seam between the browser and the OPC-UA client
//! library. Both a real network client and the in-memory
//! [`MockClientBackend`](super::MockClientBackend) implement it.
//!
//! Implementations are shared between the control thread and the worker
//! pool, so every method takes `&self` and the trait requires `Send + Sync`.
//! Calls may block on the network; only worker threads should make them.

use crate::error::Result;
use crate::types::{
    AttributeId, DataValue, EventNotification, NodeId, ReferenceDescription, SubscriptionHandle,
    Variant,
};
use std::sync::Arc;

/// Receiver of raw data-change notifications from the client library
pub trait DataChangeHandler: Send + Sync {
    /// Called by the client for every data change on a monitored node,
    /// in the order the server produced them.
    fn datachange_notification(&self, node: &NodeId, value: Variant, data: &DataValue);
}

/// Receiver of events from nodes with an event subscription
pub trait EventHandler: Send + Sync {
    fn event_notification(&self, event: EventNotification);
}

/// Unified interface for OPC-UA protocol clients
///
/// # Example
///
/// ```ignore
/// fn display_name(client: &dyn UaClient, id: NodeId) -> Result<String> {
///     let attrs = client.get_node(id).read_attributes(&[AttributeId::DisplayName])?;
///     Ok(attrs[0].value.to_string())
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait UaClient: Send + Sync {
    /// Open a session to the endpoint
    fn connect(&self, endpoint: &str) -> Result<()>;

    /// Close the session; the server drops all monitored items with it
    fn disconnect(&self) -> Result<()>;

    /// Check if a session is open
    fn is_connected(&self) -> bool;

    /// The Root folder of the address space
    fn root_node(&self) -> NodeId;

    /// Read attributes of a node, one value per requested id
    fn read_attributes(&self, node: &NodeId, ids: &[AttributeId]) -> Result<Vec<DataValue>>;

    /// Browse forward hierarchical references of a node
    fn browse_children(&self, node: &NodeId) -> Result<Vec<ReferenceDescription>>;

    /// Create a data-change monitored item for the node's Value attribute
    ///
    /// Fails with [`UaBrowserError::AttributeNotMonitorable`](crate::UaBrowserError)
    /// when the node has no Value attribute.
    fn subscribe_data_change(
        &self,
        node: &NodeId,
        handler: Arc<dyn DataChangeHandler>,
    ) -> Result<SubscriptionHandle>;

    /// Delete the data-change monitored item of the node
    fn unsubscribe_data_change(&self, node: &NodeId) -> Result<()>;

    /// Create an event monitored item on a notifier node
    fn subscribe_events(&self, node: &NodeId, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle>;

    /// Delete the event monitored item of the node
    fn unsubscribe_events(&self, node: &NodeId) -> Result<()>;
}

impl<'c> dyn UaClient + 'c {
    /// Get a handle for a node without touching the network
    pub fn get_node(&self, id: NodeId) -> NodeHandle<'_> {
        NodeHandle { client: self, id }
    }
}

/// A node bound to the client it lives on
#[derive(Clone)]
pub struct NodeHandle<'a> {
    client: &'a dyn UaClient,
    id: NodeId,
}

impl NodeHandle<'_> {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn read_attributes(&self, ids: &[AttributeId]) -> Result<Vec<DataValue>> {
        self.client.read_attributes(&self.id, ids)
    }

    pub fn children(&self) -> Result<Vec<ReferenceDescription>> {
        self.client.browse_children(&self.id)
    }
}

impl std::fmt::Debug for NodeHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.id).finish()
    }
}
