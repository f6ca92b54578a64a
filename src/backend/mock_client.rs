//! Mock Client Implementation for Testing
//!
//! This module provides an in-memory OPC-UA client that can be used to run
//! the browser without a server. It serves a configurable address space and
//! keeps a registry of monitored items whose handlers receive generated or
//! explicitly published values.
//!
//! # Features
//!
//! - **Builder address space**: folders, variables, methods and duplicate references
//! - **Fault injection**: per-node "not monitorable" or generic protocol failures
//! - **Gates**: block calls touching a node until the test releases it
//! - **Instrumentation**: call log and high-water mark of concurrent calls
//! - **Value patterns**: constant, sine or counter values pushed by [`MockClientBackend::tick`]
//! - **Events**: event subscriptions on Object nodes, raised with [`MockClientBackend::fire_event`]
//!
//! # Example
//!
//! ```ignore
//! use uabrowser::backend::mock_client::{MockAddressSpace, MockClientBackend};
//!
//! let space = MockAddressSpace::new()
//!     .with_folder(MockAddressSpace::OBJECTS, "ns=2;s=Line1", "Line1")
//!     .with_variable("ns=2;s=Line1", "ns=2;s=Line1.Speed", "Speed", 12.5);
//! let client = MockClientBackend::new(space);
//! client.connect("opc.tcp://mock:4840")?;
//! ```
//!
//! # Enabling
//!
//! The mock client is only available when the `mock-client` feature is enabled
//! (it is part of the default feature set).

use crate::backend::client_trait::{DataChangeHandler, EventHandler, UaClient};
use crate::error::{Result, UaBrowserError};
use crate::types::{
    AttributeId, DataValue, EventNotification, NodeClass, NodeId, ReferenceDescription,
    SubscriptionHandle, Variant,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Pattern for generating mock values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockDataPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments on every tick
    Counter { step: f64, min: f64, max: f64 },
}

impl Default for MockDataPattern {
    fn default() -> Self {
        MockDataPattern::Sine {
            frequency: 1.0,
            amplitude: 100.0,
            offset: 0.0,
        }
    }
}

impl MockDataPattern {
    /// Generate the next value; `counter` carries Counter state between ticks
    pub fn generate_value(&self, elapsed_secs: f64, counter: &mut f64) -> f64 {
        match *self {
            MockDataPattern::Constant(v) => v,
            MockDataPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            MockDataPattern::Counter { step, min, max } => {
                *counter += step;
                if *counter > max {
                    *counter = min;
                } else if *counter < min {
                    *counter = max;
                }
                *counter
            }
        }
    }
}

/// Forced failure for a node's subscribe call
#[derive(Debug, Clone, PartialEq)]
pub enum MockFault {
    /// Reply as if the node had no monitorable Value attribute
    NotMonitorable,
    /// Reply with a generic protocol error
    Fail(String),
}

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect(String),
    Disconnect,
    ReadAttributes(NodeId),
    Browse(NodeId),
    Subscribe(NodeId),
    Unsubscribe(NodeId),
    SubscribeEvents(NodeId),
    UnsubscribeEvents(NodeId),
}

/// A node of the simulated address space
#[derive(Debug, Clone)]
pub struct MockNode {
    pub id: NodeId,
    pub browse_name: String,
    pub display_name: String,
    pub node_class: NodeClass,
    pub type_definition: Option<NodeId>,
    pub description: String,
    pub data_type: Option<NodeId>,
    pub value: Variant,
    pub pattern: Option<MockDataPattern>,
    pub children: Vec<NodeId>,
}

impl MockNode {
    fn new(id: &str, name: &str, node_class: NodeClass) -> Self {
        Self {
            id: NodeId::new(id),
            browse_name: name.to_string(),
            display_name: name.to_string(),
            node_class,
            type_definition: None,
            description: String::new(),
            data_type: None,
            value: Variant::Empty,
            pattern: None,
            children: Vec::new(),
        }
    }

    fn reference(&self) -> ReferenceDescription {
        ReferenceDescription {
            node_id: self.id.clone(),
            browse_name: self.browse_name.clone(),
            display_name: self.display_name.clone(),
            node_class: self.node_class,
            type_definition: self.type_definition.clone(),
        }
    }
}

/// Simulated address space, built up front and shared read-mostly
#[derive(Debug, Clone)]
pub struct MockAddressSpace {
    nodes: HashMap<NodeId, MockNode>,
    root: NodeId,
}

impl MockAddressSpace {
    pub const ROOT: &'static str = "i=84";
    pub const OBJECTS: &'static str = "i=85";
    pub const FOLDER_TYPE: &'static str = "i=61";
    pub const DOUBLE_TYPE: &'static str = "i=11";

    /// Root folder with an empty Objects folder below it
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = MockNode::new(Self::ROOT, "Root", NodeClass::Object);
        root.type_definition = Some(NodeId::new(Self::FOLDER_TYPE));
        root.children.push(NodeId::new(Self::OBJECTS));
        let mut objects = MockNode::new(Self::OBJECTS, "Objects", NodeClass::Object);
        objects.type_definition = Some(NodeId::new(Self::FOLDER_TYPE));
        nodes.insert(root.id.clone(), root);
        nodes.insert(objects.id.clone(), objects);

        Self {
            nodes,
            root: NodeId::new(Self::ROOT),
        }
    }

    /// A small plant model used by the demo binary
    pub fn demo() -> Self {
        let mut space = Self::new()
            .with_folder(Self::OBJECTS, "ns=2;s=Plant", "Plant")
            .with_folder("ns=2;s=Plant", "ns=2;s=Line1", "Line1")
            .with_variable("ns=2;s=Line1", "ns=2;s=Line1.Speed", "Speed", 0.0)
            .with_variable("ns=2;s=Line1", "ns=2;s=Line1.Temperature", "Temperature", 21.5)
            .with_method("ns=2;s=Line1", "ns=2;s=Line1.Reset", "Reset")
            .with_folder("ns=2;s=Plant", "ns=2;s=Line2", "Line2")
            .with_variable("ns=2;s=Line2", "ns=2;s=Line2.Count", "Count", 0.0);
        space.set_pattern(
            "ns=2;s=Line1.Speed",
            MockDataPattern::Sine {
                frequency: 0.2,
                amplitude: 50.0,
                offset: 100.0,
            },
        );
        space.set_pattern(
            "ns=2;s=Line2.Count",
            MockDataPattern::Counter {
                step: 1.0,
                min: 0.0,
                max: 1000.0,
            },
        );
        space
    }

    fn insert_child(&mut self, parent: &str, node: MockNode) {
        let child_id = node.id.clone();
        self.nodes.insert(child_id.clone(), node);
        if let Some(p) = self.nodes.get_mut(&NodeId::new(parent)) {
            p.children.push(child_id);
        }
    }

    pub fn with_folder(mut self, parent: &str, id: &str, name: &str) -> Self {
        let mut node = MockNode::new(id, name, NodeClass::Object);
        node.type_definition = Some(NodeId::new(Self::FOLDER_TYPE));
        self.insert_child(parent, node);
        self
    }

    pub fn with_object(mut self, parent: &str, id: &str, name: &str) -> Self {
        self.insert_child(parent, MockNode::new(id, name, NodeClass::Object));
        self
    }

    pub fn with_variable(
        mut self,
        parent: &str,
        id: &str,
        name: &str,
        value: impl Into<Variant>,
    ) -> Self {
        let mut node = MockNode::new(id, name, NodeClass::Variable);
        node.value = value.into();
        node.data_type = Some(NodeId::new(Self::DOUBLE_TYPE));
        node.description = format!("{} value", name);
        self.insert_child(parent, node);
        self
    }

    pub fn with_method(mut self, parent: &str, id: &str, name: &str) -> Self {
        self.insert_child(parent, MockNode::new(id, name, NodeClass::Method));
        self
    }

    /// Add an extra reference from `parent` to an existing node
    pub fn with_reference(mut self, parent: &str, child: &str) -> Self {
        if let Some(p) = self.nodes.get_mut(&NodeId::new(parent)) {
            p.children.push(NodeId::new(child));
        }
        self
    }

    pub fn set_pattern(&mut self, id: &str, pattern: MockDataPattern) {
        if let Some(node) = self.nodes.get_mut(&NodeId::new(id)) {
            node.pattern = Some(pattern);
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&MockNode> {
        self.nodes.get(id)
    }
}

impl Default for MockAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct GateState {
    held: HashSet<NodeId>,
    blocked: HashSet<NodeId>,
}

struct MonitoredItem {
    handle: SubscriptionHandle,
    handler: Arc<dyn DataChangeHandler>,
    counter: f64,
}

struct EventItem {
    handle: SubscriptionHandle,
    handler: Arc<dyn EventHandler>,
}

/// Mock client backend for testing without a server
pub struct MockClientBackend {
    space: RwLock<MockAddressSpace>,
    connected: AtomicBool,
    endpoint: Mutex<Option<String>>,
    monitored: Mutex<HashMap<NodeId, MonitoredItem>>,
    event_items: Mutex<HashMap<NodeId, EventItem>>,
    faults: Mutex<HashMap<NodeId, MockFault>>,
    calls: Mutex<Vec<MockCall>>,
    call_delay: Mutex<Duration>,
    gates: Mutex<GateState>,
    gate_cv: Condvar,
    next_handle: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    start_time: Instant,
}

impl MockClientBackend {
    /// Create a new mock client serving the given address space
    pub fn new(space: MockAddressSpace) -> Self {
        Self {
            space: RwLock::new(space),
            connected: AtomicBool::new(false),
            endpoint: Mutex::new(None),
            monitored: Mutex::new(HashMap::new()),
            event_items: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            call_delay: Mutex::new(Duration::ZERO),
            gates: Mutex::new(GateState::default()),
            gate_cv: Condvar::new(),
            next_handle: AtomicU32::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Simulate network latency on subscribe/unsubscribe calls
    pub fn with_call_delay(self, delay: Duration) -> Self {
        *self.call_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
        self
    }

    /// Force the next subscribe calls for a node to fail
    pub fn inject_fault(&self, node: impl Into<NodeId>, fault: MockFault) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node.into(), fault);
    }

    pub fn clear_fault(&self, node: &NodeId) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(node);
    }

    /// Block subscribe/unsubscribe calls for a node until [`release`](Self::release)
    pub fn hold(&self, node: impl Into<NodeId>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.held.insert(node.into());
    }

    pub fn release(&self, node: &NodeId) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.held.remove(node);
        self.gate_cv.notify_all();
    }

    /// Wait until some call is parked on the gate of `node`
    pub fn wait_until_blocked(&self, node: &NodeId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        while !gates.blocked.contains(node) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gates = match self.gate_cv.wait_timeout(gates, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    fn pass_gate(&self, node: &NodeId) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        if !gates.held.contains(node) {
            return;
        }
        gates.blocked.insert(node.clone());
        self.gate_cv.notify_all();
        while gates.held.contains(node) {
            gates = match self.gate_cv.wait(gates) {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
        }
        gates.blocked.remove(node);
    }

    fn record(&self, call: MockCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of subscribe calls that reached the "server" for a node
    pub fn subscribe_calls_for(&self, node: &NodeId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Subscribe(n) if n == node))
            .count()
    }

    /// Nodes with a live monitored item, sorted
    pub fn monitored_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .monitored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        nodes.sort();
        nodes
    }

    /// Nodes with a live event subscription, sorted
    pub fn event_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .event_items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        nodes.sort();
        nodes
    }

    /// Raise an event on `notifier`; false if nobody subscribed to it
    pub fn fire_event(&self, notifier: &NodeId, source: &NodeId, message: &str, severity: u16) -> bool {
        let handler = {
            let items = self.event_items.lock().unwrap_or_else(|e| e.into_inner());
            match items.get(notifier) {
                Some(item) => item.handler.clone(),
                None => return false,
            }
        };
        handler.event_notification(EventNotification {
            notifier: notifier.clone(),
            source: source.clone(),
            message: message.to_string(),
            severity,
            time: Utc::now(),
        });
        true
    }

    /// Highest number of subscribe/unsubscribe calls observed at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deliver a value to the handler monitoring `node`, if any
    pub fn publish(&self, node: &NodeId, value: impl Into<Variant>) -> bool {
        let value = value.into();
        let data = DataValue::new(value.clone()).with_source_timestamp(Utc::now());
        self.publish_data_value(node, value, data)
    }

    pub fn publish_data_value(&self, node: &NodeId, value: Variant, data: DataValue) -> bool {
        let handler = {
            let monitored = self.monitored.lock().unwrap_or_else(|e| e.into_inner());
            match monitored.get(node) {
                Some(item) => item.handler.clone(),
                None => return false,
            }
        };
        handler.datachange_notification(node, value, &data);
        true
    }

    /// Publish one generated value for every monitored node with a pattern
    pub fn tick(&self) -> usize {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let space = self.space.read().unwrap_or_else(|e| e.into_inner());
        let mut updates = Vec::new();
        {
            let mut monitored = self.monitored.lock().unwrap_or_else(|e| e.into_inner());
            for (id, item) in monitored.iter_mut() {
                if let Some(pattern) = space.node(id).and_then(|n| n.pattern) {
                    let value = pattern.generate_value(elapsed, &mut item.counter);
                    updates.push((id.clone(), item.handler.clone(), value));
                }
            }
        }
        drop(space);

        let count = updates.len();
        for (id, handler, value) in updates {
            let data = DataValue::new(value).with_source_timestamp(Utc::now());
            handler.datachange_notification(&id, Variant::Double(value), &data);
        }
        count
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UaBrowserError::NotConnected)
        }
    }

    fn begin_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.call_delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn end_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn attribute(node: &MockNode, id: AttributeId) -> DataValue {
        let value = match id {
            AttributeId::NodeId => Variant::NodeId(node.id.clone()),
            AttributeId::NodeClass => Variant::NodeClass(node.node_class),
            AttributeId::BrowseName => Variant::String(node.browse_name.clone()),
            AttributeId::DisplayName => Variant::String(node.display_name.clone()),
            AttributeId::Description => Variant::String(node.description.clone()),
            AttributeId::Value => node.value.clone(),
            AttributeId::DataType => node
                .data_type
                .clone()
                .map(Variant::NodeId)
                .unwrap_or_default(),
        };
        DataValue::new(value).with_server_timestamp(Utc::now())
    }
}

impl Default for MockClientBackend {
    fn default() -> Self {
        Self::new(MockAddressSpace::new())
    }
}

impl UaClient for MockClientBackend {
    fn connect(&self, endpoint: &str) -> Result<()> {
        self.record(MockCall::Connect(endpoint.to_string()));
        *self.endpoint.lock().unwrap_or_else(|e| e.into_inner()) = Some(endpoint.to_string());
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Mock client connected to {}", endpoint);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        self.monitored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.event_items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!("Mock client disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn root_node(&self) -> NodeId {
        self.space
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .root
            .clone()
    }

    fn read_attributes(&self, node: &NodeId, ids: &[AttributeId]) -> Result<Vec<DataValue>> {
        self.ensure_connected()?;
        self.record(MockCall::ReadAttributes(node.clone()));
        let space = self.space.read().unwrap_or_else(|e| e.into_inner());
        let n = space
            .node(node)
            .ok_or_else(|| UaBrowserError::UnknownNode(node.clone()))?;
        Ok(ids.iter().map(|id| Self::attribute(n, *id)).collect())
    }

    fn browse_children(&self, node: &NodeId) -> Result<Vec<ReferenceDescription>> {
        self.ensure_connected()?;
        self.record(MockCall::Browse(node.clone()));
        let space = self.space.read().unwrap_or_else(|e| e.into_inner());
        let n = space
            .node(node)
            .ok_or_else(|| UaBrowserError::UnknownNode(node.clone()))?;
        Ok(n.children
            .iter()
            .filter_map(|c| space.node(c))
            .map(MockNode::reference)
            .collect())
    }

    fn subscribe_data_change(
        &self,
        node: &NodeId,
        handler: Arc<dyn DataChangeHandler>,
    ) -> Result<SubscriptionHandle> {
        self.ensure_connected()?;
        self.pass_gate(node);
        self.begin_call();
        self.record(MockCall::Subscribe(node.clone()));

        let result = (|| {
            let fault = self
                .faults
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(node)
                .cloned();
            match fault {
                Some(MockFault::NotMonitorable) => {
                    return Err(UaBrowserError::AttributeNotMonitorable(node.clone()))
                }
                Some(MockFault::Fail(msg)) => return Err(UaBrowserError::protocol("BadInternalError", msg)),
                None => {}
            }

            let node_class = self
                .space
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .node(node)
                .map(|n| n.node_class)
                .ok_or_else(|| UaBrowserError::UnknownNode(node.clone()))?;
            if !node_class.has_value() {
                return Err(UaBrowserError::AttributeNotMonitorable(node.clone()));
            }

            let mut monitored = self.monitored.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = monitored.get(node) {
                return Ok(existing.handle);
            }
            let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
            monitored.insert(
                node.clone(),
                MonitoredItem {
                    handle,
                    handler,
                    counter: 0.0,
                },
            );
            Ok(handle)
        })();

        self.end_call();
        result
    }

    fn unsubscribe_data_change(&self, node: &NodeId) -> Result<()> {
        self.ensure_connected()?;
        self.pass_gate(node);
        self.begin_call();
        self.record(MockCall::Unsubscribe(node.clone()));
        let removed = self
            .monitored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(node);
        self.end_call();

        match removed {
            Some(_) => Ok(()),
            None => Err(UaBrowserError::protocol(
                "BadMonitoredItemIdInvalid",
                format!("no monitored item for {}", node),
            )),
        }
    }

    fn subscribe_events(&self, node: &NodeId, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle> {
        self.ensure_connected()?;
        self.record(MockCall::SubscribeEvents(node.clone()));

        if let Some(MockFault::Fail(msg)) = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .cloned()
        {
            return Err(UaBrowserError::protocol("BadInternalError", msg));
        }
        let node_class = self
            .space
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .node(node)
            .map(|n| n.node_class)
            .ok_or_else(|| UaBrowserError::UnknownNode(node.clone()))?;
        if !node_class.can_notify_events() {
            return Err(UaBrowserError::protocol(
                "BadFilterNotAllowed",
                format!("{} is not an event notifier", node),
            ));
        }

        let mut items = self.event_items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = items.get(node) {
            return Ok(existing.handle);
        }
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        items.insert(node.clone(), EventItem { handle, handler });
        Ok(handle)
    }

    fn unsubscribe_events(&self, node: &NodeId) -> Result<()> {
        self.ensure_connected()?;
        self.record(MockCall::UnsubscribeEvents(node.clone()));
        let removed = self
            .event_items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(node);
        match removed {
            Some(_) => Ok(()),
            None => Err(UaBrowserError::protocol(
                "BadMonitoredItemIdInvalid",
                format!("no event subscription for {}", node),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder(StdMutex<Vec<(NodeId, Variant)>>);

    impl DataChangeHandler for Recorder {
        fn datachange_notification(&self, node: &NodeId, value: Variant, _data: &DataValue) {
            self.0.lock().unwrap().push((node.clone(), value));
        }
    }

    fn speed() -> NodeId {
        NodeId::new("ns=2;s=Line1.Speed")
    }

    #[test]
    fn test_mock_client_requires_connection() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        assert!(matches!(
            client.browse_children(&client.root_node()),
            Err(UaBrowserError::NotConnected)
        ));
        client.connect("opc.tcp://mock:4840").unwrap();
        assert!(client.is_connected());
        let children = client.browse_children(&client.root_node()).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].browse_name, "Objects");
    }

    #[test]
    fn test_subscribe_and_publish() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        client.connect("opc.tcp://mock:4840").unwrap();
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));

        client.subscribe_data_change(&speed(), recorder.clone()).unwrap();
        assert!(client.publish(&speed(), 42.0));
        assert_eq!(recorder.0.lock().unwrap()[0], (speed(), Variant::Double(42.0)));

        client.unsubscribe_data_change(&speed()).unwrap();
        assert!(!client.publish(&speed(), 43.0));
        assert!(client.unsubscribe_data_change(&speed()).is_err());
    }

    #[test]
    fn test_objects_are_not_monitorable() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        client.connect("opc.tcp://mock:4840").unwrap();
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let err = client
            .subscribe_data_change(&NodeId::new("ns=2;s=Line1"), recorder)
            .unwrap_err();
        assert!(err.is_ignorable());
    }

    #[test]
    fn test_injected_fault() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        client.connect("opc.tcp://mock:4840").unwrap();
        client.inject_fault(speed(), MockFault::Fail("boom".into()));
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let err = client.subscribe_data_change(&speed(), recorder).unwrap_err();
        assert!(!err.is_ignorable());
        assert!(client.monitored_nodes().is_empty());
    }

    #[test]
    fn test_tick_generates_pattern_values() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        client.connect("opc.tcp://mock:4840").unwrap();
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let count = NodeId::new("ns=2;s=Line2.Count");
        client.subscribe_data_change(&count, recorder.clone()).unwrap();

        assert_eq!(client.tick(), 1);
        assert_eq!(client.tick(), 1);
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen[0].1, Variant::Double(1.0));
        assert_eq!(seen[1].1, Variant::Double(2.0));
    }

    #[test]
    fn test_counter_pattern_wraps() {
        let pattern = MockDataPattern::Counter {
            step: 1.0,
            min: 0.0,
            max: 2.0,
        };
        let mut counter = 0.0;
        let values: Vec<f64> = (0..4).map(|_| pattern.generate_value(0.0, &mut counter)).collect();
        assert_eq!(values, vec![1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_gate_blocks_until_released() {
        let client = Arc::new(MockClientBackend::new(MockAddressSpace::demo()));
        client.connect("opc.tcp://mock:4840").unwrap();
        client.hold(speed());

        let c = client.clone();
        let handle = std::thread::spawn(move || {
            let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
            c.subscribe_data_change(&speed(), recorder).is_ok()
        });

        assert!(client.wait_until_blocked(&speed(), Duration::from_secs(5)));
        assert!(client.monitored_nodes().is_empty());
        client.release(&speed());
        assert!(handle.join().unwrap());
        assert_eq!(client.monitored_nodes(), vec![speed()]);
    }
    struct EventLog(StdMutex<Vec<EventNotification>>);

    impl EventHandler for EventLog {
        fn event_notification(&self, event: EventNotification) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_events_on_object_nodes() {
        let client = MockClientBackend::new(MockAddressSpace::demo());
        client.connect("opc.tcp://mock:4840").unwrap();
        let plant = NodeId::new("ns=2;s=Plant");
        let log = Arc::new(EventLog(StdMutex::new(Vec::new())));

        client.subscribe_events(&plant, log.clone()).unwrap();
        assert!(client.subscribe_events(&speed(), log.clone()).is_err());
        assert_eq!(client.event_nodes(), vec![plant.clone()]);

        assert!(client.fire_event(&plant, &speed(), "Overspeed", 700));
        assert!(!client.fire_event(&speed(), &speed(), "ignored", 1));
        let events = log.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Overspeed");
        assert_eq!(events[0].notifier, plant);

        client.unsubscribe_events(&plant).unwrap();
        assert!(client.unsubscribe_events(&plant).is_err());
        assert!(!client.fire_event(&plant, &speed(), "late", 1));
    }
}
