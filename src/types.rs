//! Core data types for uabrowser
//!
//! This module contains the fundamental data structures shared by the
//! protocol-client seam, the materialized tree and the subscription core.
//!
//! # Main Types
//!
//! - [`NodeId`] - Stable identifier of a node in the remote address space
//! - [`TreePosition`] - Handle of a row in the locally materialized tree
//! - [`Variant`] / [`DataValue`] - Attribute values as delivered by the server
//! - [`ReferenceDescription`] - Result row of a browse call
//! - [`DataChangeNotification`] - `(node, value, timestamp)` published per node
//! - [`EventNotification`] - An event raised by a node with an event subscription
//! - [`ControllerState`] - Observable state of a per-position controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque, stable identifier of a node in the remote address space.
///
/// Stored as the canonical string form (`ns=2;s=Machine.Speed`). Cloning is
/// cheap so ids can be handed across threads freely.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Index into the local tree arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TreePosition(pub u32);

impl TreePosition {
    pub const INVALID: TreePosition = TreePosition(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TreePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TreePosition(INVALID)")
        } else {
            write!(f, "TreePosition({})", self.0)
        }
    }
}

impl fmt::Display for TreePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Server-side handle of a data-change monitored item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u32);

/// OPC-UA node classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeClass {
    #[default]
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

impl NodeClass {
    /// Whether nodes of this class carry a Value attribute that can be monitored
    pub fn has_value(&self) -> bool {
        matches!(self, NodeClass::Variable | NodeClass::VariableType)
    }

    /// Whether nodes of this class can be an event notifier
    pub fn can_notify_events(&self) -> bool {
        matches!(self, NodeClass::Object | NodeClass::View)
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeClass::Object => write!(f, "Object"),
            NodeClass::Variable => write!(f, "Variable"),
            NodeClass::Method => write!(f, "Method"),
            NodeClass::ObjectType => write!(f, "ObjectType"),
            NodeClass::VariableType => write!(f, "VariableType"),
            NodeClass::ReferenceType => write!(f, "ReferenceType"),
            NodeClass::DataType => write!(f, "DataType"),
            NodeClass::View => write!(f, "View"),
        }
    }
}

/// Attribute ids read by the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    NodeId,
    NodeClass,
    BrowseName,
    DisplayName,
    Description,
    Value,
    DataType,
}

/// A protocol value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    NodeId(NodeId),
    NodeClass(NodeClass),
    Array(Vec<Variant>),
}

impl Variant {
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => Ok(()),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => f.write_str(v),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::NodeClass(v) => write!(f, "{}", v),
            Variant::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

/// A value together with the timestamps the server attached to it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Variant,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_source_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    pub fn with_server_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(ts);
        self
    }

    /// Source timestamp, else server timestamp, else the local clock
    pub fn resolved_timestamp(&self) -> DateTime<Utc> {
        self.source_timestamp
            .or(self.server_timestamp)
            .unwrap_or_else(Utc::now)
    }
}

/// One row of a browse result
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub node_id: NodeId,
    pub browse_name: String,
    pub display_name: String,
    pub node_class: NodeClass,
    pub type_definition: Option<NodeId>,
}

/// Payload published on a node's notification channel
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    pub node: NodeId,
    pub value: Variant,
    pub timestamp: DateTime<Utc>,
}

/// An event delivered for a node with an event subscription
#[derive(Debug, Clone, PartialEq)]
pub struct EventNotification {
    /// Node the subscription was created on
    pub notifier: NodeId,
    /// Node that raised the event
    pub source: NodeId,
    pub message: String,
    /// 1 (lowest) to 1000 (highest)
    pub severity: u16,
    pub time: DateTime<Utc>,
}

impl fmt::Display for EventNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.time.format("%H:%M:%S%.3f"),
            self.severity,
            self.source,
            self.message
        )
    }
}

/// Session connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected to any server
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection error occurred
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Observable state of a per-position subscription controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    SubscribeRunning,
    UnsubscribeRunning,
    /// A collapse arrived while the subscribe task was still walking
    SubscribeRunningUnsubscribeWaiting,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "Idle"),
            ControllerState::SubscribeRunning => write!(f, "SubscribeRunning"),
            ControllerState::UnsubscribeRunning => write!(f, "UnsubscribeRunning"),
            ControllerState::SubscribeRunningUnsubscribeWaiting => {
                write!(f, "SubscribeRunning+UnsubscribeWaiting")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new("ns=2;s=Machine.Speed");
        assert_eq!(id.to_string(), "ns=2;s=Machine.Speed");
        assert_eq!(id, NodeId::from("ns=2;s=Machine.Speed"));
    }

    #[test]
    fn test_tree_position_invalid() {
        assert!(!TreePosition::INVALID.is_valid());
        assert!(TreePosition(0).is_valid());
        assert_eq!(TreePosition(7).index(), 7);
    }

    #[test]
    fn test_resolved_timestamp_prefers_source() {
        let source = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let server = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();

        let dv = DataValue::new(1.0)
            .with_source_timestamp(source)
            .with_server_timestamp(server);
        assert_eq!(dv.resolved_timestamp(), source);

        let dv = DataValue::new(1.0).with_server_timestamp(server);
        assert_eq!(dv.resolved_timestamp(), server);

        let before = Utc::now();
        let dv = DataValue::new(1.0);
        assert!(dv.resolved_timestamp() >= before);
    }

    #[test]
    fn test_variant_display() {
        let v = Variant::Array(vec![Variant::Int64(1), Variant::from("a")]);
        assert_eq!(v.to_string(), "[1, a]");
        assert_eq!(Variant::Empty.to_string(), "");
    }

    #[test]
    fn test_node_class_has_value() {
        assert!(NodeClass::Variable.has_value());
        assert!(!NodeClass::Object.has_value());
        assert!(!NodeClass::Method.has_value());
        assert!(NodeClass::Object.can_notify_events());
        assert!(!NodeClass::Variable.can_notify_events());
    }
}
