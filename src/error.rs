//! Error handling for the uabrowser crate
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library.
//!
//! Protocol failures come in two flavours: the ignorable
//! [`UaBrowserError::AttributeNotMonitorable`] (the server refuses to create a
//! monitored item for the node's Value attribute) and everything else. Tasks
//! swallow the former and halt their walk on the latter.

use crate::types::{NodeId, TreePosition};
use thiserror::Error;

/// Main error type for uabrowser operations
#[derive(Error, Debug)]
pub enum UaBrowserError {
    /// The node has no monitorable Value attribute (e.g. an Object or Method)
    #[error("Attribute not monitorable for node {0}")]
    AttributeNotMonitorable(NodeId),

    /// Any other protocol-level failure reported by the client
    #[error("Protocol error ({status}): {message}")]
    Protocol { status: String, message: String },

    /// Operation requires an active session
    #[error("Not connected to a server")]
    NotConnected,

    /// The server does not know the node
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// The local tree has no row for this position
    #[error("Unknown tree position: {0}")]
    UnknownPosition(TreePosition),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<UaBrowserError>,
    },
}

impl UaBrowserError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        UaBrowserError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a protocol error from a status name and message
    pub fn protocol(status: impl Into<String>, message: impl Into<String>) -> Self {
        UaBrowserError::Protocol {
            status: status.into(),
            message: message.into(),
        }
    }

    /// Whether a subscribe/unsubscribe walk may treat this as success
    pub fn is_ignorable(&self) -> bool {
        match self {
            UaBrowserError::AttributeNotMonitorable(_) => true,
            UaBrowserError::WithContext { source, .. } => source.is_ignorable(),
            _ => false,
        }
    }
}

/// Result type alias for uabrowser operations
pub type Result<T> = std::result::Result<T, UaBrowserError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UaBrowserError::protocol("BadTimeout", "request timed out");
        assert_eq!(err.to_string(), "Protocol error (BadTimeout): request timed out");
    }

    #[test]
    fn test_error_with_context() {
        let err = UaBrowserError::NotConnected;
        let with_ctx = err.with_context("Failed to browse");
        assert!(with_ctx.to_string().contains("Failed to browse"));
    }

    #[test]
    fn test_ignorable_classification() {
        let node = NodeId::new("ns=2;s=Folder");
        assert!(UaBrowserError::AttributeNotMonitorable(node.clone()).is_ignorable());
        assert!(UaBrowserError::AttributeNotMonitorable(node)
            .with_context("subscribe")
            .is_ignorable());
        assert!(!UaBrowserError::protocol("BadNodeIdUnknown", "gone").is_ignorable());
        assert!(!UaBrowserError::NotConnected.is_ignorable());
    }
}
