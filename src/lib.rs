//! # uabrowser: OPC-UA address space browser with live values
//!
//! Browses a server's node hierarchy as a lazily loaded tree and keeps a
//! data-change subscription alive for every child of every expanded row.
//! Expanding and collapsing rows (arbitrarily fast, in any order) drives the
//! subscription set; background workers do the network I/O so the caller's
//! thread never blocks on it.
//!
//! ## Architecture
//!
//! - **Tree**: local mirror of the address space, one row per node
//! - **Controllers**: per-row state machines deciding whether the row's
//!   children should be subscribed or unsubscribed next
//! - **Workers**: a thread pool running the subscribe/unsubscribe walks
//! - **Signals**: per-node crossbeam channels carrying `(node, value, timestamp)`
//!
//! ## Configuration
//!
//! `config.toml` and `app_state.json` live in the platform data directory
//! under `io.uabrowser`:
//!
//! - **Linux**: `~/.local/share/io.uabrowser/`
//! - **macOS**: `~/Library/Application Support/io.uabrowser/`
//! - **Windows**: `%APPDATA%\io.uabrowser\`
//!
//! ## Example
//!
//! ```ignore
//! use uabrowser::{AppConfig, BrowserSession, MockAddressSpace, MockClientBackend, NodeId};
//! use std::sync::Arc;
//!
//! let client = Arc::new(MockClientBackend::new(MockAddressSpace::demo()));
//! let (session, ui) = BrowserSession::new(client, &AppConfig::default())?;
//!
//! let root = session.connect("opc.tcp://localhost:4840")?;
//! session.fetch_more(root)?;
//! session.on_tree_expanded(root);
//!
//! let speed = session.subscribe_node(&NodeId::new("ns=2;s=Line1.Speed"));
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use backend::{BrowserSession, UaClient, UiEvent, UiReceiver};
#[cfg(feature = "mock-client")]
pub use backend::{MockAddressSpace, MockClientBackend};
pub use config::{AppConfig, AppState};
pub use error::{Result, UaBrowserError};
pub use types::{
    ConnectionStatus, ControllerState, DataChangeNotification, EventNotification, NodeId,
    TreePosition, Variant,
};
