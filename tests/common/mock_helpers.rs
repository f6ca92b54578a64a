//! Mock construction helpers

use std::sync::Arc;
use std::time::Duration;
use uabrowser::backend::{MockAddressSpace, MockCall, MockClientBackend};
use uabrowser::config::AppConfig;
use uabrowser::tree::ChildSource;
use uabrowser::types::{NodeId, TreePosition};
use uabrowser::{BrowserSession, UiReceiver};

pub const ENDPOINT: &str = "opc.tcp://mock:4840";

/// A connected session over a mock client
pub struct Harness {
    pub client: Arc<MockClientBackend>,
    pub session: BrowserSession,
    pub ui: UiReceiver,
}

impl Harness {
    pub fn new(space: MockAddressSpace) -> Self {
        Self::with_client(MockClientBackend::new(space), 4)
    }

    pub fn with_client(client: MockClientBackend, threads: usize) -> Self {
        let client = Arc::new(client);
        let mut config = AppConfig::default();
        config.workers.threads = threads;
        let (session, ui) = BrowserSession::new(client.clone(), &config).unwrap();
        session.connect(ENDPOINT).unwrap();
        Self {
            client,
            session,
            ui,
        }
    }

    /// Fetch rows from the root down to `node` and return its position
    ///
    /// The children of the returned row are fetched too.
    pub fn open(&self, path: &[&str]) -> TreePosition {
        let mut pos = self.session.tree().root().unwrap();
        for node in path {
            self.session.fetch_more(pos).unwrap();
            pos = self.position(node);
        }
        self.session.fetch_more(pos).unwrap();
        pos
    }

    pub fn position(&self, node: &str) -> TreePosition {
        self.session
            .tree()
            .position_of(&NodeId::new(node))
            .unwrap_or_else(|| panic!("{} not in tree", node))
    }

    pub fn children(&self, position: TreePosition) -> Vec<NodeId> {
        self.session
            .tree()
            .children_of(position)
            .unwrap()
            .into_iter()
            .map(|(_, n)| n)
            .collect()
    }

    pub fn settle(&self) {
        assert!(
            self.session.wait_idle(super::settle_timeout()),
            "session did not settle"
        );
    }

    /// Subscribe/unsubscribe calls only, in order
    pub fn subscription_calls(&self) -> Vec<MockCall> {
        self.client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Subscribe(_) | MockCall::Unsubscribe(_)))
            .collect()
    }
}

pub fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|n| NodeId::new(*n)).collect()
}

pub fn slow_client(space: MockAddressSpace, delay_ms: u64) -> MockClientBackend {
    MockClientBackend::new(space).with_call_delay(Duration::from_millis(delay_ms))
}
