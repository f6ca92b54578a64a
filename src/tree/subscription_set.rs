//! Data-change subscription set
//!
//! Tracks which nodes currently hold a server-side data-change monitored item
//! and issues the subscribe/unsubscribe calls to the client. At most one
//! subscription exists per [`NodeId`]; both operations are idempotent.
//!
//! # Concurrency
//!
//! The set is shared by every controller's tasks. Protocol calls are made
//! outside the lock, and at most one call per node is in flight: a subscribe
//! parks a `Pending` entry and an unsubscribe a `Removing` one. A request
//! that finds a call in flight for its node only records its intent on the
//! entry (`cancelled` / `resubscribe`) and returns; the caller that owns the
//! call applies the last recorded intent once the server replies.
//! [`clear`](DataChangeSubscriptionSet::clear) bumps a generation counter so
//! replies that straddle a disconnect are discarded. Callers that outlive a
//! clear pass the generation they started in (`subscribe_in` /
//! `unsubscribe_in`) and become no-ops.

use crate::backend::client_trait::{DataChangeHandler, UaClient};
use crate::error::Result;
use crate::types::{NodeId, SubscriptionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Pending { generation: u64, cancelled: bool },
    Active(SubscriptionHandle),
    Removing { generation: u64, resubscribe: bool },
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<NodeId, Entry>,
    generation: u64,
}

/// Statistics for subscription calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionStats {
    /// Monitored items created
    pub subscribed: u64,
    /// Subscribe calls rejected as not monitorable
    pub not_monitorable: u64,
    /// Subscribe calls that failed otherwise
    pub failed_subscribes: u64,
    /// Monitored items deleted
    pub unsubscribed: u64,
    /// Unsubscribe calls that failed
    pub failed_unsubscribes: u64,
    /// Total time spent in protocol calls (microseconds)
    pub total_call_time_us: u64,
    /// Duration of the last protocol call (microseconds)
    pub last_call_time_us: u64,
}

impl SubscriptionStats {
    fn record_call(&mut self, started: Instant) {
        let us = started.elapsed().as_micros() as u64;
        self.total_call_time_us += us;
        self.last_call_time_us = us;
    }

    /// Average protocol call time in microseconds
    pub fn avg_call_time_us(&self) -> f64 {
        let calls = self.subscribed
            + self.not_monitorable
            + self.failed_subscribes
            + self.unsubscribed
            + self.failed_unsubscribes;
        if calls == 0 {
            0.0
        } else {
            self.total_call_time_us as f64 / calls as f64
        }
    }
}

pub struct DataChangeSubscriptionSet {
    client: Arc<dyn UaClient>,
    handler: Arc<dyn DataChangeHandler>,
    inner: Mutex<Inner>,
    stats: Mutex<SubscriptionStats>,
}

impl DataChangeSubscriptionSet {
    pub fn new(client: Arc<dyn UaClient>, handler: Arc<dyn DataChangeHandler>) -> Self {
        Self {
            client,
            handler,
            inner: Mutex::new(Inner::default()),
            stats: Mutex::new(SubscriptionStats::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_stats(&self, f: impl FnOnce(&mut SubscriptionStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Current generation; bumped by every [`clear`](Self::clear)
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Subscribe to data changes of `node`
    ///
    /// No-op if the node is already subscribed (or a subscribe is in flight).
    /// A not-monitorable node yields an ignorable error and stays untracked.
    pub fn subscribe(&self, node: &NodeId) -> Result<()> {
        self.subscribe_in(node, self.generation())
    }

    /// [`subscribe`](Self::subscribe) on behalf of a caller that started in
    /// `generation`; a no-op once the set has been cleared since
    pub fn subscribe_in(&self, node: &NodeId, generation: u64) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                tracing::debug!("Ignoring subscribe of {} from a cleared session", node);
                return Ok(());
            }
            match inner.entries.get_mut(node) {
                Some(Entry::Active(_)) => return Ok(()),
                Some(Entry::Pending { cancelled, .. }) => {
                    *cancelled = false;
                    return Ok(());
                }
                Some(Entry::Removing { resubscribe, .. }) => {
                    *resubscribe = true;
                    return Ok(());
                }
                None => {}
            }
            inner.entries.insert(
                node.clone(),
                Entry::Pending {
                    generation,
                    cancelled: false,
                },
            );
        }

        let started = Instant::now();
        let result = self.client.subscribe_data_change(node, self.handler.clone());

        let mut inner = self.lock();
        let pending = match inner.entries.get(node) {
            Some(Entry::Pending { generation: g, cancelled }) if *g == generation => Some(*cancelled),
            _ => None,
        };

        match result {
            Ok(handle) => {
                self.with_stats(|s| {
                    s.subscribed += 1;
                    s.record_call(started);
                });
                match pending {
                    None => {
                        tracing::debug!("Discarding subscription for {} from a cleared session", node);
                        Ok(())
                    }
                    Some(true) => {
                        inner.entries.insert(
                            node.clone(),
                            Entry::Removing {
                                generation,
                                resubscribe: false,
                            },
                        );
                        drop(inner);
                        tracing::debug!("Subscription for {} cancelled while in flight", node);
                        self.issue_unsubscribe(node, generation)
                    }
                    Some(false) => {
                        inner.entries.insert(node.clone(), Entry::Active(handle));
                        tracing::trace!("Subscribed to {} ({:?})", node, handle);
                        Ok(())
                    }
                }
            }
            Err(e) => {
                if pending.is_some() {
                    inner.entries.remove(node);
                }
                drop(inner);
                self.with_stats(|s| {
                    if e.is_ignorable() {
                        s.not_monitorable += 1;
                    } else {
                        s.failed_subscribes += 1;
                    }
                    s.record_call(started);
                });
                Err(e)
            }
        }
    }

    /// Unsubscribe from data changes of `node`; no-op if not subscribed
    pub fn unsubscribe(&self, node: &NodeId) -> Result<()> {
        self.unsubscribe_in(node, self.generation())
    }

    /// [`unsubscribe`](Self::unsubscribe) bound to `generation`, like
    /// [`subscribe_in`](Self::subscribe_in)
    pub fn unsubscribe_in(&self, node: &NodeId, generation: u64) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return Ok(());
            }
            match inner.entries.get_mut(node) {
                None => return Ok(()),
                Some(Entry::Pending { cancelled, .. }) => {
                    *cancelled = true;
                    return Ok(());
                }
                Some(Entry::Removing { resubscribe, .. }) => {
                    *resubscribe = false;
                    return Ok(());
                }
                Some(Entry::Active(_)) => {}
            }
            inner.entries.insert(
                node.clone(),
                Entry::Removing {
                    generation,
                    resubscribe: false,
                },
            );
        }
        self.issue_unsubscribe(node, generation)
    }

    /// Delete the monitored item; the entry must be `Removing`
    fn issue_unsubscribe(&self, node: &NodeId, generation: u64) -> Result<()> {
        let started = Instant::now();
        let result = self.client.unsubscribe_data_change(node);
        self.with_stats(|s| {
            if result.is_ok() {
                s.unsubscribed += 1;
            } else {
                s.failed_unsubscribes += 1;
            }
            s.record_call(started);
        });

        let resubscribe = {
            let mut inner = self.lock();
            match inner.entries.get(node) {
                Some(Entry::Removing {
                    generation: g,
                    resubscribe,
                }) if *g == generation => {
                    let resubscribe = *resubscribe;
                    inner.entries.remove(node);
                    resubscribe
                }
                _ => false,
            }
        };

        if let Err(ref e) = result {
            tracing::error!("Failed to unsubscribe from {}: {}", node, e);
            return result;
        }
        if resubscribe {
            tracing::debug!("{} re-subscribed while unsubscribing", node);
            return self.subscribe_in(node, generation);
        }
        Ok(())
    }

    /// Forget every subscription without calling the server
    ///
    /// Only valid when the session is being torn down, which drops the
    /// monitored items server-side.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.generation += 1;
    }

    /// Whether `node` has an active (not in-flight) subscription
    pub fn is_subscribed(&self, node: &NodeId) -> bool {
        matches!(self.lock().entries.get(node), Some(Entry::Active(_)))
    }

    /// Active subscriptions, sorted
    pub fn subscribed_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Active(_)))
            .map(|(n, _)| n.clone())
            .collect();
        nodes.sort();
        nodes
    }

    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| matches!(e, Entry::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client_trait::MockUaClient;
    use crate::error::UaBrowserError;
    use crate::tree::dispatcher::DataChangeDispatcher;
    use crate::tree::signals::SignalTable;
    use mockall::predicate::eq;

    fn handler() -> Arc<dyn DataChangeHandler> {
        Arc::new(DataChangeDispatcher::new(Arc::new(SignalTable::default())))
    }

    fn node(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn test_subscribe_twice_calls_server_once() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .withf(|n, _| n.as_str() == "ns=2;s=A")
            .times(1)
            .returning(|_, _| Ok(SubscriptionHandle(1)));

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        set.subscribe(&node("ns=2;s=A")).unwrap();
        set.subscribe(&node("ns=2;s=A")).unwrap();

        assert_eq!(set.len(), 1);
        assert!(set.is_subscribed(&node("ns=2;s=A")));
    }

    #[test]
    fn test_unsubscribe_twice_calls_server_once() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client
            .expect_unsubscribe_data_change()
            .with(eq(node("ns=2;s=A")))
            .times(1)
            .returning(|_| Ok(()));

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        set.subscribe(&node("ns=2;s=A")).unwrap();
        set.unsubscribe(&node("ns=2;s=A")).unwrap();
        set.unsubscribe(&node("ns=2;s=A")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_is_ok() {
        let client = MockUaClient::new();
        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        assert!(set.unsubscribe(&node("ns=2;s=Never")).is_ok());
    }

    #[test]
    fn test_not_monitorable_is_ignorable_and_untracked() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .returning(|n, _| Err(UaBrowserError::AttributeNotMonitorable(n.clone())));

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        let err = set.subscribe(&node("ns=2;s=Folder")).unwrap_err();
        assert!(err.is_ignorable());
        assert!(set.is_empty());
        assert_eq!(set.stats().not_monitorable, 1);
    }

    #[test]
    fn test_protocol_error_leaves_other_entries() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .withf(|n, _| n.as_str() == "ns=2;s=A")
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client
            .expect_subscribe_data_change()
            .withf(|n, _| n.as_str() == "ns=2;s=B")
            .returning(|_, _| Err(UaBrowserError::protocol("BadTooManyMonitoredItems", "full")));

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        set.subscribe(&node("ns=2;s=A")).unwrap();
        let err = set.subscribe(&node("ns=2;s=B")).unwrap_err();
        assert!(!err.is_ignorable());
        assert_eq!(set.subscribed_nodes(), vec![node("ns=2;s=A")]);
        assert_eq!(set.stats().failed_subscribes, 1);
    }

    #[test]
    fn test_clear_does_not_call_server() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client.expect_unsubscribe_data_change().never();

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        set.subscribe(&node("ns=2;s=A")).unwrap();
        set.subscribe(&node("ns=2;s=B")).unwrap();
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_failure_is_reported() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client
            .expect_unsubscribe_data_change()
            .returning(|_| Err(UaBrowserError::protocol("BadSessionClosed", "closed")));

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        set.subscribe(&node("ns=2;s=A")).unwrap();
        assert!(set.unsubscribe(&node("ns=2;s=A")).is_err());
        assert!(!set.is_subscribed(&node("ns=2;s=A")));
        assert_eq!(set.stats().failed_unsubscribes, 1);
    }
    #[test]
    fn test_subscribe_during_unsubscribe_restores_after_reply() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .times(2)
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client
            .expect_unsubscribe_data_change()
            .times(1)
            .returning(move |_| {
                entered_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
                Ok(())
            });

        let set = Arc::new(DataChangeSubscriptionSet::new(Arc::new(client), handler()));
        set.subscribe(&node("ns=2;s=A")).unwrap();

        let worker = {
            let set = set.clone();
            std::thread::spawn(move || set.unsubscribe(&node("ns=2;s=A")))
        };
        entered_rx.recv().unwrap();

        // Recorded on the in-flight entry, no second call yet.
        set.subscribe(&node("ns=2;s=A")).unwrap();
        assert!(!set.is_subscribed(&node("ns=2;s=A")));

        release_tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert!(set.is_subscribed(&node("ns=2;s=A")));
        assert_eq!(set.stats().subscribed, 2);
        assert_eq!(set.stats().unsubscribed, 1);
    }
    #[test]
    fn test_calls_from_a_cleared_generation_are_ignored() {
        let mut client = MockUaClient::new();
        client
            .expect_subscribe_data_change()
            .withf(|n, _| n.as_str() == "ns=2;s=A")
            .times(1)
            .returning(|_, _| Ok(SubscriptionHandle(1)));
        client.expect_unsubscribe_data_change().never();

        let set = DataChangeSubscriptionSet::new(Arc::new(client), handler());
        let before = set.generation();
        set.clear();
        assert_eq!(set.generation(), before + 1);

        set.subscribe_in(&node("ns=2;s=Late"), before).unwrap();
        assert!(set.is_empty());

        set.subscribe(&node("ns=2;s=A")).unwrap();
        set.unsubscribe_in(&node("ns=2;s=A"), before).unwrap();
        assert!(set.is_subscribed(&node("ns=2;s=A")));
    }
}
