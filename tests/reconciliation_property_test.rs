//! Property tests for convergence of the subscription set
//!
//! Random expand/collapse sequences, with random pauses between events so
//! they interleave with running walks, must always settle to "all children
//! subscribed" when the row ends expanded and "none" when it ends collapsed.

mod common;

use common::builders::FolderBuilder;
use common::mock_helpers::{slow_client, Harness};
use proptest::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use uabrowser::backend::{MockClientBackend, UaClient};
use uabrowser::tree::{DataChangeDispatcher, DataChangeSubscriptionSet, SignalTable};
use uabrowser::types::NodeId;

#[derive(Debug, Clone, Copy)]
enum Event {
    Expand,
    Collapse,
    Pause(u64),
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        4 => Just(Event::Expand),
        4 => Just(Event::Collapse),
        1 => (1u64..4).prop_map(Event::Pause),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    #[serial]
    fn prop_expand_collapse_sequences_converge(events in prop::collection::vec(event(), 1..24)) {
        let space = FolderBuilder::new("P").variables(&["A", "B", "C", "D"]).build();
        let h = Harness::with_client(slow_client(space, 1), 3);
        let p = h.open(&["i=85", "P"]);
        let children = h.children(p);

        let mut expanded = false;
        for event in &events {
            match event {
                Event::Expand => {
                    expanded = true;
                    h.session.on_tree_expanded(p);
                }
                Event::Collapse => {
                    expanded = false;
                    h.session.on_tree_collapsed(p);
                }
                Event::Pause(ms) => std::thread::sleep(Duration::from_millis(*ms)),
            }
        }
        h.settle();

        let expected = if expanded { children } else { Vec::new() };
        prop_assert_eq!(h.session.subscribed_nodes(), expected.clone());
        prop_assert_eq!(h.client.monitored_nodes(), expected);
        prop_assert_eq!(h.client.max_in_flight() <= 1, true);
    }

    #[test]
    fn prop_concurrent_set_operations_stay_consistent(
        ops in prop::collection::vec((0usize..4, any::<bool>()), 1..40)
    ) {
        let space = FolderBuilder::new("P").variables(&["A", "B", "C", "D"]).build();
        let client = Arc::new(MockClientBackend::new(space));
        client.connect("opc.tcp://mock:4840").unwrap();
        let dispatcher = Arc::new(DataChangeDispatcher::new(Arc::new(SignalTable::default())));
        let set = Arc::new(DataChangeSubscriptionSet::new(client.clone(), dispatcher));
        let nodes: Vec<NodeId> = ["P.A", "P.B", "P.C", "P.D"].iter().map(|n| NodeId::new(*n)).collect();

        // Two threads replay the same operations concurrently.
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let set = set.clone();
                let ops = ops.clone();
                let nodes = nodes.clone();
                std::thread::spawn(move || {
                    for (i, subscribe) in ops {
                        let _ = if subscribe {
                            set.subscribe(&nodes[i])
                        } else {
                            set.unsubscribe(&nodes[i])
                        };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        prop_assert_eq!(set.subscribed_nodes(), client.monitored_nodes());
    }
}
