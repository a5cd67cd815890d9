//! Shared fixtures for the driver tests.

use crate::{ChainListener, ChainObserver, SharedObserver};
use ethers::types::{Bytes, H256};
use opinion_validator_solvers::rollup::{
    AlphabetMachine, ChainParams, DisputableNode, ExecutionAssertion, PreparedAssertion,
    Successors, TimeTicks,
};
use std::sync::{Arc, Mutex};

/// A notification received by a [RecordingListener].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    AdvancedKnownAssertion(H256),
    AdvancedKnownValidNode(H256),
    AssertionPrepared(H256),
}

/// A [ChainListener] that records every notification.
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<Event>>,
    prepared: Mutex<Vec<PreparedAssertion<AlphabetMachine>>>,
}

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn last_prepared(&self) -> Option<PreparedAssertion<AlphabetMachine>> {
        self.prepared.lock().unwrap().last().cloned()
    }
}

impl ChainListener<AlphabetMachine> for RecordingListener {
    fn advanced_known_assertion(&self, _: &ExecutionAssertion, tx_hash: H256) {
        self.events
            .lock()
            .unwrap()
            .push(Event::AdvancedKnownAssertion(tx_hash));
    }

    fn advanced_known_valid_node(&self, node_hash: H256) {
        self.events
            .lock()
            .unwrap()
            .push(Event::AdvancedKnownValidNode(node_hash));
    }

    fn assertion_prepared(&self, prepared: PreparedAssertion<AlphabetMachine>) {
        self.events
            .lock()
            .unwrap()
            .push(Event::AssertionPrepared(prepared.leaf_hash));
        self.prepared.lock().unwrap().push(prepared);
    }
}

/// Creates a shared observer running the alphabet machine, with `count` messages in the inbox
/// and a [RecordingListener] attached.
pub(crate) fn observer_with_messages(
    count: u8,
) -> (SharedObserver<AlphabetMachine>, Arc<RecordingListener>) {
    let mut observer = ChainObserver::new(AlphabetMachine::default(), ChainParams::default());
    for i in 0..count {
        observer.pending_inbox.append(Bytes::from(vec![i]));
    }
    let listener = Arc::new(RecordingListener::default());
    observer.add_listener(listener.clone());
    (observer.into_shared(), listener)
}

/// Posts `disputable` on top of `parent`, as if it had been seen on-chain.
pub(crate) async fn post(
    observer: &SharedObserver<AlphabetMachine>,
    parent: H256,
    disputable: DisputableNode,
) -> Successors {
    observer
        .write()
        .await
        .node_graph
        .create_nodes_from_assertion(parent, disputable, TimeTicks(100), disputable.hash())
        .unwrap()
}
