//! The state module holds the [ChainObserver] struct, the chain state shared between the
//! reconciliation loop and the speculative builders.

use crate::{ChainListener, SharedObserver};
use ethers::types::H256;
use opinion_validator_solvers::rollup::{
    ChainParams, ExecutionAssertion, Machine, Node, NodeGraph, OpinionError, PendingInbox,
    PreparedAssertion, TimeBounds,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The [ChainObserver] struct holds the validator's view of the rollup chain and its opinion on
/// it: the node it currently believes is the correct tip of the dispute graph.
pub struct ChainObserver<M> {
    /// The hash of the known valid node. Only ever moves to a direct successor.
    known_valid_node: H256,
    /// The dispute graph built from posted assertions.
    pub node_graph: NodeGraph<M>,
    /// The pending inbox.
    pub pending_inbox: PendingInbox,
    /// The latest observed L1 block number.
    pub latest_block_number: u64,
    /// The listeners notified of opinion changes, in registration order.
    listeners: Vec<Arc<dyn ChainListener<M>>>,
}

impl<M: Machine> ChainObserver<M> {
    /// Creates a new [ChainObserver] whose genesis node runs `machine` and is known valid.
    pub fn new(machine: M, params: ChainParams) -> Self {
        let node_graph = NodeGraph::new(machine, params);
        Self {
            known_valid_node: node_graph.genesis_hash(),
            node_graph,
            pending_inbox: PendingInbox::default(),
            latest_block_number: 0,
            listeners: Vec::new(),
        }
    }

    /// Wraps the [ChainObserver] for sharing across tasks.
    pub fn into_shared(self) -> SharedObserver<M> {
        Arc::new(RwLock::new(self))
    }

    /// Registers a [ChainListener].
    pub fn add_listener(&mut self, listener: Arc<dyn ChainListener<M>>) {
        self.listeners.push(listener);
    }

    /// The hash of the known valid node.
    pub fn known_valid_hash(&self) -> H256 {
        self.known_valid_node
    }

    /// Returns the known valid node.
    pub fn known_valid_node(&self) -> Result<&Node<M>, OpinionError> {
        self.node_graph
            .node(&self.known_valid_node)
            .ok_or(OpinionError::UnknownNode(self.known_valid_node))
    }

    /// Returns `true` if no assertion has been posted on top of the known valid node yet.
    pub fn known_valid_is_leaf(&self) -> bool {
        self.node_graph.is_leaf(&self.known_valid_node)
    }

    /// Returns the time bounds new assertions should be executed within.
    pub fn current_time_bounds(&self) -> TimeBounds {
        TimeBounds::starting_at(
            self.latest_block_number,
            self.node_graph.params.max_time_bounds_width,
        )
    }

    /// Moves the known valid pointer to its successor `next`, attaching the machine the
    /// successor continues from. Without a machine, the successor inherits a copy of the current
    /// known valid machine.
    pub(crate) fn advance_known_valid(
        &mut self,
        next: H256,
        machine: Option<M>,
        assertion: Option<ExecutionAssertion>,
    ) -> Result<(), OpinionError> {
        let current = self.known_valid_node()?;
        let current_hash = current.hash;
        let machine = match machine {
            Some(machine) => machine,
            None => current.machine()?.clone(),
        };

        let successor = self
            .node_graph
            .node_mut(&next)
            .ok_or(OpinionError::UnknownNode(next))?;
        if successor.prev_hash != current_hash {
            return Err(OpinionError::NotASuccessor {
                parent: current_hash,
                child: next,
            });
        }
        successor.machine = Some(machine);
        if assertion.is_some() {
            successor.assertion = assertion;
        }
        self.known_valid_node = next;

        Ok(())
    }

    pub(crate) fn notify_advanced_known_assertion(
        &self,
        assertion: &ExecutionAssertion,
        tx_hash: H256,
    ) {
        for listener in &self.listeners {
            listener.advanced_known_assertion(assertion, tx_hash);
        }
    }

    pub(crate) fn notify_advanced_known_valid_node(&self, node_hash: H256) {
        for listener in &self.listeners {
            listener.advanced_known_valid_node(node_hash);
        }
    }

    pub(crate) fn notify_assertion_prepared(&self, prepared: &PreparedAssertion<M>) {
        for listener in &self.listeners {
            listener.assertion_prepared(prepared.clone());
        }
    }
}
