//! The graph module holds the in-memory dispute graph: the [Node]s created from posted
//! assertions and the set of current leaves.

use super::{
    empty_message_slice_hash, ChildType, DisputableNode, ExecutionAssertion, Machine,
    OpinionError, Successors, TimeTicks, VMProtoData,
};
use ethers::{
    abi::{self, Token},
    types::{H256, U256},
    utils::keccak256,
};
use std::collections::{HashMap, HashSet};

/// The [ChainParams] struct holds the protocol parameters of the rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    /// The maximum number of steps a single assertion may execute.
    pub max_execution_steps: u64,
    /// The width, in blocks, of the time bounds used for new assertions.
    pub max_time_bounds_width: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            max_execution_steps: 1_000_000,
            max_time_bounds_width: 20,
        }
    }
}

/// A [Node] is a vertex of the dispute graph.
#[derive(Debug, Clone)]
pub struct Node<M> {
    /// The hash of the node.
    pub hash: H256,
    /// The hash of the parent node. Zero for the genesis node.
    pub prev_hash: H256,
    /// The hash of the node's data.
    pub node_data_hash: H256,
    /// The deadline by which the node can be challenged.
    pub deadline: TimeTicks,
    /// How the node relates to its parent.
    pub link_type: ChildType,
    /// The protocol state the node commits to.
    pub vm_proto_data: VMProtoData,
    /// The posted assertion the node was created from. `None` for the genesis node.
    pub disputable: Option<DisputableNode>,
    /// The hash of the transaction that posted the assertion.
    pub assertion_tx_hash: H256,
    /// The successor slots, one per [ChildType].
    pub successor_hashes: Successors,
    /// The distance from the genesis node.
    pub depth: u64,
    /// The machine snapshot, attached once the node has been the known valid node.
    pub machine: Option<M>,
    /// The execution result, attached once the node has been adopted as a valid child.
    pub assertion: Option<ExecutionAssertion>,
}

impl<M: Machine> Node<M> {
    /// Returns the node's machine snapshot.
    pub fn machine(&self) -> Result<&M, OpinionError> {
        self.machine
            .as_ref()
            .ok_or(OpinionError::MissingMachine(self.hash))
    }

    /// Returns the posted assertion the node was created from.
    pub fn disputable(&self) -> Result<&DisputableNode, OpinionError> {
        self.disputable
            .as_ref()
            .ok_or(OpinionError::MissingDisputable(self.hash))
    }
}

/// The [NodeGraph] struct is the dispute graph of posted assertions.
#[derive(Debug, Clone)]
pub struct NodeGraph<M> {
    /// The protocol parameters.
    pub params: ChainParams,
    /// Every node, keyed by hash.
    nodes: HashMap<H256, Node<M>>,
    /// The hashes of the nodes without posted successors.
    leaves: HashSet<H256>,
    /// The hash of the genesis node.
    genesis_hash: H256,
}

impl<M: Machine> NodeGraph<M> {
    /// Creates a new [NodeGraph] whose genesis node runs `machine` from an empty inbox.
    pub fn new(machine: M, params: ChainParams) -> Self {
        let vm_proto_data = VMProtoData {
            machine_hash: machine.hash(),
            pending_top: empty_message_slice_hash(),
            pending_count: 0,
        };
        let node_data_hash = H256::zero();
        let hash = node_hash(
            H256::zero(),
            ChildType::Valid,
            node_data_hash,
            &vm_proto_data,
        );
        let genesis = Node {
            hash,
            prev_hash: H256::zero(),
            node_data_hash,
            deadline: TimeTicks::default(),
            link_type: ChildType::Valid,
            vm_proto_data,
            disputable: None,
            assertion_tx_hash: H256::zero(),
            successor_hashes: Successors::default(),
            depth: 0,
            machine: Some(machine),
            assertion: None,
        };

        Self {
            params,
            nodes: HashMap::from([(hash, genesis)]),
            leaves: HashSet::from([hash]),
            genesis_hash: hash,
        }
    }

    /// The hash of the genesis node.
    pub fn genesis_hash(&self) -> H256 {
        self.genesis_hash
    }

    /// Returns the node with the given hash.
    pub fn node(&self, hash: &H256) -> Option<&Node<M>> {
        self.nodes.get(hash)
    }

    /// Returns the node with the given hash, mutably.
    pub fn node_mut(&mut self, hash: &H256) -> Option<&mut Node<M>> {
        self.nodes.get_mut(hash)
    }

    /// Returns `true` if the node has no posted successors.
    pub fn is_leaf(&self, hash: &H256) -> bool {
        self.leaves.contains(hash)
    }

    /// Iterates over the hashes of the current leaves.
    pub fn leaves(&self) -> impl Iterator<Item = &H256> {
        self.leaves.iter()
    }

    /// Ingests an assertion posted on top of `parent`, creating one child per [ChildType].
    ///
    /// ### Takes
    /// - `parent`: The hash of the leaf the assertion was posted on.
    /// - `disputable`: The posted params and claim.
    /// - `deadline`: The challenge deadline of the new children.
    /// - `assertion_tx_hash`: The hash of the posting transaction.
    ///
    /// ### Returns
    /// - `Ok(Successors)`: The hashes of the four new children.
    /// - `Err(OpinionError)`: The parent is unknown or already has successors, or the claim
    ///   imports more messages than the pending count can hold.
    pub fn create_nodes_from_assertion(
        &mut self,
        parent: H256,
        disputable: DisputableNode,
        deadline: TimeTicks,
        assertion_tx_hash: H256,
    ) -> Result<Successors, OpinionError> {
        let prev = self
            .nodes
            .get(&parent)
            .ok_or(OpinionError::UnknownNode(parent))?;
        if !prev.successor_hashes.is_empty() {
            return Err(OpinionError::SuccessorsAlreadyPosted(parent));
        }
        let valid_pending_count = prev
            .vm_proto_data
            .pending_count
            .checked_add(disputable.params.imported_message_count)
            .ok_or(OpinionError::PendingCountOverflow(parent))?;

        let children = ChildType::ALL.map(|link_type| {
            let vm_proto_data = match link_type {
                ChildType::Valid => VMProtoData {
                    machine_hash: disputable.claim.assertion_stub.after_hash,
                    pending_top: disputable.claim.after_pending_top,
                    pending_count: valid_pending_count,
                },
                _ => prev.vm_proto_data,
            };
            let node_data_hash = H256::from(keccak256(abi::encode(&[
                Token::Uint(U256::from(link_type as u8)),
                Token::FixedBytes(disputable.hash().as_bytes().to_vec()),
            ])));
            Node {
                hash: node_hash(parent, link_type, node_data_hash, &vm_proto_data),
                prev_hash: parent,
                node_data_hash,
                deadline,
                link_type,
                vm_proto_data,
                disputable: Some(disputable),
                assertion_tx_hash,
                successor_hashes: Successors::default(),
                depth: prev.depth + 1,
                machine: None,
                assertion: None,
            }
        });

        let mut successors = Successors::default();
        for child in children {
            successors.set(child.link_type, child.hash);
            self.leaves.insert(child.hash);
            self.nodes.insert(child.hash, child);
        }
        self.leaves.remove(&parent);
        if let Some(prev) = self.nodes.get_mut(&parent) {
            prev.successor_hashes = successors;
        }

        tracing::debug!(target: "dispute-graph", "Created successors of node {:?}", parent);
        Ok(successors)
    }
}

/// Computes the hash identifying a node.
fn node_hash(
    prev_hash: H256,
    link_type: ChildType,
    node_data_hash: H256,
    vm_proto_data: &VMProtoData,
) -> H256 {
    H256::from(keccak256(abi::encode(&[
        Token::FixedBytes(prev_hash.as_bytes().to_vec()),
        Token::Uint(U256::from(link_type as u8)),
        Token::FixedBytes(node_data_hash.as_bytes().to_vec()),
        Token::FixedBytes(vm_proto_data.hash().as_bytes().to_vec()),
    ])))
}
