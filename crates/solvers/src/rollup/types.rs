//! The types module contains the value types shared by the classifier, the assertion builder
//! and the dispute graph.

use ethers::{
    abi::{self, Token},
    types::{Bytes, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

/// Folds `item` into the hash chain ending at `prev`: `keccak256(prev ++ keccak256(item))`.
pub fn hash_chain(prev: H256, item: &[u8]) -> H256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(prev.as_bytes());
    buf[32..].copy_from_slice(&keccak256(item));
    H256::from(keccak256(buf))
}

/// The [ChildType] enum classifies how a node relates to its parent. Its discriminant doubles as
/// the index of the node's slot in its parent's [Successors] array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChildType {
    /// The claimed import count does not match the inbox height at the claimed cut point.
    InvalidPendingHeight = 0,
    /// The claimed imported message slice does not match the inbox contents.
    InvalidMessageSet = 1,
    /// Replaying the machine does not reproduce the claimed execution.
    InvalidExecution = 2,
    /// The assertion is correct.
    Valid = 3,
}

impl ChildType {
    /// The number of [ChildType] variants, and so the number of successor slots per node.
    pub const COUNT: usize = 4;

    /// All variants, in slot order.
    pub const ALL: [ChildType; Self::COUNT] = [
        ChildType::InvalidPendingHeight,
        ChildType::InvalidMessageSet,
        ChildType::InvalidExecution,
        ChildType::Valid,
    ];

    /// Returns the successor slot index of the [ChildType].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ChildType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChildType::InvalidPendingHeight),
            1 => Ok(ChildType::InvalidMessageSet),
            2 => Ok(ChildType::InvalidExecution),
            3 => Ok(ChildType::Valid),
            _ => Err(anyhow::anyhow!("Invalid child type: {}", value)),
        }
    }
}

/// The [Successors] struct holds the four successor slots of a node. An empty slot means no
/// party has posted that classification yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Successors([Option<H256>; ChildType::COUNT]);

impl Successors {
    /// Returns the hash stored in the slot for `child_type`, if any.
    pub fn get(&self, child_type: ChildType) -> Option<H256> {
        self.0[child_type.index()]
    }

    /// Fills the slot for `child_type`.
    pub fn set(&mut self, child_type: ChildType, hash: H256) {
        self.0[child_type.index()] = Some(hash);
    }

    /// Returns the first populated slot in slot order.
    pub fn first(&self) -> Option<H256> {
        self.0.iter().flatten().next().copied()
    }

    /// Returns `true` if no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    /// Iterates over the populated slots together with their [ChildType].
    pub fn iter(&self) -> impl Iterator<Item = (ChildType, H256)> + '_ {
        ChildType::ALL
            .into_iter()
            .filter_map(move |child_type| self.get(child_type).map(|hash| (child_type, hash)))
    }
}

/// A deadline expressed in time ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeTicks(pub u64);

/// The [TimeBounds] struct holds the inclusive block range an assertion may be executed within.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBounds {
    /// The lowest block number.
    pub start: u64,
    /// The highest block number.
    pub end: u64,
}

impl TimeBounds {
    /// Creates new [TimeBounds] starting at `start` and spanning `width` blocks.
    pub fn starting_at(start: u64, width: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(width),
        }
    }
}

/// The [AssertionParams] struct describes the resource and input envelope consumed by an
/// asserted execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionParams {
    /// The number of machine steps executed.
    pub num_steps: u64,
    /// The block range the execution was bound to.
    pub time_bounds: TimeBounds,
    /// The number of pending inbox messages imported by the execution.
    pub imported_message_count: u64,
}

/// The [AssertionStub] is the compact digest of an [ExecutionAssertion]'s outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionStub {
    /// The hash of the machine after execution.
    pub after_hash: H256,
    /// Whether an inbox instruction was executed.
    pub did_inbox_insn: bool,
    /// The gas consumed.
    pub num_gas: u64,
    /// The head of the hash chain over the outgoing messages.
    pub last_message_hash: H256,
    /// The head of the hash chain over the emitted logs.
    pub last_log_hash: H256,
}

impl AssertionStub {
    /// Returns the hash committing to every field of the stub.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(abi::encode(&[
            Token::FixedBytes(self.after_hash.as_bytes().to_vec()),
            Token::Bool(self.did_inbox_insn),
            Token::Uint(U256::from(self.num_gas)),
            Token::FixedBytes(self.last_message_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.last_log_hash.as_bytes().to_vec()),
        ])))
    }
}

/// The [AssertionClaim] is the committed form of an assertion as posted on-chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionClaim {
    /// The pending inbox top after the messages imported by the assertion.
    pub after_pending_top: H256,
    /// The hash of the imported message slice.
    pub imported_messages_slice: H256,
    /// The digest of the execution outputs.
    pub assertion_stub: AssertionStub,
}

/// The [ExecutionAssertion] is the full result of replaying a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAssertion {
    /// The hash of the machine after execution.
    pub after_hash: H256,
    /// Whether an inbox instruction was executed.
    pub did_inbox_insn: bool,
    /// The gas consumed.
    pub num_gas: u64,
    /// The outgoing messages, in emission order.
    pub out_msgs: Vec<Bytes>,
    /// The logs, in emission order.
    pub logs: Vec<Bytes>,
}

impl ExecutionAssertion {
    /// Projects the assertion onto its [AssertionStub].
    pub fn stub(&self) -> AssertionStub {
        AssertionStub {
            after_hash: self.after_hash,
            did_inbox_insn: self.did_inbox_insn,
            num_gas: self.num_gas,
            last_message_hash: self
                .out_msgs
                .iter()
                .fold(H256::zero(), |acc, msg| hash_chain(acc, msg)),
            last_log_hash: self
                .logs
                .iter()
                .fold(H256::zero(), |acc, log| hash_chain(acc, log)),
        }
    }
}

/// The [VMProtoData] struct is the protocol-level snapshot of a node's virtual machine state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VMProtoData {
    /// The hash of the machine.
    pub machine_hash: H256,
    /// The pending inbox top the machine has consumed up to.
    pub pending_top: H256,
    /// The number of pending inbox messages consumed.
    pub pending_count: u64,
}

impl VMProtoData {
    /// Returns the hash committing to the protocol state.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(abi::encode(&[
            Token::FixedBytes(self.machine_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.pending_top.as_bytes().to_vec()),
            Token::Uint(U256::from(self.pending_count)),
        ])))
    }
}

/// The [DisputableNode] struct is the assertion posted on top of a node. All four children
/// created from a single posting share it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputableNode {
    /// The posted [AssertionParams].
    pub params: AssertionParams,
    /// The posted [AssertionClaim].
    pub claim: AssertionClaim,
}

impl DisputableNode {
    /// Returns the hash committing to the posted params and claim.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(abi::encode(&[
            Token::Uint(U256::from(self.params.num_steps)),
            Token::Uint(U256::from(self.params.time_bounds.start)),
            Token::Uint(U256::from(self.params.time_bounds.end)),
            Token::Uint(U256::from(self.params.imported_message_count)),
            Token::FixedBytes(self.claim.after_pending_top.as_bytes().to_vec()),
            Token::FixedBytes(self.claim.imported_messages_slice.as_bytes().to_vec()),
            Token::FixedBytes(self.claim.assertion_stub.hash().as_bytes().to_vec()),
        ])))
    }
}

/// A [PreparedAssertion] is a locally computed candidate assertion on top of a leaf that has not
/// been posted yet.
///
/// Cloning is a deep copy: the machine snapshot is cloned rather than shared, so a clone handed
/// to a listener can never alter the cached original.
#[derive(Debug, Clone)]
pub struct PreparedAssertion<M> {
    /// The hash of the leaf the assertion extends.
    pub leaf_hash: H256,
    /// The hash of the leaf's parent.
    pub prev_prev_leaf_hash: H256,
    /// The node data hash of the leaf.
    pub prev_data_hash: H256,
    /// The deadline of the leaf.
    pub prev_deadline: TimeTicks,
    /// The link type of the leaf.
    pub prev_child_type: ChildType,
    /// The protocol state of the leaf before execution.
    pub before_state: VMProtoData,
    /// The params to post.
    pub params: AssertionParams,
    /// The claim to post.
    pub claim: AssertionClaim,
    /// The full execution result.
    pub assertion: ExecutionAssertion,
    /// The machine after execution.
    pub machine: M,
}

impl<M> PreparedAssertion<M> {
    /// Returns the [DisputableNode] that posting this assertion would create.
    pub fn disputable(&self) -> DisputableNode {
        DisputableNode {
            params: self.params,
            claim: self.claim,
        }
    }
}
