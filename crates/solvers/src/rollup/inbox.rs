//! The inbox module contains the [PendingInbox], the append-only, hash-addressed log of messages
//! available to the machine, and the [MessageStack] digest over a range of it.

use super::hash_chain;
use ethers::{
    types::{Bytes, H256},
    utils::keccak256,
};
use std::collections::HashMap;

/// Returns the hash of the canonical empty message sequence.
pub fn empty_message_slice_hash() -> H256 {
    H256::from(keccak256([0u8; 0]))
}

/// The [MessageStack] struct is the hash chain over a contiguous run of inbox messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStack {
    top_hash: H256,
    top_count: u64,
}

impl Default for MessageStack {
    fn default() -> Self {
        Self {
            top_hash: empty_message_slice_hash(),
            top_count: 0,
        }
    }
}

impl MessageStack {
    /// Builds the stack over `messages`.
    pub fn from_messages(messages: &[Bytes]) -> Self {
        messages.iter().fold(Self::default(), |mut stack, message| {
            stack.push(message);
            stack
        })
    }

    /// Pushes a message on top of the stack.
    pub fn push(&mut self, message: &[u8]) {
        self.top_hash = hash_chain(self.top_hash, message);
        self.top_count += 1;
    }

    /// The hash of the top of the stack.
    pub fn top_hash(&self) -> H256 {
        self.top_hash
    }

    /// The number of messages in the stack.
    pub fn top_count(&self) -> u64 {
        self.top_count
    }
}

/// The [PendingInbox] struct holds every message delivered to the rollup, addressed by the hash
/// of the inbox top after each message.
#[derive(Debug, Clone)]
pub struct PendingInbox {
    /// The messages, in delivery order.
    messages: Vec<Bytes>,
    /// The running digest of the whole inbox.
    stack: MessageStack,
    /// The height (message count) at which each top hash was the top of the inbox.
    heights: HashMap<H256, u64>,
}

impl Default for PendingInbox {
    fn default() -> Self {
        let stack = MessageStack::default();
        Self {
            messages: Vec::new(),
            heights: HashMap::from([(stack.top_hash(), 0)]),
            stack,
        }
    }
}

impl PendingInbox {
    /// Appends a message and returns the new top hash.
    pub fn append(&mut self, message: Bytes) -> H256 {
        self.stack.push(&message);
        self.messages.push(message);
        self.heights.insert(self.stack.top_hash(), self.stack.top_count());
        self.stack.top_hash()
    }

    /// The hash of the current inbox top.
    pub fn top_hash(&self) -> H256 {
        self.stack.top_hash()
    }

    /// The number of messages in the inbox.
    pub fn top_count(&self) -> u64 {
        self.stack.top_count()
    }

    /// Returns the height at which `hash` was the inbox top, if it ever was.
    pub fn height(&self, hash: &H256) -> Option<u64> {
        self.heights.get(hash).copied()
    }

    /// Returns the [MessageStack] over the messages after `from` up to and including `to`.
    /// Returns `None` if either hash is unknown or `to` precedes `from`.
    pub fn substack(&self, from: &H256, to: &H256) -> Option<MessageStack> {
        self.value_for_subsequence(from, to)
            .map(MessageStack::from_messages)
    }

    /// Returns the messages after `from` up to and including `to`. Returns `None` if either hash
    /// is unknown or `to` precedes `from`.
    pub fn value_for_subsequence(&self, from: &H256, to: &H256) -> Option<&[Bytes]> {
        let start = self.height(from)? as usize;
        let end = self.height(to)? as usize;
        self.messages.get(start..end)
    }
}
