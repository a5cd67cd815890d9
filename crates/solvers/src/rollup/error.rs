//! The error module contains the [OpinionError] enum.

use ethers::types::H256;
use thiserror::Error;

/// Errors raised when the dispute graph and the known valid pointer disagree, or when the graph
/// rejects a posting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpinionError {
    /// A hash referenced by the graph or the pointer has no node.
    #[error("node {0:?} is not present in the dispute graph")]
    UnknownNode(H256),

    /// A successor node carries no posted assertion.
    #[error("node {0:?} has no posted assertion attached")]
    MissingDisputable(H256),

    /// A node that should have been adopted as known valid carries no machine.
    #[error("node {0:?} has no machine snapshot")]
    MissingMachine(H256),

    /// The pointer was asked to move to a node that is not a direct successor.
    #[error("node {child:?} is not a successor of the known valid node {parent:?}")]
    NotASuccessor {
        /// The current known valid node.
        parent: H256,
        /// The rejected node.
        child: H256,
    },

    /// An assertion was posted on a node that already has successors.
    #[error("node {0:?} already has posted successors")]
    SuccessorsAlreadyPosted(H256),

    /// An assertion was posted whose imported message count overflows the parent's pending
    /// count.
    #[error("assertion on node {0:?} overflows the pending message count")]
    PendingCountOverflow(H256),
}

impl OpinionError {
    /// Returns `true` if the error means the graph and the known valid pointer have diverged.
    /// Rejected postings are not fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OpinionError::SuccessorsAlreadyPosted(_) | OpinionError::PendingCountOverflow(_)
        )
    }
}
