use ethers::types::H256;
use opinion_validator_solvers::rollup::{ExecutionAssertion, PreparedAssertion};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ChainObserver;

/// The [SharedObserver] type is the [ChainObserver] as shared between the reconciliation loop and
/// the speculative builders. Readers snapshot under the read lock; the write lock is only taken to
/// swap the known valid pointer.
pub type SharedObserver<M> = Arc<RwLock<ChainObserver<M>>>;

/// A [ChainListener] is notified of the validator's opinion changes, in the order they happen.
///
/// Listeners are called while the observer's read lock is held and must not try to lock the
/// observer themselves.
pub trait ChainListener<M>: Send + Sync {
    /// A posted assertion was confirmed valid by local replay.
    fn advanced_known_assertion(&self, _assertion: &ExecutionAssertion, _tx_hash: H256) {}

    /// The known valid pointer moved to `node_hash`.
    fn advanced_known_valid_node(&self, _node_hash: H256) {}

    /// A candidate assertion on top of the known valid leaf is ready to be posted.
    fn assertion_prepared(&self, _prepared: PreparedAssertion<M>) {}
}
