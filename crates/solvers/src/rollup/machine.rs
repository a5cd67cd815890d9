//! The machine module holds the [Machine] trait, the contract every virtual machine replayed by
//! the validator must fulfill.

use super::{ExecutionAssertion, TimeBounds};
use ethers::types::{Bytes, H256};
use std::fmt;

/// The [BlockReason] enum describes why a [Machine] stopped executing before its step budget ran
/// out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The machine halted and will never run again.
    Halted,
    /// The machine hit an unrecoverable error.
    Error,
    /// The machine is waiting on the inbox. It may continue once new messages are available or
    /// once block `timeout` has been reached.
    Inbox {
        /// The block number after which the machine may proceed without new messages.
        timeout: u64,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Halted => write!(f, "halted"),
            BlockReason::Error => write!(f, "error"),
            BlockReason::Inbox { timeout } => write!(f, "inbox blocked until block {}", timeout),
        }
    }
}

/// The [Machine] trait defines the interface of a deterministic virtual machine replayed by the
/// validator. [Clone] must produce an independent deep copy; the validator never shares mutable
/// execution state between a confirmed node and a speculative build.
pub trait Machine: Clone + Send + Sync + 'static {
    /// Returns the hash of the machine's current state.
    fn hash(&self) -> H256;

    /// Executes the machine in place.
    ///
    /// ### Takes
    /// - `max_steps`: The maximum number of steps to run.
    /// - `time_bounds`: The block range the execution is bound to.
    /// - `messages`: The inbox messages available to inbox instructions.
    ///
    /// ### Returns
    /// - `(ExecutionAssertion, u64)`: The execution result and the number of steps actually run,
    ///   which never exceeds `max_steps`.
    fn execute_assertion(
        &mut self,
        max_steps: u64,
        time_bounds: &TimeBounds,
        messages: &[Bytes],
    ) -> (ExecutionAssertion, u64);

    /// Returns the reason the last execution stopped early, if it did.
    fn last_block_reason(&self) -> Option<BlockReason>;

    /// Returns `true` if running the machine now cannot make progress.
    ///
    /// ### Takes
    /// - `latest_block`: The latest observed block number.
    /// - `have_new_messages`: Whether the inbox holds messages the machine has not consumed.
    fn is_blocked(&self, latest_block: u64, have_new_messages: bool) -> bool {
        match self.last_block_reason() {
            Some(BlockReason::Halted) | Some(BlockReason::Error) => true,
            Some(BlockReason::Inbox { timeout }) => !have_new_messages && latest_block < timeout,
            None => false,
        }
    }
}
