//! The classifier module decides which [ChildType] a posted assertion deserves by replaying the
//! machine locally.

use super::{AssertionClaim, AssertionParams, ChildType, ExecutionAssertion, Machine, MessageStack};
use ethers::types::Bytes;

/// Classifies a posted assertion against a local replay.
///
/// The checks run in a fixed order and the first failure wins: pending height, then imported
/// message set, then execution. The function only mutates `machine`, which is advanced by the
/// replay; identical inputs always produce identical outputs.
///
/// ### Takes
/// - `params`: The posted [AssertionParams].
/// - `claim`: The posted [AssertionClaim].
/// - `prev_pending_count`: The pending count of the node the assertion was posted on.
/// - `claim_height`: The inbox height at `claim.after_pending_top`, if that hash is known.
/// - `message_stack`: The local digest of the messages between the node's pending top and
///   `claim.after_pending_top`.
/// - `messages`: The same messages, fed to the replay.
/// - `machine`: A private copy of the node's machine.
///
/// ### Returns
/// - `(ChildType, Option<ExecutionAssertion>)`: The classification, with the replayed
///   execution only when it is [ChildType::Valid].
pub fn get_node_opinion<M: Machine>(
    params: &AssertionParams,
    claim: &AssertionClaim,
    prev_pending_count: u64,
    claim_height: Option<u64>,
    message_stack: &MessageStack,
    messages: &[Bytes],
    machine: &mut M,
) -> (ChildType, Option<ExecutionAssertion>) {
    let expected_height = prev_pending_count.checked_add(params.imported_message_count);
    if claim_height.is_none() || expected_height != claim_height {
        tracing::debug!(target: "opinion-classifier", "Pending height mismatch: expected {:?}, claimed {:?}", expected_height, claim_height);
        return (ChildType::InvalidPendingHeight, None);
    }

    if message_stack.top_hash() != claim.imported_messages_slice {
        tracing::debug!(target: "opinion-classifier", "Imported message slice mismatch: local {:?}, claimed {:?}", message_stack.top_hash(), claim.imported_messages_slice);
        return (ChildType::InvalidMessageSet, None);
    }

    let (assertion, steps_run) =
        machine.execute_assertion(params.num_steps, &params.time_bounds, messages);
    if steps_run != params.num_steps || assertion.stub() != claim.assertion_stub {
        tracing::debug!(target: "opinion-classifier", "Execution mismatch after {} of {} steps", steps_run, params.num_steps);
        return (ChildType::InvalidExecution, None);
    }

    (ChildType::Valid, Some(assertion))
}
