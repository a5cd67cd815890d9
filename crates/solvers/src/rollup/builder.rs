//! The builder module computes the next assertion on top of a leaf from a detached snapshot of
//! that leaf.

use super::{
    empty_message_slice_hash, AssertionClaim, AssertionParams, ChildType, Machine, MessageStack,
    PreparedAssertion, TimeBounds, TimeTicks, VMProtoData,
};
use ethers::types::{Bytes, H256};

/// A [LeafSnapshot] holds owned copies of everything needed to build an assertion on top of a
/// leaf, so that the replay can run without any access to shared chain state.
#[derive(Debug, Clone)]
pub struct LeafSnapshot<M> {
    /// The hash of the leaf.
    pub leaf_hash: H256,
    /// The hash of the leaf's parent.
    pub prev_hash: H256,
    /// The node data hash of the leaf.
    pub node_data_hash: H256,
    /// The deadline of the leaf.
    pub deadline: TimeTicks,
    /// The link type of the leaf.
    pub link_type: ChildType,
    /// The protocol state of the leaf.
    pub before_state: VMProtoData,
    /// The inbox top at snapshot time.
    pub after_pending_top: H256,
    /// The digest of the messages between the leaf's pending top and `after_pending_top`.
    pub message_stack: MessageStack,
    /// The messages between the leaf's pending top and `after_pending_top`.
    pub messages: Vec<Bytes>,
    /// The time bounds to execute within.
    pub time_bounds: TimeBounds,
    /// A private copy of the leaf's machine.
    pub machine: M,
}

/// Replays the snapshot's machine for up to `max_steps` steps and packages the result as a
/// [PreparedAssertion].
///
/// If the execution never reached an inbox instruction, the assertion imports nothing and its
/// claim leaves the pending top where the leaf had it.
pub fn build_assertion<M: Machine>(
    snapshot: LeafSnapshot<M>,
    max_steps: u64,
) -> PreparedAssertion<M> {
    let LeafSnapshot {
        leaf_hash,
        prev_hash,
        node_data_hash,
        deadline,
        link_type,
        before_state,
        after_pending_top,
        message_stack,
        messages,
        time_bounds,
        mut machine,
    } = snapshot;

    let (assertion, steps_run) = machine.execute_assertion(max_steps, &time_bounds, &messages);
    tracing::info!(
        target: "assertion-builder",
        "Prepared assertion of {} steps, ending with {}",
        steps_run,
        machine
            .last_block_reason()
            .map_or_else(|| "step limit".to_string(), |reason| reason.to_string())
    );

    let (imported_message_count, claimed_pending_top, imported_messages_slice) =
        if assertion.did_inbox_insn {
            (
                message_stack.top_count(),
                after_pending_top,
                message_stack.top_hash(),
            )
        } else {
            (0, before_state.pending_top, empty_message_slice_hash())
        };

    PreparedAssertion {
        leaf_hash,
        prev_prev_leaf_hash: prev_hash,
        prev_data_hash: node_data_hash,
        prev_deadline: deadline,
        prev_child_type: link_type,
        before_state,
        params: AssertionParams {
            num_steps: steps_run,
            time_bounds,
            imported_message_count,
        },
        claim: AssertionClaim {
            after_pending_top: claimed_pending_top,
            imported_messages_slice,
            assertion_stub: assertion.stub(),
        },
        assertion,
        machine,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rollup::{get_node_opinion, AlphabetMachine, BlockReason, PendingInbox};

    fn snapshot(inbox: &PendingInbox, machine: AlphabetMachine) -> LeafSnapshot<AlphabetMachine> {
        let before_state = VMProtoData {
            machine_hash: machine.hash(),
            pending_top: empty_message_slice_hash(),
            pending_count: 0,
        };
        let messages = inbox
            .value_for_subsequence(&before_state.pending_top, &inbox.top_hash())
            .unwrap()
            .to_vec();
        LeafSnapshot {
            leaf_hash: H256::repeat_byte(1),
            prev_hash: H256::zero(),
            node_data_hash: H256::zero(),
            deadline: TimeTicks(0),
            link_type: ChildType::Valid,
            before_state,
            after_pending_top: inbox.top_hash(),
            message_stack: MessageStack::from_messages(&messages),
            messages,
            time_bounds: TimeBounds::starting_at(0, 10),
            machine,
        }
    }

    fn inbox_with_messages() -> PendingInbox {
        let mut inbox = PendingInbox::default();
        inbox.append(Bytes::from_static(b"hello"));
        inbox.append(Bytes::from_static(b"world"));
        inbox
    }

    #[test]
    fn inbox_read_imports_the_whole_range() {
        let inbox = inbox_with_messages();
        let prepared = build_assertion(snapshot(&inbox, AlphabetMachine::default()), 10);

        // 'a' reads the inbox, 'b' to 'd' log, and 'e' blocks waiting for more messages.
        assert!(prepared.assertion.did_inbox_insn);
        assert_eq!(prepared.params.num_steps, 4);
        assert!(matches!(
            prepared.machine.last_block_reason(),
            Some(BlockReason::Inbox { timeout: 10 })
        ));
        assert_eq!(prepared.params.imported_message_count, 2);
        assert_eq!(prepared.claim.after_pending_top, inbox.top_hash());
        assert_eq!(prepared.claim.imported_messages_slice, inbox.top_hash());
        assert_eq!(prepared.claim.assertion_stub, prepared.assertion.stub());
    }

    #[test]
    fn no_inbox_read_imports_nothing() {
        let inbox = inbox_with_messages();
        // Starting on 'b', three consonants run before the inbox read at 'e'.
        let prepared = build_assertion(snapshot(&inbox, AlphabetMachine::starting_at(1)), 3);

        assert!(!prepared.assertion.did_inbox_insn);
        assert_eq!(prepared.params.num_steps, 3);
        assert_eq!(prepared.params.imported_message_count, 0);
        assert_eq!(prepared.claim.after_pending_top, empty_message_slice_hash());
        assert_eq!(prepared.claim.imported_messages_slice, empty_message_slice_hash());
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let inbox = inbox_with_messages();
        let first = build_assertion(snapshot(&inbox, AlphabetMachine::default()), 40);
        let second = build_assertion(snapshot(&inbox, AlphabetMachine::default()), 40);
        assert_eq!(first.params, second.params);
        assert_eq!(first.claim, second.claim);
    }

    #[test]
    fn timed_out_inbox_read_imports_nothing() {
        let inbox = PendingInbox::default();
        let mut machine = AlphabetMachine::default();
        machine.execute_assertion(10, &TimeBounds::starting_at(0, 10), &[]);

        let mut leaf = snapshot(&inbox, machine);
        leaf.time_bounds = TimeBounds::starting_at(10, 10);
        let prepared = build_assertion(leaf, 10);

        assert!(prepared.assertion.did_inbox_insn);
        assert_eq!(prepared.params.num_steps, 4);
        assert_eq!(prepared.params.imported_message_count, 0);
        assert_eq!(prepared.claim.after_pending_top, empty_message_slice_hash());
        assert_eq!(prepared.claim.imported_messages_slice, empty_message_slice_hash());
    }

    #[test]
    fn prepared_assertion_classifies_as_valid() {
        let inbox = inbox_with_messages();
        let leaf = snapshot(&inbox, AlphabetMachine::default());
        let prepared = build_assertion(leaf.clone(), 40);

        let (opinion, assertion) = get_node_opinion(
            &prepared.params,
            &prepared.claim,
            leaf.before_state.pending_count,
            inbox.height(&prepared.claim.after_pending_top),
            &leaf.message_stack,
            &leaf.messages,
            &mut leaf.machine.clone(),
        );
        assert_eq!(opinion, ChildType::Valid);
        assert_eq!(assertion, Some(prepared.assertion));
    }

    #[test]
    fn clones_do_not_alias_the_machine() {
        let inbox = inbox_with_messages();
        let prepared = build_assertion(snapshot(&inbox, AlphabetMachine::starting_at(1)), 5);
        let mut copy = prepared.clone();
        copy.machine.execute_assertion(5, &TimeBounds::default(), &[]);
        copy.params.num_steps = 0;

        assert_ne!(copy.machine.hash(), prepared.machine.hash());
        assert_eq!(prepared.params.num_steps, 5);
    }
}
