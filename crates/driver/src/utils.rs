use ethers::types::{Bytes, H256};
use opinion_validator_solvers::rollup::{MessageStack, PendingInbox};

/// Materializes the inbox messages after `from` up to and including `to`.
///
/// # Arguments
/// * `inbox` - The pending inbox to read from.
/// * `from` - The pending top the range starts after.
/// * `to` - The pending top the range ends at.
///
/// # Returns
/// * The [MessageStack] digest of the range and the messages themselves. Unknown or reversed
/// ranges yield an empty range; callers check the claimed height before trusting it.
pub fn message_range(inbox: &PendingInbox, from: &H256, to: &H256) -> (MessageStack, Vec<Bytes>) {
    let messages = inbox
        .value_for_subsequence(from, to)
        .unwrap_or_default()
        .to_vec();
    (MessageStack::from_messages(&messages), messages)
}
