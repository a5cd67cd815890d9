use crate::{utils, SharedObserver, SpeculativeCache};
use anyhow::Result;
use ethers::types::{Bytes, H256};
use opinion_validator_solvers::rollup::{
    build_assertion, get_node_opinion, ChildType, DisputableNode, ExecutionAssertion,
    LeafSnapshot, Machine, MessageStack, OpinionError, PreparedAssertion,
};

/// How the assertion posted on top of the known valid node will be judged.
enum Resolution<M> {
    /// Our own cached build matches the posted assertion exactly; adopt it without replaying.
    Cached {
        assertion: ExecutionAssertion,
        machine: M,
    },
    /// Replay the posted assertion against the known valid machine.
    Replay {
        posted: DisputableNode,
        prev_pending_count: u64,
        claim_height: Option<u64>,
        message_stack: MessageStack,
        messages: Vec<Bytes>,
        machine: M,
    },
}

/// Judges the assertion posted on top of the known valid node and moves the known valid pointer
/// to the successor matching our opinion. Every transition drops all speculative builds.
///
/// Replays never run while the observer is locked. The write lock is only held for the pointer
/// swap itself.
///
/// # Returns
/// * `Ok(true)` if the pointer advanced.
/// * `Ok(false)` if there was nothing to resolve yet: the known valid node is a leaf, or the
/// successor matching our opinion has not been posted.
/// * `Err` if the graph and the pointer have diverged.
pub async fn update_current<M: Machine>(
    observer: &SharedObserver<M>,
    cache: &mut SpeculativeCache<M>,
) -> Result<bool> {
    let (current_hash, successors, resolution) = {
        let chain = observer.read().await;
        let current = chain.known_valid_node()?;
        let Some(first) = current.successor_hashes.first() else {
            return Ok(false);
        };
        let posted = *chain
            .node_graph
            .node(&first)
            .ok_or(OpinionError::UnknownNode(first))?
            .disputable()?;

        let resolution = match cache.prepared(&current.hash) {
            Some(prepared) if prepared.params == posted.params && prepared.claim == posted.claim => {
                tracing::debug!(target: "opinion-driver", "Posted assertion on {:?} matches our prepared assertion, skipping replay.", current.hash);
                Resolution::Cached {
                    assertion: prepared.assertion.clone(),
                    machine: prepared.machine.clone(),
                }
            }
            _ => {
                let after_pending_top = posted.claim.after_pending_top;
                let (message_stack, messages) = utils::message_range(
                    &chain.pending_inbox,
                    &current.vm_proto_data.pending_top,
                    &after_pending_top,
                );
                Resolution::Replay {
                    posted,
                    prev_pending_count: current.vm_proto_data.pending_count,
                    claim_height: chain.pending_inbox.height(&after_pending_top),
                    message_stack,
                    messages,
                    machine: current.machine()?.clone(),
                }
            }
        };

        (current.hash, current.successor_hashes, resolution)
    };

    let (opinion, assertion, next_machine) = match resolution {
        Resolution::Cached { assertion, machine } => {
            (ChildType::Valid, Some(assertion), Some(machine))
        }
        Resolution::Replay {
            posted,
            prev_pending_count,
            claim_height,
            message_stack,
            messages,
            mut machine,
        } => {
            let (opinion, assertion) = get_node_opinion(
                &posted.params,
                &posted.claim,
                prev_pending_count,
                claim_height,
                &message_stack,
                &messages,
                &mut machine,
            );
            (opinion, assertion, (opinion == ChildType::Valid).then_some(machine))
        }
    };
    tracing::info!(target: "opinion-driver", "Opinion on the assertion posted on {:?}: {:?}", current_hash, opinion);

    // Everything speculative was built against the node we are leaving.
    cache.clear();

    let Some(next) = successors.get(opinion) else {
        tracing::warn!(target: "opinion-driver", "No {:?} successor of {:?} has been posted, waiting.", opinion, current_hash);
        return Ok(false);
    };

    {
        let chain = observer.read().await;
        let node = chain
            .node_graph
            .node(&next)
            .ok_or(OpinionError::UnknownNode(next))?;
        if let Some(assertion) = &assertion {
            chain.notify_advanced_known_assertion(assertion, node.assertion_tx_hash);
        }
    }

    {
        let mut chain = observer.write().await;
        if chain.known_valid_hash() != current_hash {
            tracing::warn!(target: "opinion-driver", "Known valid node moved while judging {:?}, discarding opinion.", current_hash);
            return Ok(false);
        }
        chain.advance_known_valid(next, next_machine, assertion)?;
    }

    observer.read().await.notify_advanced_known_valid_node(next);
    tracing::info!(target: "opinion-driver", "Advanced known valid node to {:?}", next);

    Ok(true)
}

/// Builds the next assertion on top of `leaf`.
///
/// The leaf's state is snapshotted under the read lock and the replay runs on the blocking pool
/// without holding any lock.
///
/// # Returns
/// * `Ok(Some(PreparedAssertion))` once the replay finishes.
/// * `Ok(None)` if `leaf` is no longer the known valid leaf.
pub async fn prepare_assertion<M: Machine>(
    observer: SharedObserver<M>,
    leaf: H256,
) -> Result<Option<PreparedAssertion<M>>> {
    let (snapshot, max_steps) = {
        let chain = observer.read().await;
        if chain.known_valid_hash() != leaf || !chain.known_valid_is_leaf() {
            return Ok(None);
        }
        let current = chain.known_valid_node()?;
        let before_state = current.vm_proto_data;
        let after_pending_top = chain.pending_inbox.top_hash();
        let (message_stack, messages) = utils::message_range(
            &chain.pending_inbox,
            &before_state.pending_top,
            &after_pending_top,
        );

        let snapshot = LeafSnapshot {
            leaf_hash: current.hash,
            prev_hash: current.prev_hash,
            node_data_hash: current.node_data_hash,
            deadline: current.deadline,
            link_type: current.link_type,
            before_state,
            after_pending_top,
            message_stack,
            messages,
            time_bounds: chain.current_time_bounds(),
            machine: current.machine()?.clone(),
        };
        (snapshot, chain.node_graph.params.max_execution_steps)
    };

    tracing::debug!(target: "opinion-driver", "Building assertion on top of {:?}", leaf);
    let prepared = tokio::task::spawn_blocking(move || build_assertion(snapshot, max_steps)).await?;

    Ok(Some(prepared))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{observer_with_messages, post, Event};
    use opinion_validator_solvers::rollup::{AlphabetMachine, Machine};

    #[tokio::test]
    async fn leaf_has_nothing_to_resolve() {
        let (observer, listener) = observer_with_messages(2);
        let mut cache = SpeculativeCache::default();
        assert!(!update_current(&observer, &mut cache).await.unwrap());
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn valid_successor_is_adopted_by_replay() {
        let (observer, listener) = observer_with_messages(2);
        let genesis = observer.read().await.known_valid_hash();
        let prepared = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        let successors = post(&observer, genesis, prepared.disputable()).await;
        let valid = successors.get(ChildType::Valid).unwrap();

        let mut cache = SpeculativeCache::default();
        assert!(update_current(&observer, &mut cache).await.unwrap());

        let chain = observer.read().await;
        assert_eq!(chain.known_valid_hash(), valid);
        let node = chain.known_valid_node().unwrap();
        assert_eq!(node.assertion.as_ref(), Some(&prepared.assertion));
        assert_eq!(node.machine.as_ref().unwrap().hash(), prepared.machine.hash());
        assert_eq!(node.vm_proto_data.pending_count, 2);
        assert_eq!(
            listener.events(),
            vec![
                Event::AdvancedKnownAssertion(node.assertion_tx_hash),
                Event::AdvancedKnownValidNode(valid),
            ]
        );
    }

    #[tokio::test]
    async fn cached_build_skips_replay() {
        let (observer, _) = observer_with_messages(2);
        let genesis = observer.read().await.known_valid_hash();
        let prepared = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        post(&observer, genesis, prepared.disputable()).await;

        let mut cache = SpeculativeCache::default();
        cache.start_building(genesis);
        cache.complete(prepared.clone());
        assert!(update_current(&observer, &mut cache).await.unwrap());

        // Only the cached machine carries the inbox block the build stopped on.
        let chain = observer.read().await;
        assert_eq!(chain.known_valid_node().unwrap().machine, Some(prepared.machine));
        assert!(!cache.is_building(&genesis));
        assert!(cache.prepared(&genesis).is_none());
    }

    #[tokio::test]
    async fn wrong_height_moves_to_invalid_successor() {
        let (observer, listener) = observer_with_messages(2);
        let genesis = observer.read().await.known_valid_hash();
        let prepared = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        let mut disputable = prepared.disputable();
        disputable.params.imported_message_count += 1;
        let successors = post(&observer, genesis, disputable).await;
        let invalid = successors.get(ChildType::InvalidPendingHeight).unwrap();

        let mut cache = SpeculativeCache::default();
        cache.start_building(genesis);
        cache.complete(prepared);
        assert!(update_current(&observer, &mut cache).await.unwrap());

        let chain = observer.read().await;
        assert_eq!(chain.known_valid_hash(), invalid);
        let node = chain.known_valid_node().unwrap();
        assert_eq!(node.machine, Some(AlphabetMachine::default()));
        assert!(node.assertion.is_none());
        assert_eq!(listener.events(), vec![Event::AdvancedKnownValidNode(invalid)]);
        assert!(cache.prepared(&genesis).is_none());
    }

    #[tokio::test]
    async fn tampered_message_slice_is_invalid() {
        let (observer, _) = observer_with_messages(2);
        let genesis = observer.read().await.known_valid_hash();
        let prepared = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        let mut disputable = prepared.disputable();
        disputable.claim.imported_messages_slice = H256::repeat_byte(0xee);
        let successors = post(&observer, genesis, disputable).await;

        let mut cache = SpeculativeCache::default();
        assert!(update_current(&observer, &mut cache).await.unwrap());
        assert_eq!(
            observer.read().await.known_valid_hash(),
            successors.get(ChildType::InvalidMessageSet).unwrap()
        );
    }

    #[tokio::test]
    async fn depth_grows_by_one_per_transition() {
        let (observer, _) = observer_with_messages(2);
        let mut cache = SpeculativeCache::default();

        for depth in 1..=3 {
            let leaf = observer.read().await.known_valid_hash();
            let prepared = prepare_assertion(observer.clone(), leaf).await.unwrap().unwrap();
            post(&observer, leaf, prepared.disputable()).await;
            observer
                .write()
                .await
                .pending_inbox
                .append(Bytes::from(vec![depth as u8]));

            assert!(update_current(&observer, &mut cache).await.unwrap());
            let chain = observer.read().await;
            let node = chain.known_valid_node().unwrap();
            assert_eq!(node.depth, depth);
            assert_eq!(node.prev_hash, leaf);
        }
    }

    #[tokio::test]
    async fn superseded_leaf_is_not_built() {
        let (observer, _) = observer_with_messages(2);
        let genesis = observer.read().await.known_valid_hash();
        let prepared = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        post(&observer, genesis, prepared.disputable()).await;

        assert!(prepare_assertion(observer.clone(), genesis)
            .await
            .unwrap()
            .is_none());
        assert!(prepare_assertion(observer, H256::repeat_byte(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rebuilding_is_idempotent() {
        let (observer, _) = observer_with_messages(3);
        let genesis = observer.read().await.known_valid_hash();
        let first = prepare_assertion(observer.clone(), genesis).await.unwrap().unwrap();
        let second = prepare_assertion(observer, genesis).await.unwrap().unwrap();
        assert_eq!(first.params, second.params);
        assert_eq!(first.claim, second.claim);
    }
}
