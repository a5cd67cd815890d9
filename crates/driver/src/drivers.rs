//! The `driver` module contains implementations of the [Driver] trait.

use crate::{handlers, Driver, DriverConfig, SharedObserver, SpeculativeCache};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::H256;
use opinion_validator_solvers::rollup::{Machine, OpinionError, PreparedAssertion};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A finished speculative build: the leaf it was started for and its result, if any.
type BuildResult<M> = (H256, Option<PreparedAssertion<M>>);

/// The [OpinionDriver] runs the reconciliation loop. It walks the known valid pointer forward
/// through posted assertions, speculatively builds the next assertion on top of the known valid
/// leaf, and announces finished builds to the observer's listeners.
pub struct OpinionDriver<M> {
    /// The configuration for the driver.
    pub config: Arc<DriverConfig>,
    /// The shared chain state.
    observer: SharedObserver<M>,
    /// Flips to `true`, or closes, when the loop should stop.
    shutdown: watch::Receiver<bool>,
}

#[async_trait]
impl<M: Machine> Driver for OpinionDriver<M> {
    async fn start_loop(self) -> Result<()> {
        tracing::info!(target: "opinion-driver", "Starting opinion driver...");

        let (build_sender, mut build_receiver) =
            mpsc::channel::<BuildResult<M>>(self.config.prepared_queue_capacity);
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        let mut shutdown = self.shutdown.clone();
        let mut cache = SpeculativeCache::default();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!(target: "opinion-driver", "Shutdown requested, stopping opinion driver.");
                    break;
                }
                Some((leaf, prepared)) = build_receiver.recv() => {
                    self.handle_build(&mut cache, leaf, prepared);
                }
                _ = ticker.tick() => {
                    cache.release_failed();
                }
            }

            if let Err(e) = self.reconcile(&mut cache, &build_sender).await {
                if is_fatal(&e) {
                    tracing::error!(target: "opinion-driver", "Known valid pointer diverged from the dispute graph: {}", e);
                    return Err(e);
                }
                // Soft failure, log the error and retry on the next tick.
                tracing::error!(target: "opinion-driver", "Error reconciling opinion: {}", e);
            }
        }

        Ok(())
    }
}

impl<M: Machine> OpinionDriver<M> {
    /// Creates a new [OpinionDriver] along with the handle that stops it. Sending `true` through
    /// the handle, or dropping it, stops the loop between cycles.
    pub fn new(
        config: Arc<DriverConfig>,
        observer: SharedObserver<M>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_sender, shutdown) = watch::channel(false);
        (
            Self {
                config,
                observer,
                shutdown,
            },
            shutdown_sender,
        )
    }

    /// Runs a single reconciliation cycle: catch the known valid pointer up with the dispute
    /// graph, then either start a build on top of the known valid leaf or re-announce the
    /// finished one.
    async fn reconcile(
        &self,
        cache: &mut SpeculativeCache<M>,
        build_sender: &mpsc::Sender<BuildResult<M>>,
    ) -> Result<()> {
        loop {
            let is_leaf = self.observer.read().await.known_valid_is_leaf();
            if is_leaf || !handlers::update_current(&self.observer, cache).await? {
                break;
            }
        }

        let chain = self.observer.read().await;
        if !chain.known_valid_is_leaf() {
            // The successor matching our opinion has not been posted yet.
            return Ok(());
        }
        let leaf = chain.known_valid_node()?;

        if !cache.is_building(&leaf.hash) {
            let have_new_messages =
                leaf.vm_proto_data.pending_top != chain.pending_inbox.top_hash();
            let machine = leaf.machine()?;
            if machine.is_blocked(chain.latest_block_number, have_new_messages) {
                tracing::debug!(target: "opinion-driver", "Machine at {:?} is blocked: {:?}", leaf.hash, machine.last_block_reason());
                return Ok(());
            }

            cache.start_building(leaf.hash);
            self.spawn_build(leaf.hash, build_sender.clone());
        } else if let Some(prepared) = cache.prepared(&leaf.hash) {
            chain.notify_assertion_prepared(prepared);
        }

        Ok(())
    }

    /// Spawns a speculative build on top of `leaf`. The result is sent back to the loop even
    /// when there is none, so that the leaf can be retried.
    fn spawn_build(&self, leaf: H256, build_sender: mpsc::Sender<BuildResult<M>>) {
        let observer = Arc::clone(&self.observer);
        tokio::spawn(async move {
            let prepared = match handlers::prepare_assertion(observer, leaf).await {
                Ok(Some(prepared)) => Some(prepared),
                Ok(None) => {
                    tracing::debug!(target: "opinion-driver", "Leaf {:?} was superseded before its build started.", leaf);
                    None
                }
                Err(e) => {
                    tracing::error!(target: "opinion-driver", "Error building assertion on {:?}: {}", leaf, e);
                    None
                }
            };

            // Waits while the queue is full.
            if build_sender.send((leaf, prepared)).await.is_err() {
                tracing::debug!(target: "opinion-driver", "Opinion driver stopped, dropping build for {:?}", leaf);
            }
        });
    }

    /// Records a finished build. Builds for leaves that were superseded while they ran are
    /// discarded. A build that produced nothing is retried from the next tick on.
    fn handle_build(
        &self,
        cache: &mut SpeculativeCache<M>,
        leaf: H256,
        prepared: Option<PreparedAssertion<M>>,
    ) {
        match prepared {
            Some(prepared) => {
                if cache.complete(prepared) {
                    tracing::debug!(target: "opinion-driver", "Cached prepared assertion on {:?}", leaf);
                } else {
                    tracing::debug!(target: "opinion-driver", "Discarding prepared assertion on superseded leaf {:?}", leaf);
                }
            }
            None => cache.fail(leaf),
        }
    }
}

/// Returns `true` if `err` means the known valid pointer can no longer be trusted.
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OpinionError>()
        .is_some_and(OpinionError::is_fatal)
}
