use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use ethers::types::{Bytes, H256};
use opinion_validator_driver::{
    ChainListener, ChainObserver, Driver, DriverConfig, OpinionDriver, SharedObserver,
};
use opinion_validator_solvers::rollup::{
    AlphabetMachine, ChainParams, ExecutionAssertion, PreparedAssertion, TimeTicks,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::Level;

/// Arguments for the `opinion-validator` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The period of the reconciliation loop, in milliseconds.
    #[arg(
        long,
        default_value_t = 1000,
        help = "The period of the reconciliation loop, in milliseconds.",
        env = "OPINION_VALIDATOR_TICK_MS"
    )]
    tick_interval_ms: u64,

    /// The period of the simulated L1 chain, in milliseconds.
    #[arg(
        long,
        default_value_t = 2000,
        help = "The period of the simulated L1 chain, in milliseconds.",
        env = "OPINION_VALIDATOR_BLOCK_TIME_MS"
    )]
    block_time_ms: u64,

    /// The maximum number of steps a single assertion may execute.
    #[arg(
        long,
        default_value_t = ChainParams::default().max_execution_steps,
        help = "The maximum number of steps a single assertion may execute.",
        env = "OPINION_VALIDATOR_MAX_STEPS"
    )]
    max_execution_steps: u64,

    /// The width of the time bounds new assertions are executed within, in blocks.
    #[arg(
        long,
        default_value_t = ChainParams::default().max_time_bounds_width,
        help = "The width of the time bounds new assertions are executed within, in blocks.",
        env = "OPINION_VALIDATOR_TIME_BOUNDS_WIDTH"
    )]
    time_bounds_width: u64,

    /// The capacity of the queue carrying finished speculative builds.
    #[arg(
        long,
        default_value_t = DriverConfig::default().prepared_queue_capacity,
        help = "The capacity of the queue carrying finished speculative builds.",
        env = "OPINION_VALIDATOR_QUEUE_CAPACITY"
    )]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let Args {
        v,
        tick_interval_ms,
        block_time_ms,
        max_execution_steps,
        time_bounds_width,
        queue_capacity,
    } = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(v)?;

    // Create the driver config.
    let driver_config = DriverConfig::new(Duration::from_millis(tick_interval_ms), queue_capacity);
    let params = ChainParams {
        max_execution_steps,
        max_time_bounds_width: time_bounds_width,
    };
    tracing::info!(target: "opinion-validator-cli", "Driver config created successfully.");

    // Create the chain observer, with the alphabet machine at genesis.
    let (prepared_sender, mut prepared_receiver) =
        mpsc::channel(driver_config.prepared_queue_capacity);
    let mut observer = ChainObserver::new(AlphabetMachine::default(), params);
    observer.add_listener(Arc::new(LoggingListener { prepared_sender }));
    let observer = observer.into_shared();
    tracing::info!(target: "opinion-validator-cli", "Chain observer created, genesis @ {:?}", observer.read().await.known_valid_hash());

    // Start the driver loop.
    let (driver, shutdown) = OpinionDriver::new(Arc::new(driver_config), Arc::clone(&observer));
    let mut driver_handle = tokio::spawn(driver.start_loop());

    let mut block_ticker = tokio::time::interval(Duration::from_millis(block_time_ms.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "opinion-validator-cli", "Received interrupt, shutting down...");
                // The driver may already have stopped on its own.
                let _ = shutdown.send(true);
                break;
            }
            result = &mut driver_handle => {
                return result?;
            }
            _ = block_ticker.tick() => {
                next_block(&observer).await;
            }
            Some(prepared) = prepared_receiver.recv() => {
                post_assertion(&observer, prepared).await;
            }
        }
    }

    driver_handle.await?
}

/// The [LoggingListener] logs opinion changes and forwards prepared assertions to be posted.
struct LoggingListener {
    prepared_sender: mpsc::Sender<PreparedAssertion<AlphabetMachine>>,
}

impl ChainListener<AlphabetMachine> for LoggingListener {
    fn advanced_known_assertion(&self, assertion: &ExecutionAssertion, tx_hash: H256) {
        match serde_json::to_string(&assertion.stub()) {
            Ok(stub) => {
                tracing::info!(target: "opinion-validator-cli", "Confirmed assertion from tx {:?}: {}", tx_hash, stub)
            }
            Err(e) => {
                tracing::warn!(target: "opinion-validator-cli", "Confirmed assertion from tx {:?}, failed to encode it: {}", tx_hash, e)
            }
        }
    }

    fn advanced_known_valid_node(&self, node_hash: H256) {
        tracing::info!(target: "opinion-validator-cli", "Known valid node is now {:?}", node_hash);
    }

    fn assertion_prepared(&self, prepared: PreparedAssertion<AlphabetMachine>) {
        // Prepared assertions are re-announced every tick, so a dropped one comes back.
        if let Err(e) = self.prepared_sender.try_send(prepared) {
            tracing::debug!(target: "opinion-validator-cli", "Skipping prepared assertion: {}", e);
        }
    }
}

/// Advances the simulated L1 chain by one block, delivering one message to the inbox.
async fn next_block(observer: &SharedObserver<AlphabetMachine>) {
    let mut chain = observer.write().await;
    chain.latest_block_number += 1;
    let block = chain.latest_block_number;
    chain.pending_inbox.append(Bytes::from(block.to_be_bytes().to_vec()));
    tracing::debug!(target: "opinion-validator-cli", "Block {}, inbox height {}", block, chain.pending_inbox.top_count());
}

/// Posts a prepared assertion to the dispute graph on our own behalf.
async fn post_assertion(
    observer: &SharedObserver<AlphabetMachine>,
    prepared: PreparedAssertion<AlphabetMachine>,
) {
    let mut chain = observer.write().await;
    let disputable = prepared.disputable();
    let deadline = TimeTicks(
        chain
            .latest_block_number
            .saturating_add(chain.node_graph.params.max_time_bounds_width),
    );
    match chain.node_graph.create_nodes_from_assertion(
        prepared.leaf_hash,
        disputable,
        deadline,
        disputable.hash(),
    ) {
        Ok(_) => {
            tracing::info!(target: "opinion-validator-cli", "Posted assertion of {} steps on {:?}", prepared.params.num_steps, prepared.leaf_hash)
        }
        Err(e) => {
            tracing::warn!(target: "opinion-validator-cli", "Could not post assertion on {:?}: {}", prepared.leaf_hash, e)
        }
    }
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
