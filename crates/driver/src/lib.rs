#![doc = include_str!("../README.md")]

use anyhow::Result;
use async_trait::async_trait;

mod config;
pub use config::DriverConfig;

mod state;
pub use state::ChainObserver;

mod types;
pub use types::{ChainListener, SharedObserver};

mod cache;
pub use cache::SpeculativeCache;

mod drivers;
pub use drivers::OpinionDriver;

pub mod handlers;
pub mod utils;

#[cfg(test)]
mod test_utils;

/// The [Driver] trait defines the interface for all driver loops that are ran by the
/// `opinion-validator` binary.
#[async_trait]
pub trait Driver {
    /// Starts the [Driver] loop.
    async fn start_loop(self) -> Result<()>;
}
