//! The `config` module contains the [DriverConfig].

use std::time::Duration;

/// The [DriverConfig] struct contains the configuration for the [Driver](crate::Driver) implementations.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The period of the reconciliation loop.
    pub tick_interval: Duration,
    /// The capacity of the queue carrying finished speculative builds back to the loop. Builders
    /// wait when it is full.
    pub prepared_queue_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            prepared_queue_capacity: 20,
        }
    }
}

impl DriverConfig {
    /// Creates a new [DriverConfig] with the given configuration. Zero values are raised to the
    /// smallest usable ones.
    pub fn new(tick_interval: Duration, prepared_queue_capacity: usize) -> Self {
        Self {
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            prepared_queue_capacity: prepared_queue_capacity.max(1),
        }
    }
}
