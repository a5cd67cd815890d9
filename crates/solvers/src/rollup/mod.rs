//! Data structures, the dispute graph, and the opinion solvers for the rollup assertion
//! protocol: classifying posted assertions and building our own.

mod types;
pub use types::*;

mod error;
pub use error::OpinionError;

mod machine;
pub use machine::{BlockReason, Machine};

mod inbox;
pub use inbox::{empty_message_slice_hash, MessageStack, PendingInbox};

mod graph;
pub use graph::{ChainParams, Node, NodeGraph};

mod classifier;
pub use classifier::get_node_opinion;

mod builder;
pub use builder::{build_assertion, LeafSnapshot};

mod alphabet;
pub use alphabet::AlphabetMachine;
