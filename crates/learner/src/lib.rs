//! Swarm Learner - decentralized SGD nodes on a shared tangle
//!
//! Each node trains a private model, averages its gradient with its
//! topological neighbors and records the resulting loss on the ledger.
//! - Topology validation (symmetric, fully defined adjacency)
//! - Per-node aggregation protocol
//! - Periodic node loop with cooperative shutdown

pub mod aggregator;
pub mod error;
pub mod node;
pub mod shutdown;
pub mod topology;
pub mod trainer;

#[cfg(test)]
mod tests;

pub use aggregator::{Aggregator, MirrorLocalGradient, NeighborGradientProvider};
pub use error::{AggregatorError, ComputeError, TopologyError};
pub use node::{CycleOutcome, NodeConfig, NodeHandle, NodeRuntime, NodeState, NodeStats};
pub use shutdown::{ShutdownListener, ShutdownTrigger};
pub use tangle_ledger::NodeId;
pub use topology::{Topology, TopologyViolation};
pub use trainer::{GradientStep, LinearRegressionTrainer, Trainer};

/// Default period between two node cycles in milliseconds
pub const DEFAULT_RUN_PERIOD_MS: u64 = 1000;

/// Default SGD learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Value the reference trainer regresses towards
pub const DEFAULT_TARGET: f64 = 0.5;
