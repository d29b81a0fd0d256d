//! Learner Errors

use crate::topology::TopologyViolation;
use tangle_ledger::LedgerError;
use thiserror::Error;

/// Topology errors, fatal at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("network topology is inconsistent ({} violations)", .0.len())]
    Inconsistent(Vec<TopologyViolation>),

    #[error("node {0} is not part of the topology")]
    UnknownNode(u64),
}

/// Failure inside the training step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("loss is not finite: {0}")]
    NonFiniteLoss(f64),

    #[error("no gradient available from neighbor {0}")]
    NeighborUnavailable(u64),
}

/// Failure of one aggregation cycle
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("computation failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("ledger rejected the loss report: {0}")]
    Ledger(#[from] LedgerError),
}

impl AggregatorError {
    /// The ledger reported an internal-consistency fault; the node must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregatorError::Ledger(e) if e.is_fatal())
    }
}
