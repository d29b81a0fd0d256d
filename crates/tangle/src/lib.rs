//! Tangle Ledger - append-only DAG of transactions
//!
//! This crate provides the shared ledger the learning nodes write to:
//! - Transactions approving earlier transactions instead of a linear chain
//! - Neighbor-aware approval selection
//! - Smart contracts evaluated against every appended payload
//! - Write-through persistence to a pluggable store

pub mod contract;
pub mod error;
pub mod ledger;
pub mod store;
pub mod transaction;

pub use contract::{
    ContractContext, EnvironmentChangeContract, LossFluctuationContract, PendingTransaction,
    SmartContract,
};
pub use error::{LedgerError, StoreError};
pub use ledger::Ledger;
pub use store::{JsonFileStore, LedgerSnapshot, LedgerStore, MemoryStore};
pub use transaction::{LossReport, NodeId, Payload, Transaction};

/// Hash of the seed transaction every ledger starts from
pub const GENESIS_HASH: &str = "genesis";

/// Prefix of every non-genesis transaction hash
pub const TX_HASH_PREFIX: &str = "tx_";

/// Message written by nodes for regular loss reports
pub const NORMAL_LOSS_MESSAGE: &str = "Normal Loss";

/// Message written by the loss-fluctuation contract
pub const ABNORMAL_LOSS_MESSAGE: &str = "Abnormal Loss";

/// Default number of contract-authored generations that still trigger contracts
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 1;
