//! Ledger Errors

use thiserror::Error;

/// Errors raised by a ledger store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("ledger file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// An approval names a hash the ledger has never seen
    #[error("transaction {hash} approves unknown transaction {approval}")]
    UnknownApproval { hash: String, approval: String },

    /// Restored state breaks the backward-reference or unique-hash rules
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// The in-memory append succeeded but the store rejected the write
    #[error("transaction {hash} appended but not persisted: {source}")]
    Unpersisted {
        hash: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to load or initialize ledger: {0}")]
    Persistence(#[from] StoreError),
}

impl LedgerError {
    /// Internal-consistency faults. The ledger can no longer be trusted to
    /// hold only backward references, so writers should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::UnknownApproval { .. } | LedgerError::InvariantViolation(_)
        )
    }
}
