//! Persistence Layer for the tangle
//!
//! The full transaction list is rewritten on every save. There is no
//! journaling, so a crash mid-write can leave a truncated file.

use crate::error::StoreError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk form of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub transactions: Vec<Transaction>,
}

/// Durable backing for a ledger
pub trait LedgerStore: Send {
    /// Load the persisted transactions, `None` if nothing was ever saved
    fn load(&self) -> Result<Option<Vec<Transaction>>, StoreError>;

    /// Replace the persisted state with `transactions`
    fn save(&self, transactions: &[Transaction]) -> Result<(), StoreError>;
}

/// JSON file store, pretty-printed with four-space indentation
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<Transaction>>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: LedgerSnapshot = serde_json::from_reader(BufReader::new(file))?;
        tracing::debug!(
            "Loaded {} transactions from {:?}",
            snapshot.transactions.len(),
            self.path
        );
        Ok(Some(snapshot.transactions))
    }

    fn save(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            transactions: &'a [Transaction],
        }

        let mut writer = BufWriter::new(File::create(&self.path)?);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
        SnapshotRef { transactions }.serialize(&mut ser)?;
        writer.flush()?;
        Ok(())
    }
}

/// In-memory store, cloneable so tests can inspect what was saved
#[derive(Clone, Default)]
pub struct MemoryStore {
    saved: Arc<Mutex<Option<Vec<Transaction>>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted transactions
    pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Some(transactions))),
            saves: Arc::new(Mutex::new(0)),
        }
    }

    /// Last saved state
    pub fn snapshot(&self) -> Option<LedgerSnapshot> {
        self.saved
            .lock()
            .clone()
            .map(|transactions| LedgerSnapshot { transactions })
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Transaction>>, StoreError> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        *self.saved.lock() = Some(transactions.to_vec());
        *self.saves.lock() += 1;
        Ok(())
    }
}
