//! The shared tangle ledger
//!
//! Writers are serialized by one mutex that is held across the append,
//! contract evaluation and persistence of a single `add_transaction` call.
//! Readers only take the transaction lock and see a snapshot of the sequence
//! at call time.

use crate::contract::{ContractContext, SmartContract};
use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::transaction::{NodeId, Payload, Transaction};
use crate::{DEFAULT_MAX_CASCADE_DEPTH, GENESIS_HASH, TX_HASH_PREFIX};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// Ordered transactions plus a hash index
#[derive(Default)]
struct Chain {
    transactions: Vec<Transaction>,
    index: HashMap<String, usize>,
}

impl Chain {
    fn from_transactions(transactions: Vec<Transaction>) -> Result<Self, LedgerError> {
        let mut chain = Chain {
            transactions: Vec::with_capacity(transactions.len()),
            index: HashMap::with_capacity(transactions.len()),
        };

        for tx in transactions {
            if chain.index.contains_key(&tx.hash) {
                return Err(LedgerError::InvariantViolation(format!(
                    "duplicate transaction hash {}",
                    tx.hash
                )));
            }
            if let Some(missing) = chain.first_unknown(&tx.approving_transactions) {
                return Err(LedgerError::InvariantViolation(format!(
                    "transaction {} approves {} which does not precede it",
                    tx.hash, missing
                )));
            }
            chain.push(tx);
        }

        Ok(chain)
    }

    fn first_unknown<'a>(&self, approvals: &'a [String]) -> Option<&'a String> {
        approvals.iter().find(|hash| !self.index.contains_key(*hash))
    }

    fn push(&mut self, tx: Transaction) {
        self.index.insert(tx.hash.clone(), self.transactions.len());
        self.transactions.push(tx);
    }

    fn next_hash(&self) -> String {
        format!("{}{}", TX_HASH_PREFIX, self.transactions.len())
    }
}

/// State only touched by writers
struct Writer {
    contracts: Vec<Box<dyn SmartContract>>,
    store: Box<dyn LedgerStore>,
}

/// Append-only DAG ledger shared by all nodes
pub struct Ledger {
    chain: RwLock<Chain>,
    writer: Mutex<Writer>,
    max_cascade_depth: usize,
}

impl Ledger {
    /// Load the ledger from `store`, or create it with a genesis transaction
    pub fn open<S: LedgerStore + 'static>(store: S) -> Result<Self, LedgerError> {
        let transactions = match store.load()? {
            Some(transactions) => {
                tracing::info!("Loaded ledger with {} transactions", transactions.len());
                transactions
            }
            None => {
                tracing::info!("No ledger found, creating a new ledger");
                let genesis = vec![Transaction::genesis()];
                store.save(&genesis)?;
                genesis
            }
        };

        let ledger = Self::from_transactions(transactions, store)?;

        if ledger.is_empty() {
            ledger.chain.write().push(Transaction::genesis());
            ledger.save()?;
        }

        Ok(ledger)
    }

    /// Build a ledger from existing transactions without seeding genesis.
    ///
    /// Fails if a transaction approves a hash that does not precede it or a
    /// hash appears twice.
    pub fn from_transactions<S: LedgerStore + 'static>(
        transactions: Vec<Transaction>,
        store: S,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            chain: RwLock::new(Chain::from_transactions(transactions)?),
            writer: Mutex::new(Writer {
                contracts: Vec::new(),
                store: Box::new(store),
            }),
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        })
    }

    /// Let contract-authored transactions trigger contracts up to `depth`
    /// generations. 0 disables contracts entirely.
    pub fn with_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Register a contract. Contracts run in registration order.
    pub fn add_smart_contract<C: SmartContract + 'static>(&self, contract: C) {
        let mut writer = self.writer.lock();
        tracing::debug!("Registered smart contract {}", contract.name());
        writer.contracts.push(Box::new(contract));
    }

    pub fn contract_count(&self) -> usize {
        self.writer.lock().contracts.len()
    }

    /// Append a transaction, run the contracts against it and persist.
    ///
    /// Returns the new hash. If persistence fails the transaction stays in
    /// memory and [`LedgerError::Unpersisted`] carries its hash.
    ///
    /// A contract follow-up approving an unknown hash aborts the cascade with
    /// that error. Whatever was appended before it stays and is persisted.
    pub fn add_transaction(
        &self,
        data: Payload,
        approving_transactions: Vec<String>,
    ) -> Result<String, LedgerError> {
        let mut writer = self.writer.lock();
        let before = self.chain.read().transactions.len();
        let appended = self.append_locked(&mut writer, data, approving_transactions, 0);

        let chain = self.chain.read();
        if chain.transactions.len() == before {
            return appended;
        }

        if let Err(source) = writer.store.save(&chain.transactions) {
            tracing::error!("Failed to persist ledger: {}", source);
            return match appended {
                Ok(hash) => Err(LedgerError::Unpersisted { hash, source }),
                Err(e) => Err(e),
            };
        }

        appended
    }

    fn append_locked(
        &self,
        writer: &mut Writer,
        data: Payload,
        approving_transactions: Vec<String>,
        depth: usize,
    ) -> Result<String, LedgerError> {
        let hash = {
            let mut chain = self.chain.write();
            let hash = chain.next_hash();

            if let Some(approval) = chain.first_unknown(&approving_transactions) {
                return Err(LedgerError::UnknownApproval {
                    hash,
                    approval: approval.clone(),
                });
            }
            if chain.index.contains_key(&hash) {
                return Err(LedgerError::InvariantViolation(format!(
                    "hash {} is already taken",
                    hash
                )));
            }

            chain.push(Transaction {
                hash: hash.clone(),
                approving_transactions,
                data: data.clone(),
            });
            hash
        };

        if depth >= self.max_cascade_depth {
            if depth > 0 && !writer.contracts.is_empty() {
                tracing::debug!(
                    "Cascade depth {} reached, not evaluating contracts for {}",
                    depth,
                    hash
                );
            }
            return Ok(hash);
        }

        for i in 0..writer.contracts.len() {
            let mut ctx = ContractContext::new();
            if !writer.contracts[i].evaluate_and_execute(&data, &mut ctx) {
                continue;
            }

            let name = writer.contracts[i].name().to_string();
            tracing::debug!("Contract {} fired on {}", name, hash);

            for pending in ctx.take_pending() {
                let follow_up = self
                    .append_locked(writer, pending.data, pending.approving_transactions, depth + 1)
                    .map_err(|e| {
                        tracing::error!("Contract {} emitted a rejected transaction: {}", name, e);
                        e
                    })?;
                tracing::debug!("Contract {} appended {} after {}", name, follow_up, hash);
            }
        }

        Ok(hash)
    }

    /// Write the full transaction list to the store
    pub fn save(&self) -> Result<(), LedgerError> {
        let writer = self.writer.lock();
        let chain = self.chain.read();
        writer.store.save(&chain.transactions)?;
        Ok(())
    }

    /// Hashes of the two newest transactions, newest first
    pub fn get_recent_transactions(&self) -> Vec<String> {
        let chain = self.chain.read();
        Self::recent(&chain.transactions)
    }

    fn recent(transactions: &[Transaction]) -> Vec<String> {
        match transactions {
            [] => Vec::new(),
            [_] => vec![GENESIS_HASH.to_string(), GENESIS_HASH.to_string()],
            [.., older, newest] => vec![newest.hash.clone(), older.hash.clone()],
        }
    }

    /// Pick what `node_id` should approve: the two newest transactions added by
    /// one of its neighbors, or the two newest overall if there are fewer.
    pub fn get_transactions_for_approval(
        &self,
        node_id: NodeId,
        neighbors: &[NodeId],
    ) -> Vec<String> {
        let chain = self.chain.read();

        let from_neighbors: Vec<String> = chain
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.added_by().map_or(false, |id| neighbors.contains(&id)))
            .take(2)
            .map(|tx| tx.hash.clone())
            .collect();

        if from_neighbors.len() == 2 {
            from_neighbors
        } else {
            tracing::trace!(
                "Node {} has too few neighbor transactions, approving recent ones",
                node_id
            );
            Self::recent(&chain.transactions)
        }
    }

    /// Loss recorded by the newest transaction whose payload `node_id` matches
    pub fn get_last_loss(&self, node_id: NodeId) -> Option<f64> {
        let chain = self.chain.read();
        chain
            .transactions
            .iter()
            .rev()
            .find(|tx| tx.node_id() == Some(node_id))
            .and_then(Transaction::loss)
    }

    pub fn get(&self, hash: &str) -> Option<Transaction> {
        let chain = self.chain.read();
        chain.index.get(hash).map(|&i| chain.transactions[i].clone())
    }

    /// Snapshot of every transaction in append order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.chain.read().transactions.clone()
    }

    pub fn len(&self) -> usize {
        self.chain.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().transactions.is_empty()
    }
}
