//! Transactions and payloads stored in the tangle

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a learning node (non-negative integer)
pub type NodeId = u64;

/// Open payload carried by a transaction
pub type Payload = Map<String, Value>;

/// A single ledger entry. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique id assigned at append time
    pub hash: String,
    /// Hashes approved by this transaction, all older than it
    pub approving_transactions: Vec<String>,
    /// Payload
    pub data: Payload,
}

impl Transaction {
    /// The seed transaction of an empty ledger
    pub fn genesis() -> Self {
        let mut data = Payload::new();
        data.insert("message".to_string(), Value::from("Genesis transaction"));
        Self {
            hash: crate::GENESIS_HASH.to_string(),
            approving_transactions: Vec::new(),
            data,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.hash == crate::GENESIS_HASH
    }

    /// `added_by` field of the payload, if it holds a node id
    pub fn added_by(&self) -> Option<NodeId> {
        self.data.get("added_by").and_then(Value::as_u64)
    }

    /// `node_id` field of the payload, if it holds a node id
    pub fn node_id(&self) -> Option<NodeId> {
        self.data.get("node_id").and_then(Value::as_u64)
    }

    /// `loss` field of the payload
    pub fn loss(&self) -> Option<f64> {
        payload_f64(&self.data, "loss")
    }
}

/// Read a numeric payload field
pub fn payload_f64(payload: &Payload, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

/// Loss report written by a node after each update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub loss: f64,
    pub message: String,
    pub added_by: NodeId,
}

impl LossReport {
    pub fn normal(loss: f64, added_by: NodeId) -> Self {
        Self {
            loss,
            message: crate::NORMAL_LOSS_MESSAGE.to_string(),
            added_by,
        }
    }

    pub fn into_payload(self) -> Payload {
        let mut data = Payload::new();
        data.insert("loss".to_string(), Value::from(self.loss));
        data.insert("message".to_string(), Value::from(self.message));
        data.insert("added_by".to_string(), Value::from(self.added_by));
        data
    }
}
