//! Smart contracts evaluated against every appended transaction
//!
//! A contract owns whatever state it needs between evaluations. Actions never
//! touch the ledger directly: they queue follow-up transactions on the
//! [`ContractContext`], and the ledger appends them before the triggering
//! `add_transaction` call returns.

use crate::transaction::{payload_f64, NodeId, Payload};
use serde_json::Value;

/// A transaction queued by a contract action
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    pub data: Payload,
    pub approving_transactions: Vec<String>,
}

/// Handed to contract actions so they can emit follow-up transactions
#[derive(Debug, Default)]
pub struct ContractContext {
    pending: Vec<PendingTransaction>,
}

impl ContractContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transaction to be appended after the current one
    pub fn add_transaction(&mut self, data: Payload, approving_transactions: Vec<String>) {
        self.pending.push(PendingTransaction {
            data,
            approving_transactions,
        });
    }

    pub fn pending(&self) -> &[PendingTransaction] {
        &self.pending
    }

    pub fn take_pending(&mut self) -> Vec<PendingTransaction> {
        std::mem::take(&mut self.pending)
    }
}

/// Condition/action pair evaluated against transaction payloads
pub trait SmartContract: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the action should run for this payload
    fn condition(&self, payload: &Payload) -> bool;

    /// Side effect for a payload that satisfied the condition
    fn action(&mut self, payload: &Payload, ctx: &mut ContractContext);

    /// Run the action if the condition holds. Returns whether it ran.
    fn evaluate_and_execute(&mut self, payload: &Payload, ctx: &mut ContractContext) -> bool {
        if self.condition(payload) {
            self.action(payload, ctx);
            true
        } else {
            false
        }
    }
}

/// Relative loss change at or below which [`LossFluctuationContract`] fires
pub const LOSS_FLUCTUATION_THRESHOLD: f64 = 0.05;

/// Absolute `env_data` change above which [`EnvironmentChangeContract`] fires
pub const ENVIRONMENT_CHANGE_THRESHOLD: f64 = 50.0;

/// Flags a loss that stays within 5% of the previously flagged loss.
///
/// Note the polarity: despite the "abnormal" wording the condition holds for
/// *small* relative changes. This is kept as-is until the intended behavior
/// is confirmed.
#[derive(Debug, Clone)]
pub struct LossFluctuationContract {
    last_loss: Option<f64>,
}

impl LossFluctuationContract {
    pub fn new(initial_loss: Option<f64>) -> Self {
        Self {
            last_loss: initial_loss,
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }
}

impl SmartContract for LossFluctuationContract {
    fn name(&self) -> &str {
        "loss-fluctuation"
    }

    fn condition(&self, payload: &Payload) -> bool {
        let (Some(last), Some(current)) = (self.last_loss, payload_f64(payload, "loss")) else {
            return false;
        };
        let fluctuation = (current - last).abs() / last;
        fluctuation <= LOSS_FLUCTUATION_THRESHOLD
    }

    fn action(&mut self, payload: &Payload, ctx: &mut ContractContext) {
        let mut flagged = payload.clone();
        flagged.insert(
            "message".to_string(),
            Value::from(crate::ABNORMAL_LOSS_MESSAGE),
        );
        tracing::warn!("Abnormal loss detected. Notifying neighbors.");
        ctx.add_transaction(flagged, vec![crate::GENESIS_HASH.to_string()]);
        self.last_loss = payload_f64(payload, "loss");
    }
}

/// Reacts to jumps of more than 50 in the reported `env_data`
#[derive(Debug, Clone)]
pub struct EnvironmentChangeContract {
    last_env_data: Option<f64>,
}

impl EnvironmentChangeContract {
    pub fn new(initial_env_data: Option<f64>) -> Self {
        Self {
            last_env_data: initial_env_data,
        }
    }

    pub fn last_env_data(&self) -> Option<f64> {
        self.last_env_data
    }

    // Missing env_data reads as 0.
    fn current_env_data(payload: &Payload) -> f64 {
        payload_f64(payload, "env_data").unwrap_or(0.0)
    }
}

impl SmartContract for EnvironmentChangeContract {
    fn name(&self) -> &str {
        "environment-change"
    }

    fn condition(&self, payload: &Payload) -> bool {
        match self.last_env_data {
            Some(last) => {
                (Self::current_env_data(payload) - last).abs() > ENVIRONMENT_CHANGE_THRESHOLD
            }
            None => false,
        }
    }

    fn action(&mut self, payload: &Payload, ctx: &mut ContractContext) {
        self.last_env_data = Some(Self::current_env_data(payload));

        let node_id: Option<NodeId> = payload.get("node_id").and_then(Value::as_u64);
        match node_id {
            Some(id) => tracing::info!("Significant environmental change detected by Node {}", id),
            None => tracing::info!("Significant environmental change detected"),
        }

        ctx.add_transaction(payload.clone(), vec![crate::GENESIS_HASH.to_string()]);
    }
}
