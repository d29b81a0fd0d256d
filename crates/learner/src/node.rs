//! Node Runtime - periodic update loop
//!
//! Each node runs on its own thread: update, log the outcome, sleep one run
//! period, repeat until shutdown. Failed cycles are counted and logged and
//! the loop continues, except when the ledger reports an internal-consistency
//! fault: the node then stops for good.

use crate::aggregator::Aggregator;
use crate::shutdown::ShutdownListener;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tangle_ledger::NodeId;

/// Node runtime configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Time between the start of two cycles
    pub run_period: Duration,
    /// SGD learning rate
    pub learning_rate: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            run_period: Duration::from_millis(crate::DEFAULT_RUN_PERIOD_MS),
            learning_rate: crate::DEFAULT_LEARNING_RATE,
        }
    }
}

/// Where a node is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Idle,
    Computing,
    Sleeping,
    Stopped,
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Success { loss: f64 },
    Failure { reason: String },
    /// The ledger can no longer be trusted; the loop stops
    Fatal { reason: String },
}

impl CycleOutcome {
    /// 0 on success, 1 on failure
    pub fn result_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::Failure { .. } | Self::Fatal { .. } => 1,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Live counters of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub state: NodeState,
    pub cycles: u64,
    pub failures: u64,
    pub last_loss: Option<f64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Set when the node stopped on a fatal ledger fault
    pub fatal_error: Option<String>,
}

impl NodeStats {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeState::Idle,
            cycles: 0,
            failures: 0,
            last_loss: None,
            last_cycle_at: None,
            fatal_error: None,
        }
    }
}

/// One node: an aggregator driven by a fixed-period loop
pub struct NodeRuntime {
    aggregator: Aggregator,
    config: NodeConfig,
    stats: Arc<RwLock<NodeStats>>,
}

impl NodeRuntime {
    pub fn new(aggregator: Aggregator, config: NodeConfig) -> Self {
        let stats = Arc::new(RwLock::new(NodeStats::new(aggregator.node_id())));
        Self {
            aggregator,
            config,
            stats,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.aggregator.node_id()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.read().clone()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Run a single update and record its outcome
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let node_id = self.node_id();
        self.stats.write().state = NodeState::Computing;

        let outcome = match self.aggregator.decentralized_sgd_update(self.config.learning_rate) {
            Ok(loss) => {
                tracing::info!("Node {}: SGD update complete with loss: {}", node_id, loss);
                CycleOutcome::Success { loss }
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("Node {}: fatal ledger fault: {}", node_id, e);
                CycleOutcome::Fatal {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!("Node {}: error during computation: {}", node_id, e);
                CycleOutcome::Failure {
                    reason: e.to_string(),
                }
            }
        };

        let mut stats = self.stats.write();
        stats.cycles += 1;
        stats.last_cycle_at = Some(Utc::now());
        match &outcome {
            CycleOutcome::Success { loss } => stats.last_loss = Some(*loss),
            CycleOutcome::Failure { .. } => stats.failures += 1,
            CycleOutcome::Fatal { reason } => {
                stats.failures += 1;
                stats.fatal_error = Some(reason.clone());
            }
        }

        outcome
    }

    /// Loop until `shutdown` fires. Blocks the calling thread.
    pub fn run(mut self, shutdown: ShutdownListener) -> NodeStats {
        let span = tracing::info_span!("node", id = self.node_id());
        let _enter = span.enter();

        tracing::info!(
            "Node {} started ({}ms period, {} neighbors)",
            self.node_id(),
            self.config.run_period.as_millis(),
            self.aggregator.neighbors().len()
        );

        while !shutdown.is_shutdown() {
            let outcome = self.run_cycle();
            tracing::debug!("Node {} cycle result: {}", self.node_id(), outcome.result_code());
            if outcome.is_fatal() {
                break;
            }

            self.stats.write().state = NodeState::Sleeping;
            if shutdown.wait_timeout(self.config.run_period) {
                break;
            }
        }

        self.stats.write().state = NodeState::Stopped;
        let stats = self.stats();
        match &stats.fatal_error {
            Some(reason) => tracing::error!(
                "Node {} halted after {} cycles: {}",
                stats.node_id,
                stats.cycles,
                reason
            ),
            None => tracing::info!(
                "Node {} stopped after {} cycles ({} failed)",
                stats.node_id,
                stats.cycles,
                stats.failures
            ),
        }
        stats
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self, shutdown: ShutdownListener) -> std::io::Result<NodeHandle> {
        let node_id = self.node_id();
        let stats = self.stats.clone();
        let join = std::thread::Builder::new()
            .name(format!("node-{}", node_id))
            .spawn(move || self.run(shutdown))?;

        Ok(NodeHandle {
            node_id,
            stats,
            join,
        })
    }
}

/// Handle to a node running on its own thread
pub struct NodeHandle {
    node_id: NodeId,
    stats: Arc<RwLock<NodeStats>>,
    join: JoinHandle<NodeStats>,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current counters, readable while the node runs
    pub fn stats(&self) -> NodeStats {
        self.stats.read().clone()
    }

    /// Wait for the node thread to exit
    pub fn join(self) -> std::thread::Result<NodeStats> {
        self.join.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;
    use crate::shutdown;
    use crate::trainer::{GradientStep, Trainer};
    use std::time::Instant;
    use tangle_ledger::{ContractContext, Ledger, MemoryStore, Payload, SmartContract};

    /// Fails on every odd call
    struct Alternating {
        calls: usize,
    }

    impl Trainer for Alternating {
        fn compute(&mut self, _weights: &[f64]) -> Result<GradientStep, ComputeError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(ComputeError::NonFiniteLoss(f64::NAN));
            }
            Ok(GradientStep {
                gradient: vec![1.0],
                loss: 0.5,
            })
        }
    }

    /// Emits a follow-up that approves a hash the ledger never issued
    struct DanglingApproval;

    impl SmartContract for DanglingApproval {
        fn name(&self) -> &str {
            "DanglingApproval"
        }

        fn condition(&self, _payload: &Payload) -> bool {
            true
        }

        fn action(&mut self, payload: &Payload, ctx: &mut ContractContext) {
            ctx.add_transaction(payload.clone(), vec!["tx_404".to_string()]);
        }
    }

    fn runtime(period: Duration) -> (NodeRuntime, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::open(MemoryStore::new()).unwrap());
        let trainer = Alternating { calls: 0 };
        let aggregator = Aggregator::new(3, Vec::new(), vec![0.0], trainer, ledger.clone());
        let config = NodeConfig {
            run_period: period,
            learning_rate: 0.5,
        };
        (NodeRuntime::new(aggregator, config), ledger)
    }

    #[test]
    fn test_cycle_outcomes() {
        let (mut node, ledger) = runtime(Duration::from_millis(1));
        assert_eq!(node.stats().state, NodeState::Idle);

        let first = node.run_cycle();
        assert_eq!(first, CycleOutcome::Success { loss: 0.5 });
        assert_eq!(first.result_code(), 0);

        let second = node.run_cycle();
        assert_eq!(second.result_code(), 1);

        let stats = node.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_loss, Some(0.5));
        assert!(stats.last_cycle_at.is_some());
        assert_eq!(ledger.len(), 2);
        assert_eq!(node.aggregator().weights(), &[-0.5]);
    }

    #[test]
    fn test_loop_survives_failures_and_stops() {
        let (node, ledger) = runtime(Duration::from_millis(5));
        let (trigger, listener) = shutdown::channel();
        let handle = node.spawn(listener).unwrap();
        assert_eq!(handle.node_id(), 3);

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().cycles < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        trigger.fire();
        let stats = handle.join().unwrap();

        assert_eq!(stats.state, NodeState::Stopped);
        assert!(stats.cycles >= 4);
        assert!(stats.failures >= 1);
        assert_eq!(ledger.len() as u64, 1 + stats.cycles - stats.failures);
    }

    #[test]
    fn test_shutdown_interrupts_sleep() {
        let (node, _ledger) = runtime(Duration::from_secs(60));
        let (trigger, listener) = shutdown::channel();
        let handle = node.spawn(listener).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().cycles < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let start = Instant::now();
        trigger.fire();
        let stats = handle.join().unwrap();

        assert_eq!(stats.cycles, 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_already_stopped_listener_runs_nothing() {
        let (node, ledger) = runtime(Duration::from_millis(1));
        let (trigger, listener) = shutdown::channel();
        trigger.fire();

        let stats = node.run(listener);
        assert_eq!(stats.cycles, 0);
        assert_eq!(stats.state, NodeState::Stopped);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_fault_stops_the_loop() {
        let (node, ledger) = runtime(Duration::from_millis(1));
        ledger.add_smart_contract(DanglingApproval);
        let (_trigger, listener) = shutdown::channel();

        // Returns without a shutdown signal
        let stats = node.run(listener);

        assert_eq!(stats.state, NodeState::Stopped);
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.failures, 1);
        let reason = stats.fatal_error.unwrap();
        assert!(reason.contains("tx_404"), "{}", reason);
        // The triggering report stays on the ledger
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_fatal_outcome_code() {
        let (mut node, ledger) = runtime(Duration::from_millis(1));
        ledger.add_smart_contract(DanglingApproval);

        let outcome = node.run_cycle();
        assert!(outcome.is_fatal());
        assert_eq!(outcome.result_code(), 1);
        assert!(node.stats().fatal_error.is_some());
    }
}
