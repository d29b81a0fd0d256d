//! Simulation Integration Tests
//!
//! Runs several nodes against one file-backed ledger:
//! - Topology validation gates the run
//! - Node threads append concurrently with contracts registered
//! - The persisted ledger reloads with the same contents

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tangle_ledger::{
    EnvironmentChangeContract, JsonFileStore, Ledger, LossFluctuationContract, LossReport,
    MemoryStore,
};
use tempfile::tempdir;

use crate::{
    shutdown, Aggregator, LinearRegressionTrainer, NodeConfig, NodeRuntime, Topology,
    TopologyError, DEFAULT_TARGET,
};

fn dataset(node: u64) -> Vec<Vec<f64>> {
    (0..8)
        .map(|i| {
            let x = (i as f64 + node as f64) / 16.0;
            vec![x, 1.0 - x]
        })
        .collect()
}

fn spawn_nodes(
    topology: &Topology,
    ledger: &Arc<Ledger>,
    listener: &shutdown::ShutdownListener,
) -> Vec<crate::NodeHandle> {
    topology
        .node_ids()
        .map(|id| {
            let trainer = LinearRegressionTrainer::new(dataset(id), DEFAULT_TARGET).unwrap();
            let weights = vec![0.25, -0.25];
            let aggregator =
                Aggregator::from_topology(topology, id, weights, trainer, ledger.clone()).unwrap();
            let config = NodeConfig {
                run_period: Duration::from_millis(5),
                learning_rate: 0.05,
            };
            NodeRuntime::new(aggregator, config).spawn(listener.clone()).unwrap()
        })
        .collect()
}

#[test]
fn test_inconsistent_topology_blocks_startup() {
    let mut adjacency = BTreeMap::new();
    adjacency.insert(0, vec![1]);
    adjacency.insert(1, vec![2]);

    match Topology::new(adjacency) {
        Err(TopologyError::Inconsistent(violations)) => {
            let messages: Vec<String> = violations.iter().map(ToString::to_string).collect();
            assert_eq!(
                messages,
                vec![
                    "Inconsistency found: Node 1 does not list Node 0 as a neighbor.",
                    "Node 2, listed as a neighbor of Node 1, is not defined in the network.",
                ]
            );
        }
        other => panic!("expected inconsistent topology, got {:?}", other),
    }
}

#[test]
fn test_first_neighbor_report_is_approved() {
    let ledger = Ledger::open(MemoryStore::new()).unwrap();
    let hash = ledger
        .add_transaction(
            LossReport::normal(0.9, 0).into_payload(),
            ledger.get_recent_transactions(),
        )
        .unwrap();

    let approvals = ledger.get_transactions_for_approval(1, &[0]);
    assert!(approvals.contains(&hash));
}

#[test]
fn test_nodes_share_one_ledger() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let topology = Topology::ring(4);
    let ledger = Arc::new(Ledger::open(JsonFileStore::new(&path)).unwrap());
    ledger.add_smart_contract(LossFluctuationContract::new(None));
    ledger.add_smart_contract(EnvironmentChangeContract::new(None));

    let (trigger, listener) = shutdown::channel();
    let handles = spawn_nodes(&topology, &ledger, &listener);

    let deadline = Instant::now() + Duration::from_secs(20);
    while handles.iter().any(|h| h.stats().cycles < 3) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    trigger.fire();
    let stats: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let total_cycles: u64 = stats.iter().map(|s| s.cycles).sum();
    assert!(stats.iter().all(|s| s.cycles >= 3 && s.failures == 0));

    // Contracts without a baseline never fire, so every cycle is one transaction
    let transactions = ledger.transactions();
    assert_eq!(transactions.len() as u64, 1 + total_cycles);

    let mut seen = HashSet::new();
    for (position, tx) in transactions.iter().enumerate() {
        if position > 0 {
            assert_eq!(tx.hash, format!("tx_{}", position));
            assert_eq!(tx.approving_transactions.len(), 2);
        }
        for approval in &tx.approving_transactions {
            assert!(seen.contains(approval), "{} approves later {}", tx.hash, approval);
        }
        seen.insert(tx.hash.clone());
    }

    // Losses go down for every node
    for id in topology.node_ids() {
        let losses: Vec<f64> = transactions
            .iter()
            .filter(|tx| tx.added_by() == Some(id))
            .filter_map(|tx| tx.loss())
            .collect();
        assert!(losses.len() >= 3);
        assert!(losses.last().unwrap() < losses.first().unwrap());
    }

    let reopened = Ledger::open(JsonFileStore::new(&path)).unwrap();
    assert_eq!(reopened.transactions(), transactions);
}

#[test]
fn test_loss_contract_flags_steady_losses() {
    let ledger = Arc::new(Ledger::open(MemoryStore::new()).unwrap());
    ledger.add_smart_contract(LossFluctuationContract::new(Some(1.0)));

    let trainer = LinearRegressionTrainer::new(vec![vec![1.0]], 0.0).unwrap();
    // Loss is w^2 = 1.0 with a tiny learning rate, so it stays within 5%
    let aggregator = Aggregator::new(0, Vec::new(), vec![1.0], trainer, ledger.clone());
    let mut node = NodeRuntime::new(
        aggregator,
        NodeConfig {
            run_period: Duration::from_millis(1),
            learning_rate: 0.001,
        },
    );

    node.run_cycle();
    node.run_cycle();

    let messages: Vec<String> = ledger
        .transactions()
        .iter()
        .skip(1)
        .map(|tx| tx.data["message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        messages,
        vec!["Normal Loss", "Abnormal Loss", "Normal Loss", "Abnormal Loss"]
    );
}
