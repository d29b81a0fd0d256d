//! Per-node decentralized SGD
//!
//! One update: compute the local gradient, average it with one contribution
//! per neighbor, step the private weights and record the loss on the ledger.

use crate::error::{AggregatorError, ComputeError, TopologyError};
use crate::topology::Topology;
use crate::trainer::Trainer;
use std::sync::Arc;
use tangle_ledger::{Ledger, LossReport, NodeId};

/// Source of neighbor gradients
pub trait NeighborGradientProvider: Send {
    fn neighbor_gradient(&self, neighbor: NodeId, local: &[f64]) -> Result<Vec<f64>, ComputeError>;
}

/// Stands in for a real exchange: every neighbor contributes the local gradient
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorLocalGradient;

impl NeighborGradientProvider for MirrorLocalGradient {
    fn neighbor_gradient(
        &self,
        _neighbor: NodeId,
        local: &[f64],
    ) -> Result<Vec<f64>, ComputeError> {
        Ok(local.to_vec())
    }
}

/// Training state of one node
pub struct Aggregator {
    node_id: NodeId,
    neighbors: Vec<NodeId>,
    weights: Vec<f64>,
    trainer: Box<dyn Trainer>,
    provider: Box<dyn NeighborGradientProvider>,
    ledger: Arc<Ledger>,
}

impl Aggregator {
    pub fn new<T: Trainer + 'static>(
        node_id: NodeId,
        neighbors: Vec<NodeId>,
        weights: Vec<f64>,
        trainer: T,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            node_id,
            neighbors,
            weights,
            trainer: Box::new(trainer),
            provider: Box::new(MirrorLocalGradient),
            ledger,
        }
    }

    /// Aggregator for a node of a validated topology
    pub fn from_topology<T: Trainer + 'static>(
        topology: &Topology,
        node_id: NodeId,
        weights: Vec<f64>,
        trainer: T,
        ledger: Arc<Ledger>,
    ) -> Result<Self, TopologyError> {
        if !topology.contains(node_id) {
            return Err(TopologyError::UnknownNode(node_id));
        }
        Ok(Self::new(
            node_id,
            topology.neighbors(node_id).to_vec(),
            weights,
            trainer,
            ledger,
        ))
    }

    /// Replace the neighbor gradient source
    pub fn with_provider<P: NeighborGradientProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Box::new(provider);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Run one update and return the local loss
    pub fn decentralized_sgd_update(&mut self, learning_rate: f64) -> Result<f64, AggregatorError> {
        let step = self.trainer.compute(&self.weights)?;
        let averaged = self.aggregate(step.gradient)?;

        for (w, g) in self.weights.iter_mut().zip(&averaged) {
            *w -= learning_rate * g;
        }

        let approvals = self
            .ledger
            .get_transactions_for_approval(self.node_id, &self.neighbors);
        let hash = self.ledger.add_transaction(
            LossReport::normal(step.loss, self.node_id).into_payload(),
            approvals,
        )?;

        tracing::debug!("Node {} recorded loss {} as {}", self.node_id, step.loss, hash);

        Ok(step.loss)
    }

    /// Average the local gradient with one contribution per neighbor
    fn aggregate(&self, local: Vec<f64>) -> Result<Vec<f64>, ComputeError> {
        if local.len() != self.weights.len() {
            return Err(ComputeError::DimensionMismatch {
                expected: self.weights.len(),
                actual: local.len(),
            });
        }
        if self.neighbors.is_empty() {
            return Ok(local);
        }

        let mut sum = local.clone();
        for &neighbor in &self.neighbors {
            let contribution = self.provider.neighbor_gradient(neighbor, &local)?;
            if contribution.len() != sum.len() {
                return Err(ComputeError::DimensionMismatch {
                    expected: sum.len(),
                    actual: contribution.len(),
                });
            }
            for (s, c) in sum.iter_mut().zip(&contribution) {
                *s += c;
            }
        }

        let count = (self.neighbors.len() + 1) as f64;
        Ok(sum.into_iter().map(|s| s / count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::GradientStep;
    use tangle_ledger::MemoryStore;

    /// Returns the same gradient and loss every time
    struct FixedTrainer {
        gradient: Vec<f64>,
        loss: f64,
    }

    impl Trainer for FixedTrainer {
        fn compute(&mut self, _weights: &[f64]) -> Result<GradientStep, ComputeError> {
            Ok(GradientStep {
                gradient: self.gradient.clone(),
                loss: self.loss,
            })
        }
    }

    struct FailingTrainer;

    impl Trainer for FailingTrainer {
        fn compute(&mut self, _weights: &[f64]) -> Result<GradientStep, ComputeError> {
            Err(ComputeError::EmptyDataset)
        }
    }

    /// Neighbor `n` reports a gradient of `n` in every component
    struct IdGradient;

    impl NeighborGradientProvider for IdGradient {
        fn neighbor_gradient(
            &self,
            neighbor: NodeId,
            local: &[f64],
        ) -> Result<Vec<f64>, ComputeError> {
            Ok(vec![neighbor as f64; local.len()])
        }
    }

    struct Unreachable;

    impl NeighborGradientProvider for Unreachable {
        fn neighbor_gradient(
            &self,
            neighbor: NodeId,
            _local: &[f64],
        ) -> Result<Vec<f64>, ComputeError> {
            Err(ComputeError::NeighborUnavailable(neighbor))
        }
    }

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::open(MemoryStore::new()).unwrap())
    }

    fn fixed(gradient: &[f64]) -> FixedTrainer {
        FixedTrainer {
            gradient: gradient.to_vec(),
            loss: 0.75,
        }
    }

    #[test]
    fn test_no_neighbors_applies_own_gradient() {
        let trainer = fixed(&[0.5, -1.25]);
        let mut agg = Aggregator::new(0, Vec::new(), vec![1.0, -2.0], trainer, ledger());

        let loss = agg.decentralized_sgd_update(0.5).unwrap();

        assert_eq!(loss, 0.75);
        assert_eq!(agg.weights(), &[1.0 - 0.25, -2.0 + 0.625]);
    }

    #[test]
    fn test_mirrored_neighbors_average_to_own_gradient() {
        for k in 1..=3u64 {
            let neighbors: Vec<NodeId> = (1..=k).collect();
            let trainer = fixed(&[0.5, -1.25]);
            let mut agg = Aggregator::new(0, neighbors, vec![1.0, -2.0], trainer, ledger());

            let averaged = agg.aggregate(vec![0.5, -1.25]).unwrap();
            assert_eq!(averaged, vec![0.5, -1.25]);

            agg.decentralized_sgd_update(0.5).unwrap();
            assert_eq!(agg.weights(), &[0.75, -1.375]);
        }
    }

    #[test]
    fn test_custom_provider() {
        let agg = Aggregator::new(0, vec![1, 3], vec![0.0], fixed(&[2.0]), ledger())
            .with_provider(IdGradient);

        // (2 + 1 + 3) / 3
        assert_eq!(agg.aggregate(vec![2.0]).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_records_loss_on_ledger() {
        let ledger = ledger();
        let mut first = Aggregator::new(0, vec![1], vec![0.0], fixed(&[1.0]), ledger.clone());
        let mut second = Aggregator::new(1, vec![0], vec![0.0], fixed(&[1.0]), ledger.clone());

        first.decentralized_sgd_update(0.1).unwrap();
        second.decentralized_sgd_update(0.1).unwrap();
        first.decentralized_sgd_update(0.1).unwrap();

        let transactions = ledger.transactions();
        assert_eq!(transactions.len(), 4);

        let tx1 = &transactions[1];
        assert_eq!(tx1.approving_transactions, vec!["genesis", "genesis"]);
        assert_eq!(tx1.added_by(), Some(0));
        assert_eq!(tx1.loss(), Some(0.75));
        assert_eq!(tx1.data["message"], "Normal Loss");

        // one neighbor transaction only: falls back to the two newest
        assert_eq!(transactions[2].approving_transactions, vec!["tx_1", "genesis"]);
        assert_eq!(transactions[3].approving_transactions, vec!["tx_2", "tx_1"]);
    }

    #[test]
    fn test_failures_leave_weights_untouched() {
        let ledger = ledger();

        let mut agg = Aggregator::new(0, Vec::new(), vec![1.0], FailingTrainer, ledger.clone());
        let err = agg.decentralized_sgd_update(0.1).unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, AggregatorError::Compute(ComputeError::EmptyDataset)));
        assert_eq!(agg.weights(), &[1.0]);

        let mut agg = Aggregator::new(0, vec![1], vec![1.0], fixed(&[1.0]), ledger.clone())
            .with_provider(Unreachable);
        assert!(matches!(
            agg.decentralized_sgd_update(0.1),
            Err(AggregatorError::Compute(ComputeError::NeighborUnavailable(1)))
        ));
        assert_eq!(agg.weights(), &[1.0]);

        let mut agg = Aggregator::new(0, Vec::new(), vec![1.0, 1.0], fixed(&[1.0]), ledger.clone());
        assert!(agg.decentralized_sgd_update(0.1).is_err());

        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_from_topology() {
        let topology = Topology::ring(3);
        let agg =
            Aggregator::from_topology(&topology, 1, vec![0.0], fixed(&[1.0]), ledger()).unwrap();
        assert_eq!(agg.neighbors(), &[0, 2]);

        let missing = Aggregator::from_topology(&topology, 9, vec![0.0], fixed(&[1.0]), ledger());
        assert!(matches!(missing, Err(TopologyError::UnknownNode(9))));
    }
}
