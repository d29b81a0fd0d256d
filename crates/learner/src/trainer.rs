//! Local training step
//!
//! The aggregation protocol only needs "given the current weights, produce a
//! gradient and a loss". [`LinearRegressionTrainer`] is the reference model.

use crate::error::ComputeError;

/// Output of one local training step
#[derive(Debug, Clone, PartialEq)]
pub struct GradientStep {
    pub gradient: Vec<f64>,
    pub loss: f64,
}

/// Opaque gradient computation over a node's private data
pub trait Trainer: Send {
    fn compute(&mut self, weights: &[f64]) -> Result<GradientStep, ComputeError>;
}

/// Linear model `X·w` fitted to a constant target with mean squared error
#[derive(Debug, Clone)]
pub struct LinearRegressionTrainer {
    samples: Vec<Vec<f64>>,
    features: usize,
    target: f64,
}

impl LinearRegressionTrainer {
    /// Every row of `samples` must have the same length
    pub fn new(samples: Vec<Vec<f64>>, target: f64) -> Result<Self, ComputeError> {
        let features = samples.first().map(Vec::len).ok_or(ComputeError::EmptyDataset)?;
        if let Some(row) = samples.iter().find(|row| row.len() != features) {
            return Err(ComputeError::DimensionMismatch {
                expected: features,
                actual: row.len(),
            });
        }
        Ok(Self {
            samples,
            features,
            target,
        })
    }
}

impl Trainer for LinearRegressionTrainer {
    fn compute(&mut self, weights: &[f64]) -> Result<GradientStep, ComputeError> {
        if weights.len() != self.features {
            return Err(ComputeError::DimensionMismatch {
                expected: self.features,
                actual: weights.len(),
            });
        }

        let n = self.samples.len() as f64;
        let mut gradient = vec![0.0; self.features];
        let mut squared_error = 0.0;

        for row in &self.samples {
            let predicted: f64 = row.iter().zip(weights).map(|(x, w)| x * w).sum();
            let residual = predicted - self.target;
            squared_error += residual * residual;
            for (g, x) in gradient.iter_mut().zip(row) {
                *g += 2.0 * residual * x / n;
            }
        }

        let loss = squared_error / n;
        if !loss.is_finite() {
            return Err(ComputeError::NonFiniteLoss(loss));
        }

        Ok(GradientStep { gradient, loss })
    }
}
