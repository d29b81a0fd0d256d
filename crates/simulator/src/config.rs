//! Simulator Configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Topology JSON file; a ring of `nodes` is used when absent
    pub topology_path: Option<PathBuf>,
    /// Ring size when no topology file is given
    pub nodes: usize,
    /// Ledger JSON file
    pub ledger_path: PathBuf,
    /// Period between node cycles in milliseconds
    pub run_period_ms: u64,
    /// SGD learning rate
    pub learning_rate: f64,
    /// Stop after this many seconds (0 = run until Ctrl+C)
    pub duration_secs: u64,
    /// Rows of synthetic data per node
    pub samples: usize,
    /// Features per row
    pub features: usize,
    /// Seed for data and initial weights
    pub seed: u64,
    /// Baseline for the loss-fluctuation contract
    pub initial_loss: Option<f64>,
    /// Baseline for the environment-change contract
    pub initial_env_data: Option<f64>,
    /// Contract-authored generations that still trigger contracts
    pub max_cascade_depth: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            topology_path: None,
            nodes: 4,
            ledger_path: PathBuf::from("./data/ledger.json"),
            run_period_ms: swarm_learner::DEFAULT_RUN_PERIOD_MS,
            learning_rate: swarm_learner::DEFAULT_LEARNING_RATE,
            duration_secs: 0,
            samples: 32,
            features: 4,
            seed: 42,
            initial_loss: None,
            initial_env_data: None,
            max_cascade_depth: tangle_ledger::DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

impl SimulatorConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {:?}: {}", path, e))?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run_period_ms == 0 {
            anyhow::bail!("run period must be at least 1ms");
        }
        if self.samples == 0 || self.features == 0 {
            anyhow::bail!("samples and features must be positive");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            anyhow::bail!("learning rate must be a positive number");
        }
        if self.topology_path.is_none() && self.nodes == 0 {
            anyhow::bail!("either a topology file or a positive node count is required");
        }
        Ok(())
    }
}
