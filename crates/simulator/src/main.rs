//! Swarm Simulator
//!
//! Main entry point for the decentralized learning simulation.
//! Validates the topology, opens the shared tangle ledger, registers the
//! smart contracts and runs one node thread per topology entry until Ctrl+C,
//! the configured duration elapses, or a node halts on a ledger fault.

use anyhow::Result;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarm_learner::{
    shutdown, Aggregator, LinearRegressionTrainer, NodeConfig, NodeHandle, NodeId, NodeRuntime,
    Topology, TopologyError, DEFAULT_TARGET,
};
use tangle_ledger::{EnvironmentChangeContract, JsonFileStore, Ledger, LossFluctuationContract};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod topology_file;

use config::SimulatorConfig;

/// How often the orchestrator checks for nodes that halted on their own
const HALT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Decentralized learning on a shared tangle ledger
#[derive(Parser, Debug)]
#[command(name = "swarm-sim")]
#[command(
    about = "Simulate decentralized SGD nodes recording losses on a tangle",
    long_about = None
)]
struct Args {
    /// JSON config file (CLI flags override its values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Topology JSON file
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Ring size when no topology file is given
    #[arg(long)]
    nodes: Option<usize>,

    /// Ledger JSON file
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Period between node cycles in milliseconds
    #[arg(long)]
    run_period_ms: Option<u64>,

    /// SGD learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Stop after this many seconds (0 = until Ctrl+C)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Rows of synthetic data per node
    #[arg(long)]
    samples: Option<usize>,

    /// Features per row
    #[arg(long)]
    features: Option<usize>,

    /// Seed for synthetic data and initial weights
    #[arg(long)]
    seed: Option<u64>,

    /// Baseline loss for the loss-fluctuation contract
    #[arg(long)]
    initial_loss: Option<f64>,

    /// Baseline env_data for the environment-change contract
    #[arg(long)]
    initial_env_data: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)?,
            None => SimulatorConfig::default(),
        };

        if self.topology.is_some() {
            config.topology_path = self.topology;
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(ledger) = self.ledger {
            config.ledger_path = ledger;
        }
        if let Some(period) = self.run_period_ms {
            config.run_period_ms = period;
        }
        if let Some(rate) = self.learning_rate {
            config.learning_rate = rate;
        }
        if let Some(duration) = self.duration_secs {
            config.duration_secs = duration;
        }
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(features) = self.features {
            config.features = features;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.initial_loss.is_some() {
            config.initial_loss = self.initial_loss;
        }
        if self.initial_env_data.is_some() {
            config.initial_env_data = self.initial_env_data;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    let config = args.into_config()?;
    run(config).await
}

/// Load and validate the topology; every violation is logged before failing
fn load_topology(config: &SimulatorConfig) -> Result<Topology> {
    let Some(path) = &config.topology_path else {
        tracing::info!("No topology file given, using a ring of {} nodes", config.nodes);
        return Ok(Topology::ring(config.nodes));
    };

    let adjacency = topology_file::load(path)?;
    tracing::info!("Loaded network topology from {:?}: {:?}", path, adjacency);

    match Topology::new(adjacency) {
        Ok(topology) => {
            tracing::info!("Topology is consistent");
            Ok(topology)
        }
        Err(TopologyError::Inconsistent(violations)) => {
            tracing::error!("Topology is inconsistent:");
            for violation in &violations {
                tracing::error!("  {}", violation);
            }
            Err(TopologyError::Inconsistent(violations).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Synthetic dataset for one node, values in [0, 1)
fn synthetic_dataset(rng: &mut StdRng, samples: usize, features: usize) -> Vec<Vec<f64>> {
    (0..samples)
        .map(|_| (0..features).map(|_| rng.gen::<f64>()).collect())
        .collect()
}

fn spawn_node(
    config: &SimulatorConfig,
    topology: &Topology,
    ledger: &Arc<Ledger>,
    node_id: NodeId,
    listener: &shutdown::ShutdownListener,
) -> Result<NodeHandle> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(node_id));
    let samples = synthetic_dataset(&mut rng, config.samples, config.features);
    let weights: Vec<f64> = (0..config.features).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let trainer = LinearRegressionTrainer::new(samples, DEFAULT_TARGET)?;
    let aggregator =
        Aggregator::from_topology(topology, node_id, weights, trainer, ledger.clone())?;
    let node_config = NodeConfig {
        run_period: Duration::from_millis(config.run_period_ms),
        learning_rate: config.learning_rate,
    };

    let handle = NodeRuntime::new(aggregator, node_config).spawn(listener.clone())?;
    Ok(handle)
}

async fn run(config: SimulatorConfig) -> Result<()> {
    tracing::info!("Starting swarm simulation");
    tracing::info!("  Ledger: {:?}", config.ledger_path);
    tracing::info!("  Run period: {}ms", config.run_period_ms);
    tracing::info!("  Learning rate: {}", config.learning_rate);

    // Fatal before any node starts
    let topology = load_topology(&config)?;

    let ledger = Arc::new(
        Ledger::open(JsonFileStore::new(&config.ledger_path))?
            .with_cascade_depth(config.max_cascade_depth),
    );
    tracing::info!("Ledger ready with {} transactions", ledger.len());

    ledger.add_smart_contract(LossFluctuationContract::new(config.initial_loss));
    ledger.add_smart_contract(EnvironmentChangeContract::new(config.initial_env_data));

    let (trigger, listener) = shutdown::channel();
    let mut handles = Vec::with_capacity(topology.len());
    for node_id in topology.node_ids() {
        match spawn_node(&config, &topology, &ledger, node_id, &listener) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                tracing::error!("Failed to start node {}: {}", node_id, e);
                trigger.fire();
                join_all(handles).await;
                return Err(e);
            }
        }
    }

    tracing::info!("{} nodes running. Press Ctrl+C to stop.", handles.len());

    let halted = tokio::select! {
        _ = run_duration(config.duration_secs) => {
            tracing::info!("Run duration of {}s elapsed", config.duration_secs);
            None
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            None
        }
        node_id = wait_for_halted_node(&handles) => Some(node_id),
    };

    tracing::info!("Shutting down...");
    trigger.fire();
    join_all(handles).await;

    if let Err(e) = ledger.save() {
        tracing::error!("Failed to save final ledger: {}", e);
    } else {
        tracing::info!("Final ledger saved: {} transactions", ledger.len());
    }

    tracing::info!("Simulation stopped");

    match halted {
        Some(node_id) => Err(anyhow::anyhow!("node {} halted on a ledger fault", node_id)),
        None => Ok(()),
    }
}

/// Sleep for the configured duration; 0 never completes
async fn run_duration(secs: u64) {
    if secs == 0 {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// Resolve with the id of the first node that stopped on a fatal fault
async fn wait_for_halted_node(handles: &[NodeHandle]) -> NodeId {
    let mut interval = tokio::time::interval(HALT_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if let Some(handle) = handles
            .iter()
            .find(|handle| handle.stats().fatal_error.is_some())
        {
            return handle.node_id();
        }
    }
}

/// Join node threads off the async runtime and log their final stats
async fn join_all(handles: Vec<NodeHandle>) {
    let joined = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|handle| (handle.node_id(), handle.join()))
            .collect::<Vec<_>>()
    })
    .await;

    let Ok(results) = joined else {
        tracing::error!("Failed to join node threads");
        return;
    };

    for (node_id, result) in results {
        match result {
            Ok(stats) if stats.fatal_error.is_some() => tracing::error!(
                "Node {}: halted after {} cycles: {}",
                node_id,
                stats.cycles,
                stats.fatal_error.unwrap_or_default()
            ),
            Ok(stats) => tracing::info!(
                "Node {}: {} cycles, {} failures, last loss {:?}",
                node_id,
                stats.cycles,
                stats.failures,
                stats.last_loss
            ),
            Err(_) => tracing::error!("Node {} panicked", node_id),
        }
    }
}
