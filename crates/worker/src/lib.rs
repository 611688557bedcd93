//! Worker process wiring: shared resources and the bundled job registry.

pub mod jobs;

use std::sync::Arc;

use tally_aggregate::Aggregator;
use tally_core::Config;
use tally_job::JobRegistry;
use tally_store::{CheckpointStore, FileCheckpointStore, KnownIndexes};

/// Name of the checkpoint storage under the state directory.
pub const CHECKPOINT_STORAGE: &str = "checkpoints";

/// Process-wide collaborators shared by every job.
#[derive(Clone)]
pub struct WorkerResources {
    pub config: Config,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub aggregator: Arc<Aggregator>,
    pub known_indexes: KnownIndexes,
}

impl WorkerResources {
    /// File-backed checkpoints under the configured state directory and one
    /// aggregation pool sized by the execution config.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let checkpoints = FileCheckpointStore::new(&config.state.dir, CHECKPOINT_STORAGE)?;
        let aggregator = Aggregator::new(config.execution.resolved_worker_threads())?;
        Ok(Self {
            config,
            checkpoints: Arc::new(checkpoints),
            aggregator: Arc::new(aggregator),
            known_indexes: KnownIndexes::new(),
        })
    }
}

/// Registry with every bundled job registered (not yet built).
pub fn registry(resources: &WorkerResources) -> JobRegistry {
    let mut registry = JobRegistry::new();
    jobs::register_all(&mut registry, resources);
    registry
}
