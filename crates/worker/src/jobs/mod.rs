//! Jobs bundled with the worker.

pub mod unique_users;

use std::sync::Arc;

use tally_core::{Config, JobSettings};
use tally_job::{ExecutionPolicy, JobContext, JobError, JobRegistry, ManagedJob, WindowedReduction};
use tally_store::ElasticClient;

use crate::WorkerResources;

/// Register every bundled job with `registry`.
pub fn register_all(registry: &mut JobRegistry, resources: &WorkerResources) {
    let res = resources.clone();
    registry.register(unique_users::JOB_NAME, move || {
        let settings = base_settings(&res.config);
        let definition = unique_users::definition(settings)?;
        let ctx = res.context_for(definition.settings())?;
        let runner = WindowedReduction::new(definition, &ctx).into_runner(ctx.policy.clone());
        Ok(Arc::new(runner) as Arc<dyn ManagedJob>)
    });
}

impl WorkerResources {
    /// Collaborators for one job; each job gets its own store client sized
    /// by its own settings.
    pub fn context_for(&self, settings: &JobSettings) -> Result<JobContext, JobError> {
        let client = Arc::new(ElasticClient::from_settings(settings)?);
        Ok(JobContext {
            checkpoints: Arc::clone(&self.checkpoints),
            source: client.clone(),
            sink: client,
            aggregator: Arc::clone(&self.aggregator),
            known_indexes: self.known_indexes.clone(),
            policy: ExecutionPolicy::from_config(&self.config.execution),
        })
    }
}

/// Settings every bundled job starts from.
pub fn base_settings(config: &Config) -> JobSettings {
    JobSettings::from_config(&config.store)
}
