//! Explicit registry of job factories.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::runner::{JobRunner, JobStats, RunStatus};

/// Lifecycle contract every registered job implements.
#[async_trait]
pub trait ManagedJob: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self) -> Result<(), JobError>;

    async fn start(&self) -> Result<(), JobError>;

    async fn stop(&self) -> Result<(), JobError>;

    fn status(&self) -> RunStatus;

    fn stats(&self) -> JobStats {
        JobStats::default()
    }
}

#[async_trait]
impl ManagedJob for JobRunner {
    fn name(&self) -> &str {
        JobRunner::name(self)
    }

    fn validate(&self) -> Result<(), JobError> {
        JobRunner::validate(self)
    }

    async fn start(&self) -> Result<(), JobError> {
        JobRunner::start(self).await
    }

    async fn stop(&self) -> Result<(), JobError> {
        JobRunner::stop(self).await
    }

    fn status(&self) -> RunStatus {
        JobRunner::status(self)
    }

    fn stats(&self) -> JobStats {
        JobRunner::stats(self)
    }
}

/// Builds one job instance.
pub type JobFactory = Box<dyn Fn() -> Result<Arc<dyn ManagedJob>, JobError> + Send + Sync>;

/// Holds factories, the jobs they produced, and starts/stops them together.
#[derive(Default)]
pub struct JobRegistry {
    factories: Vec<(String, JobFactory)>,
    jobs: Vec<Arc<dyn ManagedJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ManagedJob>, JobError> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(job = %name, "job factory registered");
        self.factories.push((name, Box::new(factory)));
    }

    /// Names of every registered factory.
    pub fn registered(&self) -> Vec<&str> {
        self.factories.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Run every factory. A factory error or a job failing validation is
    /// logged and skipped. Returns the number of jobs built.
    pub fn build_all(&mut self) -> usize {
        self.jobs.clear();
        for (name, factory) in &self.factories {
            let job = match factory() {
                Ok(job) => job,
                Err(e) => {
                    warn!(job = %name, error = %e, "job factory failed, skipping");
                    continue;
                }
            };
            if let Err(e) = job.validate() {
                warn!(job = %name, error = %e, "job definition invalid, skipping");
                continue;
            }
            self.jobs.push(job);
        }
        info!(
            built = self.jobs.len(),
            registered = self.factories.len(),
            "jobs built"
        );
        self.jobs.len()
    }

    pub fn jobs(&self) -> &[Arc<dyn ManagedJob>] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<Arc<dyn ManagedJob>> {
        self.jobs.iter().find(|j| j.name() == name).cloned()
    }

    /// Start every built job concurrently; returns once all are launched.
    /// Returns the number of jobs that failed to start.
    pub async fn start_all(&self) -> usize {
        self.for_each_job("start", |job| async move { job.start().await })
            .await
    }

    /// Stop every built job concurrently and wait for all of them.
    pub async fn stop_all(&self) -> usize {
        self.for_each_job("stop", |job| async move { job.stop().await })
            .await
    }

    async fn for_each_job<F, Fut>(&self, action: &'static str, op: F) -> usize
    where
        F: Fn(Arc<dyn ManagedJob>) -> Fut,
        Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for job in &self.jobs {
            let name = job.name().to_string();
            let fut = op(Arc::clone(job));
            set.spawn(async move { (name, fut.await) });
        }

        let mut failed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    failed += 1;
                    error!(job = %name, action, error = %e, "job lifecycle call failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(action, error = %e, "job lifecycle task panicked");
                }
            }
        }
        failed
    }
}
