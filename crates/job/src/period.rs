use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tally_core::{Checkpoint, JobSettings, Period};
use tally_store::CheckpointStore;

use crate::error::JobError;

/// Derives the next window of a job from its checkpoint and moves the
/// checkpoint forward once a window is fully written.
#[derive(Clone)]
pub struct PeriodManager {
    job_type: String,
    store: Arc<dyn CheckpointStore>,
}

impl PeriodManager {
    pub fn new(job_type: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            job_type: job_type.into(),
            store,
        }
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    fn key(&self, settings: &JobSettings) -> String {
        Checkpoint::key(&self.job_type, settings.time_interval)
    }

    /// Next window to process, judged against the current time.
    pub async fn load_period(&self, settings: &JobSettings) -> Period {
        self.load_period_at(settings, Utc::now()).await
    }

    /// Next window to process, judged against `now`.
    ///
    /// A missing or unreadable checkpoint falls back to the configured start
    /// date, or `now - 30 days` when none is set.
    pub async fn load_period_at(&self, settings: &JobSettings, now: DateTime<Utc>) -> Period {
        let key = self.key(settings);
        let start = match self.store.get(&key).await {
            Ok(Some(checkpoint)) => checkpoint.position,
            Ok(None) => {
                debug!(job = %self.job_type, "no checkpoint stored, using start date");
                settings.effective_start_date(now)
            }
            Err(e) => {
                warn!(
                    job = %self.job_type,
                    error = %e,
                    "checkpoint unreadable, falling back to start date"
                );
                settings.effective_start_date(now)
            }
        };
        Period::starting_at(start, settings.time_interval, now)
    }

    /// Persist `period.to` as the job's position.
    ///
    /// Refuses the still-open current window: it is re-derived and
    /// re-processed until the day rolls over.
    pub async fn advance_period(
        &self,
        settings: &JobSettings,
        period: &Period,
    ) -> Result<(), JobError> {
        if period.is_current {
            return Err(JobError::CurrentPeriod(period.to_string()));
        }
        let key = self.key(settings);
        self.store
            .put(&key, &Checkpoint::new(period.to))
            .await
            .map_err(|source| JobError::Checkpoint {
                key: key.clone(),
                source,
            })?;
        info!(job = %self.job_type, position = %period.to, "checkpoint advanced");
        Ok(())
    }
}
