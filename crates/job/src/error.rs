use thiserror::Error;

use tally_aggregate::AggregateError;
use tally_core::CoreError;
use tally_store::StoreError;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("checkpoint write failed for '{key}': {source}")]
    Checkpoint {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("refusing to advance the current period {0}")]
    CurrentPeriod(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("invalid job definition: {0}")]
    Invalid(String),

    #[error("invalid settings: {0}")]
    Settings(#[from] CoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl JobError {
    /// True for errors caused by a stop request rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            JobError::Cancelled | JobError::Aggregate(AggregateError::Cancelled)
        )
    }
}
