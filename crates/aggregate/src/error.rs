/// Error type for one aggregation run.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("reduce failed in partition {partition}: {source}")]
    Reduce {
        partition: usize,
        source: anyhow::Error,
    },
    #[error("combine failed for partition {partition}: {source}")]
    Combine {
        partition: usize,
        source: anyhow::Error,
    },
    #[error("aggregation cancelled")]
    Cancelled,
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
