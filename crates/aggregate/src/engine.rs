use std::sync::Mutex;
use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use tally_core::ResultMap;

use crate::cancel::CancellationFlag;
use crate::error::AggregateError;
use crate::functions::{Combiner, Reducer};

/// Parallel map-then-combine engine backed by a dedicated rayon pool.
pub struct Aggregator {
    pool: rayon::ThreadPool,
    partitions: usize,
}

impl Aggregator {
    /// Create an aggregator with `worker_threads` workers; one partition per worker.
    pub fn new(worker_threads: usize) -> Result<Self, AggregateError> {
        let workers = worker_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tally-aggregate-{i}"))
            .build()?;
        Ok(Self {
            pool,
            partitions: workers,
        })
    }

    /// Override how many partitions a batch is split into.
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Reduce `records` into one merged result map.
    ///
    /// Workers check `cancel` before every record. The first reduce or combine
    /// failure aborts the run; no partial map is returned.
    pub fn aggregate<I, O, H>(
        &self,
        records: &[I],
        reducer: &dyn Reducer<I, O, H>,
        combiner: &dyn Combiner<O, H>,
        cancel: &CancellationFlag,
    ) -> Result<ResultMap<O, H>, AggregateError>
    where
        I: Sync,
        O: Send,
        H: Send,
    {
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }
        if records.is_empty() {
            return Ok(ResultMap::new());
        }

        let start = Instant::now();
        let partitions = self.partitions.min(records.len());
        let chunk_size = records.len().div_ceil(partitions);
        let global: Mutex<ResultMap<O, H>> = Mutex::new(ResultMap::new());

        self.pool.install(|| {
            records
                .par_chunks(chunk_size)
                .enumerate()
                .try_for_each(|(partition, chunk)| {
                    let mut local = ResultMap::new();
                    for record in chunk {
                        if cancel.is_cancelled() {
                            return Err(AggregateError::Cancelled);
                        }
                        reducer
                            .reduce(record, &mut local)
                            .map_err(|source| AggregateError::Reduce { partition, source })?;
                    }

                    let local_keys = local.len();
                    let mut merged = global
                        .lock()
                        .map_err(|e| AggregateError::LockPoisoned(format!("result map: {e}")))?;
                    combiner
                        .combine(&mut merged, local)
                        .map_err(|source| AggregateError::Combine { partition, source })?;

                    debug!(
                        partition,
                        records = chunk.len(),
                        local_keys,
                        "partition merged"
                    );
                    Ok(())
                })
        })?;

        let merged = global
            .into_inner()
            .map_err(|e| AggregateError::LockPoisoned(format!("result map: {e}")))?;

        debug!(
            records = records.len(),
            partitions,
            keys = merged.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "aggregation complete"
        );
        Ok(merged)
    }
}
