//! One full pass over a window: load, fetch, aggregate, write, advance.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use tally_aggregate::Aggregator;
use tally_store::{CheckpointStore, DocumentSink, KnownIndexes, RangeQuery, RecordSource, ResultWriter};

use crate::definition::JobDefinition;
use crate::error::JobError;
use crate::fetch::fetch_all;
use crate::period::PeriodManager;
use crate::runner::{ExecutionPolicy, JobRunner, PeriodExecutor, PeriodReport};
use crate::stop::StopToken;

/// Source of "now"; swapped out in tests to pin the current day.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared collaborators a reduction job runs against.
#[derive(Clone)]
pub struct JobContext {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub source: Arc<dyn RecordSource>,
    pub sink: Arc<dyn DocumentSink>,
    pub aggregator: Arc<Aggregator>,
    /// Output indices already ensured, shared by every job of the process.
    pub known_indexes: KnownIndexes,
    pub policy: ExecutionPolicy,
}

/// Executes one window of a [`JobDefinition`] per call.
pub struct WindowedReduction<I, O, H> {
    definition: Arc<JobDefinition<I, O, H>>,
    periods: PeriodManager,
    source: Arc<dyn RecordSource>,
    writer: ResultWriter,
    aggregator: Arc<Aggregator>,
    page_size: usize,
    clock: Clock,
}

impl<I, O, H> WindowedReduction<I, O, H>
where
    I: DeserializeOwned + Send + Sync + 'static,
    O: Serialize + Send + Sync + 'static,
    H: Send + Sync + 'static,
{
    pub fn new(definition: JobDefinition<I, O, H>, ctx: &JobContext) -> Self {
        let periods = PeriodManager::new(definition.name(), Arc::clone(&ctx.checkpoints));
        Self {
            definition: Arc::new(definition),
            periods,
            source: Arc::clone(&ctx.source),
            writer: ResultWriter::with_known_indexes(
                Arc::clone(&ctx.sink),
                ctx.policy.page_size,
                ctx.known_indexes.clone(),
            ),
            aggregator: Arc::clone(&ctx.aggregator),
            page_size: ctx.policy.page_size,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn definition(&self) -> &JobDefinition<I, O, H> {
        &self.definition
    }

    /// Wrap in a runner with its own execution loop.
    pub fn into_runner(self, policy: ExecutionPolicy) -> JobRunner {
        let name = self.definition.name().to_string();
        JobRunner::new(name, Arc::new(self), policy)
    }
}

#[async_trait::async_trait]
impl<I, O, H> PeriodExecutor for WindowedReduction<I, O, H>
where
    I: DeserializeOwned + Send + Sync + 'static,
    O: Serialize + Send + Sync + 'static,
    H: Send + Sync + 'static,
{
    fn validate(&self) -> Result<(), JobError> {
        self.definition.validate()
    }

    async fn execute_period(&self, stop: &StopToken) -> Result<PeriodReport, JobError> {
        let settings = self.definition.settings();
        let job = self.definition.name();
        let now = (self.clock)();
        let started = Instant::now();

        let period = self.periods.load_period_at(settings, now).await;
        if period.is_future(now) {
            debug!(job, from = %period.from, "next window has not started yet");
            return Ok(PeriodReport::idle(period));
        }

        let query = RangeQuery {
            index: settings.source_index.clone(),
            timestamp_field: settings.timestamp_field.clone(),
            from: period.from,
            to: period.to,
            record_type: settings.record_type.clone(),
            size: self.page_size,
        };
        let batch = fetch_all::<I>(self.source.as_ref(), &query, stop).await?;
        let records = batch.records.len();

        let aggregator = Arc::clone(&self.aggregator);
        let reducer = self.definition.reducer();
        let combiner = self.definition.combiner();
        let flag = stop.flag().clone();
        let inputs = batch.records;
        let results = tokio::task::spawn_blocking(move || {
            aggregator.aggregate(&inputs, reducer.as_ref(), combiner.as_ref(), &flag)
        })
        .await
        .map_err(|e| JobError::Task(format!("aggregation task failed: {e}")))??;

        if stop.is_stopped() {
            return Err(JobError::Cancelled);
        }

        let index = settings.output_index(&period);
        let expires_at = settings.ttl.as_ref().map(|ttl| period.to + ttl.duration());
        let rows = self.writer.write(&results, &index, expires_at).await?;

        let advanced = if period.is_current {
            false
        } else {
            self.periods.advance_period(settings, &period).await?;
            true
        };

        info!(
            job,
            from = %period.from,
            current = period.is_current,
            records,
            skipped = batch.skipped,
            rows,
            index = %index,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "window processed"
        );

        Ok(PeriodReport {
            period,
            records,
            skipped: batch.skipped,
            rows,
            advanced,
        })
    }
}
