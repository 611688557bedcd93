//! Per-job execution loop with retry, backoff and failure escalation.
//!
//! ```text
//!   Stopped --start--> Running --error--> Retrying --success--> Running
//!      ^                  |                  |
//!      +------stop--------+------stop--------+
//!                                            |
//!                             retry bound reached --> Broken
//! ```

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tally_core::config::ExecutionConfig;
use tally_core::Period;

use crate::error::JobError;
use crate::stop::{StopSource, StopToken};

// ── Executor seam ─────────────────────────────────────────────

/// Outcome of one successfully executed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    pub period: Period,
    pub records: usize,
    pub skipped: usize,
    pub rows: usize,
    /// False for the current (or a not yet started) window: the loop idles.
    pub advanced: bool,
}

impl PeriodReport {
    /// A window that was looked at but not processed.
    pub fn idle(period: Period) -> Self {
        Self {
            period,
            records: 0,
            skipped: 0,
            rows: 0,
            advanced: false,
        }
    }
}

/// One unit of work the loop repeats: process the next window.
#[async_trait::async_trait]
pub trait PeriodExecutor: Send + Sync {
    fn validate(&self) -> Result<(), JobError> {
        Ok(())
    }

    async fn execute_period(&self, stop: &StopToken) -> Result<PeriodReport, JobError>;
}

// ── Status and stats ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Stopped,
    Running,
    Retrying,
    /// Retry bound exhausted. Only an explicit `start()` runs the job again.
    Broken,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Stopped => "stopped",
            RunStatus::Running => "running",
            RunStatus::Retrying => "retrying",
            RunStatus::Broken => "broken",
        };
        f.write_str(s)
    }
}

/// Counters observed across the lifetime of a runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub periods_completed: u64,
    pub records_processed: u64,
    pub rows_written: u64,
    pub failures: u64,
    pub backoffs: u64,
    /// Consecutive failures since the last success.
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_period: Option<Period>,
    pub last_success_at: Option<DateTime<Utc>>,
}

// ── Policy ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    /// Consecutive failed attempts that mark the job broken.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub idle_interval: Duration,
    pub page_size: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl ExecutionPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            idle_interval: Duration::from_secs(config.idle_interval_secs),
            page_size: config.page_size.max(1),
        }
    }
}

// ── Runner ────────────────────────────────────────────────────

#[derive(Debug)]
struct Shared {
    status: RwLock<RunStatus>,
    stats: RwLock<JobStats>,
}

impl Shared {
    fn status(&self) -> RunStatus {
        self.status.read().map(|s| *s).unwrap_or(RunStatus::Broken)
    }

    fn set_status(&self, status: RunStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut JobStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}

struct RunHandle {
    stop: StopSource,
    task: JoinHandle<()>,
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Owns the background task of one job.
pub struct JobRunner {
    name: String,
    executor: Arc<dyn PeriodExecutor>,
    policy: ExecutionPolicy,
    shared: Arc<Shared>,
    handle: Mutex<Option<RunHandle>>,
}

impl JobRunner {
    pub fn new(name: impl Into<String>, executor: Arc<dyn PeriodExecutor>, policy: ExecutionPolicy) -> Self {
        Self {
            name: name.into(),
            executor,
            policy,
            shared: Arc::new(Shared {
                status: RwLock::new(RunStatus::Stopped),
                stats: RwLock::new(JobStats::default()),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn status(&self) -> RunStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> JobStats {
        self.shared
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), JobError> {
        self.executor.validate()
    }

    /// Launch the background loop. Returns once it is spawned.
    ///
    /// No-op while the loop is alive. Starting a broken job resets its retry
    /// counter and runs it again.
    pub async fn start(&self) -> Result<(), JobError> {
        let mut handle = self.handle.lock().await;
        if let Some(ref h) = *handle {
            if !h.task.is_finished() {
                return Ok(());
            }
        }

        let stop = StopSource::new();
        let token = stop.token();
        self.shared.set_status(RunStatus::Running);
        self.shared.update_stats(|s| s.retry_count = 0);

        let task = tokio::spawn(run_loop(
            self.name.clone(),
            Arc::clone(&self.executor),
            self.policy.clone(),
            Arc::clone(&self.shared),
            token,
        ));
        *handle = Some(RunHandle { stop, task });

        info!(job = %self.name, "job started");
        Ok(())
    }

    /// Request cancellation and wait for the loop to exit. Idempotent.
    ///
    /// The handle lock is held until the loop has exited, so a concurrent
    /// `start()` or `stop()` waits for the join instead of racing it.
    pub async fn stop(&self) -> Result<(), JobError> {
        let mut handle = self.handle.lock().await;
        let Some(h) = handle.as_mut() else {
            return Ok(());
        };
        h.stop.stop();
        let result = (&mut h.task).await;
        *handle = None;

        if matches!(self.shared.status(), RunStatus::Running | RunStatus::Retrying) {
            self.shared.set_status(RunStatus::Stopped);
        }
        match result {
            Ok(()) => {
                info!(job = %self.name, status = %self.status(), "job stopped");
                Ok(())
            }
            Err(e) => Err(JobError::Task(format!("job loop failed: {e}"))),
        }
    }
}

async fn run_loop(
    name: String,
    executor: Arc<dyn PeriodExecutor>,
    policy: ExecutionPolicy,
    shared: Arc<Shared>,
    stop: StopToken,
) {
    loop {
        if stop.is_stopped() {
            break;
        }

        // Run each attempt on its own task so a panic is an ordinary failure.
        let attempt = {
            let executor = Arc::clone(&executor);
            let stop = stop.clone();
            tokio::spawn(async move { executor.execute_period(&stop).await })
        };
        let outcome = match attempt.await {
            Ok(result) => result,
            Err(e) => Err(JobError::Task(format!("period task failed: {e}"))),
        };

        match outcome {
            Ok(report) => {
                if shared.status() == RunStatus::Retrying {
                    info!(job = %name, "job recovered");
                }
                shared.set_status(RunStatus::Running);
                shared.update_stats(|s| {
                    s.retry_count = 0;
                    s.records_processed += report.records as u64;
                    s.rows_written += report.rows as u64;
                    if report.advanced {
                        s.periods_completed += 1;
                    }
                    s.last_period = Some(report.period.clone());
                    s.last_success_at = Some(Utc::now());
                });

                if !report.advanced && !stop.sleep(policy.idle_interval).await {
                    break;
                }
            }
            Err(e) if e.is_cancellation() || stop.is_stopped() => break,
            Err(e) => {
                let mut retries = 0;
                shared.update_stats(|s| {
                    s.retry_count += 1;
                    s.failures += 1;
                    s.last_error = Some(e.to_string());
                    retries = s.retry_count;
                });

                if retries >= policy.max_retries {
                    error!(job = %name, attempts = retries, error = %e, "job broken, giving up");
                    shared.set_status(RunStatus::Broken);
                    return;
                }

                warn!(
                    job = %name,
                    attempt = retries,
                    max = policy.max_retries,
                    backoff_secs = policy.retry_backoff.as_secs_f64(),
                    error = %e,
                    "window failed, retrying"
                );
                shared.set_status(RunStatus::Retrying);
                shared.update_stats(|s| s.backoffs += 1);
                if !stop.sleep(policy.retry_backoff).await {
                    break;
                }
            }
        }
    }

    shared.set_status(RunStatus::Stopped);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;
    use tally_core::TimeInterval;

    use super::*;

    fn fast_policy(max_retries: u32) -> ExecutionPolicy {
        ExecutionPolicy {
            max_retries,
            retry_backoff: Duration::from_millis(1),
            idle_interval: Duration::from_secs(3600),
            page_size: 10,
        }
    }

    fn report(advanced: bool) -> PeriodReport {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PeriodReport {
            period: Period::starting_at(from, TimeInterval::Day, from + chrono::Duration::days(10)),
            records: 3,
            skipped: 0,
            rows: 1,
            advanced,
        }
    }

    /// Fails `fail_first` times, then reports a current window forever.
    struct Scripted {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl PeriodExecutor for Scripted {
        async fn execute_period(&self, _stop: &StopToken) -> Result<PeriodReport, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(JobError::Invalid(format!("scripted failure {call}")));
            }
            Ok(report(false))
        }
    }

    async fn wait_for(runner: &JobRunner, pred: impl Fn(&JobRunner) -> bool) {
        for _ in 0..500 {
            if pred(runner) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached; status = {}", runner.status());
    }

    #[tokio::test]
    async fn new_runner_is_stopped_and_stop_is_a_no_op() {
        let runner = JobRunner::new(
            "idle",
            Arc::new(Scripted { fail_first: 0, calls: AtomicU32::new(0) }),
            fast_policy(3),
        );
        assert_eq!(runner.status(), RunStatus::Stopped);
        runner.stop().await.unwrap();
        assert_eq!(runner.status(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn success_idles_on_current_window_until_stopped() {
        let exec = Arc::new(Scripted { fail_first: 0, calls: AtomicU32::new(0) });
        let runner = JobRunner::new("current", exec.clone(), fast_policy(3));
        runner.start().await.unwrap();
        wait_for(&runner, |r| r.stats().last_success_at.is_some()).await;

        assert_eq!(runner.status(), RunStatus::Running);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(5), runner.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runner.status(), RunStatus::Stopped);
        assert_eq!(runner.stats().periods_completed, 0);
    }

    #[tokio::test]
    async fn start_twice_keeps_one_loop() {
        let exec = Arc::new(Scripted { fail_first: 0, calls: AtomicU32::new(0) });
        let runner = JobRunner::new("twice", exec.clone(), fast_policy(3));
        runner.start().await.unwrap();
        runner.start().await.unwrap();
        wait_for(&runner, |r| r.stats().last_success_at.is_some()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        runner.stop().await.unwrap();
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_executor_counts_as_failure() {
        struct Panics;

        #[async_trait::async_trait]
        impl PeriodExecutor for Panics {
            async fn execute_period(&self, _stop: &StopToken) -> Result<PeriodReport, JobError> {
                panic!("reduce blew up");
            }
        }

        let runner = JobRunner::new("panics", Arc::new(Panics), fast_policy(2));
        runner.start().await.unwrap();
        wait_for(&runner, |r| r.status() == RunStatus::Broken).await;
        assert_eq!(runner.stats().failures, 2);
    }

    /// Takes `first` for the first call and `rest` for every later one,
    /// ignoring the stop token, and tracks how many calls overlap.
    struct Slow {
        first: Duration,
        rest: Duration,
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl Slow {
        fn new(first: Duration, rest: Duration) -> Arc<Self> {
            Arc::new(Self {
                first,
                rest,
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl PeriodExecutor for Slow {
        async fn execute_period(&self, _stop: &StopToken) -> Result<PeriodReport, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(if call == 0 { self.first } else { self.rest }).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(report(false))
        }
    }

    #[tokio::test]
    async fn restart_while_stopping_waits_for_old_loop() {
        let exec = Slow::new(Duration::from_millis(300), Duration::from_millis(10));
        let runner = JobRunner::new("draining", exec.clone(), fast_policy(3));
        runner.start().await.unwrap();

        let (stopped, started) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                runner.stop().await
            },
            async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                runner.start().await
            },
        );
        stopped.unwrap();
        started.unwrap();

        wait_for(&runner, |_| exec.calls.load(Ordering::SeqCst) == 2).await;
        wait_for(&runner, |_| exec.in_flight.load(Ordering::SeqCst) == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(runner.status(), RunStatus::Running);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
        assert_eq!(exec.max_in_flight.load(Ordering::SeqCst), 1);

        runner.stop().await.unwrap();
        assert_eq!(runner.status(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn overlapping_stops_both_wait_for_exit() {
        let exec = Slow::new(Duration::from_millis(200), Duration::from_millis(200));
        let runner = JobRunner::new("double-stop", exec.clone(), fast_policy(3));
        runner.start().await.unwrap();
        wait_for(&runner, |_| exec.calls.load(Ordering::SeqCst) == 1).await;

        let (first, second) = tokio::join!(runner.stop(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let result = runner.stop().await;
            (result, runner.status())
        });
        first.unwrap();
        let (result, status_after_second) = second;
        result.unwrap();

        assert_eq!(status_after_second, RunStatus::Stopped);
        assert_eq!(exec.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_defaults() {
        let p = ExecutionPolicy::default();
        assert_eq!(p.max_retries, 10);
        assert_eq!(p.retry_backoff, Duration::from_secs(10));
        assert_eq!(p.idle_interval, Duration::from_secs(60));
        assert_eq!(p.page_size, 10_000);
    }
}
