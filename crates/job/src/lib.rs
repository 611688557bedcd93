//! Windowed reduction jobs.
//!
//! A [`JobDefinition`] pairs settings with a reduce/combine function pair.
//! [`WindowedReduction`] runs one window of it end to end: derive the period
//! from the checkpoint, page the window's records out of the store, aggregate
//! them in parallel, upsert the merged rows and advance the checkpoint.
//! [`JobRunner`] repeats that on a background task with retry and backoff,
//! and [`JobRegistry`] starts and stops every configured job together.

pub mod definition;
pub mod error;
pub mod fetch;
pub mod period;
pub mod registry;
pub mod runner;
pub mod stop;
pub mod window;

pub use definition::{JobDefinition, JobDefinitionBuilder};
pub use error::JobError;
pub use fetch::{fetch_all, FetchedBatch};
pub use period::PeriodManager;
pub use registry::{JobFactory, JobRegistry, ManagedJob};
pub use runner::{ExecutionPolicy, JobRunner, JobStats, PeriodExecutor, PeriodReport, RunStatus};
pub use stop::{StopSource, StopToken};
pub use window::{Clock, JobContext, WindowedReduction};
