//! Fork-join aggregation of one batch of records into a keyed [`ResultMap`].
//!
//! Records are split into partitions reduced on a rayon pool. Each partition
//! accumulates into its own private map; finished partitions are folded into
//! the single shared map under a mutex by the job's [`Combiner`].
//!
//! [`ResultMap`]: tally_core::ResultMap

pub mod cancel;
pub mod engine;
pub mod error;
pub mod functions;

pub use cancel::CancellationFlag;
pub use engine::Aggregator;
pub use error::AggregateError;
pub use functions::{Combiner, Reducer};
