//! Storage seams of a reduction job.
//!
//! - [`checkpoint`]: durable per-job progress markers (file-backed or in-memory)
//! - [`document`]: record source / document sink traits over the document store
//! - [`elastic`]: Elasticsearch / OpenSearch HTTP implementation of both
//! - [`memory`]: in-process document store for tests and dry runs
//! - [`sink`]: writes merged result maps as idempotent upserts

pub mod checkpoint;
pub mod document;
pub mod elastic;
pub mod error;
pub mod memory;
pub mod sink;

pub use checkpoint::{storage_key, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use document::{Document, DocumentSink, RangeQuery, RecordSource, SearchPage};
pub use elastic::ElasticClient;
pub use error::StoreError;
pub use memory::InMemoryDocumentStore;
pub use sink::{KnownIndexes, ResultWriter, EXPIRES_FIELD};
