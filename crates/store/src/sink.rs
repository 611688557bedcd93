use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use tally_core::ResultMap;

use crate::document::{Document, DocumentSink};
use crate::error::StoreError;

/// Field holding the expiry timestamp of a row written with a TTL.
pub const EXPIRES_FIELD: &str = "@expires";

/// Output indices already checked or created. Clones share one set, so
/// every writer built from the same handle skips indices another has seen.
#[derive(Debug, Clone, Default)]
pub struct KnownIndexes {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl KnownIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: &str) -> bool {
        self.inner
            .lock()
            .map(|known| known.contains(index))
            .unwrap_or(false)
    }

    fn insert(&self, index: &str) {
        if let Ok(mut known) = self.inner.lock() {
            known.insert(index.to_string());
        }
    }
}

/// Writes merged result maps into the document store.
///
/// Each index is checked and created at most once per [`KnownIndexes`] set;
/// afterwards it is assumed to exist for the life of the process. Writers
/// built with [`ResultWriter::new`] get a private set.
pub struct ResultWriter {
    sink: Arc<dyn DocumentSink>,
    known: KnownIndexes,
    batch_size: usize,
}

impl ResultWriter {
    pub fn new(sink: Arc<dyn DocumentSink>, batch_size: usize) -> Self {
        Self::with_known_indexes(sink, batch_size, KnownIndexes::new())
    }

    /// Writer that shares its index cache with every other holder of `known`.
    pub fn with_known_indexes(sink: Arc<dyn DocumentSink>, batch_size: usize, known: KnownIndexes) -> Self {
        Self {
            sink,
            known,
            batch_size: batch_size.max(1),
        }
    }

    /// Make sure `index` exists, creating it on first use.
    pub async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        if self.known.contains(index) {
            return Ok(());
        }
        if !self.sink.index_exists(index).await? {
            self.sink.create_index(index).await?;
            info!(index, "output index created");
        }
        self.known.insert(index);
        Ok(())
    }

    /// Upsert one document per entry, keyed by the aggregation key.
    ///
    /// Only `output` is persisted. When `expires_at` is set each row carries
    /// it under [`EXPIRES_FIELD`]. Returns the number of rows written.
    pub async fn write<O, H>(
        &self,
        results: &ResultMap<O, H>,
        index: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<usize, StoreError>
    where
        O: Serialize,
    {
        self.ensure_index(index).await?;

        let mut keys: Vec<&String> = results.keys().collect();
        keys.sort();

        let mut docs = Vec::with_capacity(keys.len());
        for key in keys {
            let mut body = serde_json::to_value(&results[key].output)?;
            if let (Some(expires), Value::Object(map)) = (expires_at, &mut body) {
                map.insert(EXPIRES_FIELD.to_string(), Value::String(expires.to_rfc3339()));
            }
            docs.push(Document {
                id: key.clone(),
                body,
            });
        }

        for chunk in docs.chunks(self.batch_size) {
            self.sink.upsert(index, chunk).await?;
            debug!(index, rows = chunk.len(), "result batch written");
        }
        Ok(docs.len())
    }
}
