//! Document store seams.
//!
//! The job crate only depends on these traits; [`crate::ElasticClient`] talks
//! HTTP to a real cluster and [`crate::InMemoryDocumentStore`] backs tests.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreError;

/// Half-open `[from, to)` range query over one index pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// Index name or pattern (`logstash-*`).
    pub index: String,
    /// Field the range filter runs against.
    pub timestamp_field: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Optional exact-match filter on the `type` field.
    pub record_type: Option<String>,
    /// Hits per page.
    pub size: usize,
}

impl RangeQuery {
    /// Query DSL body for the range, sorted ascending on the timestamp field.
    pub fn to_body(&self) -> Value {
        let field = self.timestamp_field.as_str();
        let mut filters = vec![serde_json::json!({
            "range": {
                field: {
                    "gte": self.from.to_rfc3339(),
                    "lt": self.to.to_rfc3339(),
                }
            }
        })];
        if let Some(ref kind) = self.record_type {
            filters.push(serde_json::json!({ "term": { "type": kind } }));
        }

        serde_json::json!({
            "size": self.size,
            "track_total_hits": true,
            "sort": [{ field: "asc" }],
            "query": { "bool": { "filter": filters } }
        })
    }
}

/// One page of hits.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Total hits reported for the whole query.
    pub total: u64,
    /// Raw `_source` bodies of this page.
    pub hits: Vec<Value>,
    /// Cursor for the next page; `None` when the store has nothing more.
    pub cursor: Option<String>,
}

/// A row to upsert, keyed by its aggregation key.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

/// Paged reads of raw records.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the first page (`cursor = None`) or the page after `cursor`.
    async fn fetch_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&str>,
    ) -> Result<SearchPage, StoreError>;

    /// Release server-side resources held by a cursor.
    async fn release(&self, _cursor: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Idempotent writes of aggregate rows.
#[async_trait::async_trait]
pub trait DocumentSink: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError>;

    async fn create_index(&self, index: &str) -> Result<(), StoreError>;

    /// Upsert every document by id. Re-sending the same documents is a no-op.
    async fn upsert(&self, index: &str, docs: &[Document]) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn range_body_shape() {
        let q = RangeQuery {
            index: "logstash-*".into(),
            timestamp_field: "@timestamp".into(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            record_type: Some("search".into()),
            size: 500,
        };
        let body = q.to_body();
        assert_eq!(body["size"], 500);
        let filters = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(
            filters[0]["range"]["@timestamp"]["gte"],
            "2024-01-01T00:00:00+00:00"
        );
        assert_eq!(filters[0]["range"]["@timestamp"]["lt"], "2024-01-02T00:00:00+00:00");
        assert_eq!(filters[1]["term"]["type"], "search");
        assert_eq!(body["sort"][0]["@timestamp"], "asc");
    }

    #[test]
    fn no_type_filter_without_record_type() {
        let q = RangeQuery {
            index: "events".into(),
            timestamp_field: "ts".into(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            record_type: None,
            size: 10,
        };
        assert_eq!(q.to_body()["query"]["bool"]["filter"].as_array().unwrap().len(), 1);
    }
}
