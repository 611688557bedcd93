//! In-process document store.
//!
//! Serves range queries over inserted records and keeps upserted rows per
//! index, so the whole read-aggregate-write path can run without a cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{Document, DocumentSink, RangeQuery, RecordSource, SearchPage};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    /// index -> raw records, in insertion order.
    records: HashMap<String, Vec<Value>>,
    /// index -> id -> row.
    documents: HashMap<String, BTreeMap<String, Value>>,
    indices: HashSet<String>,
    index_exists_calls: usize,
    create_index_calls: usize,
    upsert_calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw record to `index`.
    pub fn insert_record(&self, index: &str, record: Value) {
        if let Ok(mut inner) = self.inner.write() {
            inner.records.entry(index.to_string()).or_default().push(record);
        }
    }

    /// Rows written to `index`, keyed by document id.
    pub fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.documents.get(index).cloned())
            .unwrap_or_default()
    }

    pub fn index_exists_calls(&self) -> usize {
        self.inner.read().map(|i| i.index_exists_calls).unwrap_or(0)
    }

    pub fn create_index_calls(&self) -> usize {
        self.inner.read().map(|i| i.create_index_calls).unwrap_or(0)
    }

    pub fn upsert_calls(&self) -> usize {
        self.inner.read().map(|i| i.upsert_calls).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Decode(format!("store lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Decode(format!("store lock poisoned: {e}")))
    }
}

/// Match an index name against a pattern where `*` matches any run of characters.
fn index_matches(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn in_range(record: &Value, query: &RangeQuery) -> bool {
    let ts = record
        .get(&query.timestamp_field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc));
    let Some(ts) = ts else {
        return false;
    };
    if ts < query.from || ts >= query.to {
        return false;
    }
    match query.record_type {
        Some(ref kind) => record.get("type").and_then(Value::as_str) == Some(kind.as_str()),
        None => true,
    }
}

#[async_trait::async_trait]
impl RecordSource for InMemoryDocumentStore {
    async fn fetch_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&str>,
    ) -> Result<SearchPage, StoreError> {
        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| StoreError::Decode(format!("bad cursor: {c}")))?,
            None => 0,
        };

        let inner = self.read()?;
        let mut index_names: Vec<&String> = inner
            .records
            .keys()
            .filter(|name| index_matches(&query.index, name))
            .collect();
        index_names.sort();

        let matching: Vec<&Value> = index_names
            .into_iter()
            .flat_map(|name| inner.records[name].iter())
            .filter(|r| in_range(r, query))
            .collect();

        let total = matching.len();
        let end = (offset + query.size.max(1)).min(total);
        let hits: Vec<Value> = matching
            .get(offset..end)
            .map(|slice| slice.iter().map(|v| (*v).clone()).collect())
            .unwrap_or_default();
        let cursor = (end < total).then(|| end.to_string());

        Ok(SearchPage {
            total: total as u64,
            hits,
            cursor,
        })
    }
}

#[async_trait::async_trait]
impl DocumentSink for InMemoryDocumentStore {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        inner.index_exists_calls += 1;
        Ok(inner.indices.contains(index))
    }

    async fn create_index(&self, index: &str) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.create_index_calls += 1;
        inner.indices.insert(index.to_string());
        Ok(())
    }

    async fn upsert(&self, index: &str, docs: &[Document]) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.upsert_calls += 1;
        let rows = inner.documents.entry(index.to_string()).or_default();
        for doc in docs {
            rows.insert(doc.id.clone(), doc.body.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn day_query(size: usize) -> RangeQuery {
        RangeQuery {
            index: "logstash-*".into(),
            timestamp_field: "@timestamp".into(),
            from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            record_type: None,
            size,
        }
    }

    #[test]
    fn wildcard_matching() {
        assert!(index_matches("logstash-*", "logstash-2024.01.01"));
        assert!(index_matches("*", "anything"));
        assert!(index_matches("a*c", "abbbc"));
        assert!(!index_matches("logstash-*", "other-2024"));
        assert!(index_matches("exact", "exact"));
        assert!(!index_matches("exact", "exactly"));
    }

    #[tokio::test]
    async fn range_filter_is_half_open() {
        let store = InMemoryDocumentStore::new();
        store.insert_record("logstash-a", json!({ "@timestamp": "2024-01-01T00:00:00Z" }));
        store.insert_record("logstash-a", json!({ "@timestamp": "2024-01-01T23:59:59Z" }));
        store.insert_record("logstash-a", json!({ "@timestamp": "2024-01-02T00:00:00Z" }));
        store.insert_record("logstash-a", json!({ "no_timestamp": true }));

        let page = store.fetch_page(&day_query(100), None).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.hits.len(), 2);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn pages_through_results() {
        let store = InMemoryDocumentStore::new();
        for i in 0..5 {
            store.insert_record(
                "logstash-a",
                json!({ "@timestamp": format!("2024-01-01T0{i}:00:00Z"), "n": i }),
            );
        }
        let q = day_query(2);
        let first = store.fetch_page(&q, None).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.hits.len(), 2);
        let second = store.fetch_page(&q, first.cursor.as_deref()).await.unwrap();
        assert_eq!(second.hits[0]["n"], 2);
        let third = store.fetch_page(&q, second.cursor.as_deref()).await.unwrap();
        assert_eq!(third.hits.len(), 1);
        assert!(third.cursor.is_none());
    }

    #[tokio::test]
    async fn type_filter() {
        let store = InMemoryDocumentStore::new();
        store.insert_record("logstash-a", json!({ "@timestamp": "2024-01-01T01:00:00Z", "type": "search" }));
        store.insert_record("logstash-a", json!({ "@timestamp": "2024-01-01T02:00:00Z", "type": "click" }));
        let mut q = day_query(10);
        q.record_type = Some("search".into());
        assert_eq!(store.fetch_page(&q, None).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryDocumentStore::new();
        let doc = |n: u64| Document { id: "k".into(), body: json!({ "n": n }) };
        store.upsert("out", &[doc(1)]).await.unwrap();
        store.upsert("out", &[doc(2)]).await.unwrap();
        let rows = store.documents("out");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows["k"]["n"], 2);
    }
}
