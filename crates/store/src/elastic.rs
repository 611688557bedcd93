//! Elasticsearch / OpenSearch HTTP client.
//!
//! Reads use the scroll API so a window larger than `index.max_result_window`
//! can still be paged through. Writes use `_bulk` with `index` actions keyed
//! by document id, which makes a re-run of the same window an overwrite.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use tally_core::JobSettings;

use crate::document::{Document, DocumentSink, RangeQuery, RecordSource, SearchPage};
use crate::error::StoreError;

/// How long the cluster keeps a scroll context alive between pages.
const SCROLL_KEEP_ALIVE: &str = "2m";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client bound to one cluster.
#[derive(Debug, Clone)]
pub struct ElasticClient {
    base_url: String,
    client: reqwest::Client,
}

impl ElasticClient {
    /// Client for `base_url` keeping at most `connection_limit` idle connections.
    pub fn new(base_url: impl Into<String>, connection_limit: usize) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(connection_limit.max(1))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Client for the cluster a job's settings point at.
    pub fn from_settings(settings: &JobSettings) -> Result<Self, StoreError> {
        Self::new(settings.base_url(), settings.connection_limit)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

/// Parse a search / scroll response into a page.
pub(crate) fn parse_search_response(body: &Value) -> Result<SearchPage, StoreError> {
    let hits = body
        .get("hits")
        .ok_or_else(|| StoreError::Decode("response has no `hits`".into()))?;

    // `hits.total` is a number on older clusters and `{ "value": n }` on newer ones.
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(obj @ Value::Object(_)) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };

    let docs = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|h| h.get("_source").cloned())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let cursor = body
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(SearchPage {
        total,
        hits: docs,
        cursor,
    })
}

/// Render documents as a `_bulk` NDJSON body of `index` actions.
pub(crate) fn bulk_body(index: &str, docs: &[Document]) -> Result<String, StoreError> {
    let mut body = String::new();
    for doc in docs {
        let action = serde_json::json!({ "index": { "_index": index, "_id": doc.id } });
        let _ = writeln!(body, "{}", serde_json::to_string(&action)?);
        let _ = writeln!(body, "{}", serde_json::to_string(&doc.body)?);
    }
    Ok(body)
}

/// Check a `_bulk` response for item-level failures.
pub(crate) fn check_bulk_response(body: &Value, total: usize) -> Result<(), StoreError> {
    if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }

    let failures: Vec<&Value> = body
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().and_then(|o| o.values().next()))
                .filter(|result| result.get("error").is_some())
                .collect()
        })
        .unwrap_or_default();

    let reason = failures
        .first()
        .and_then(|f| f.get("error"))
        .map(|e| {
            e.get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .unwrap_or_else(|| "unknown bulk error".to_string());

    Err(StoreError::Bulk {
        failed: failures.len().max(1),
        total,
        reason,
    })
}

#[async_trait::async_trait]
impl RecordSource for ElasticClient {
    async fn fetch_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&str>,
    ) -> Result<SearchPage, StoreError> {
        let body = match cursor {
            None => {
                let url = self.url(&format!("{}/_search", query.index));
                let request = self
                    .client
                    .post(url)
                    .query(&[("scroll", SCROLL_KEEP_ALIVE)])
                    .json(&query.to_body());
                self.send_json(request).await?
            }
            Some(scroll_id) => {
                let request = self.client.post(self.url("_search/scroll")).json(&serde_json::json!({
                    "scroll": SCROLL_KEEP_ALIVE,
                    "scroll_id": scroll_id,
                }));
                self.send_json(request).await?
            }
        };

        let page = parse_search_response(&body)?;
        debug!(
            index = %query.index,
            total = page.total,
            hits = page.hits.len(),
            "search page fetched"
        );
        Ok(page)
    }

    async fn release(&self, cursor: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.url("_search/scroll"))
            .json(&serde_json::json!({ "scroll_id": [cursor] }))
            .send()
            .await?;
        let status = response.status();
        // An already-expired scroll is fine.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            warn!(%status, "failed to clear scroll context");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentSink for ElasticClient {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        let response = self.client.head(self.url(index)).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(StoreError::Status {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str) -> Result<(), StoreError> {
        let response = self.client.put(self.url(index)).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(index, "index created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // Another worker may have created it between the HEAD and the PUT.
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn upsert(&self, index: &str, docs: &[Document]) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let payload = bulk_body(index, docs)?;
        let request = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        let body = self.send_json(request).await?;
        check_bulk_response(&body, docs.len())?;

        debug!(index, documents = docs.len(), "bulk upsert complete");
        Ok(())
    }
}
