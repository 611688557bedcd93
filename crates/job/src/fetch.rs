//! Paged retrieval of every record in one window.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tally_store::{RangeQuery, RecordSource};

use crate::error::JobError;
use crate::stop::StopToken;

/// Records of one window plus how many raw hits could not be decoded.
#[derive(Debug)]
pub struct FetchedBatch<I> {
    pub records: Vec<I>,
    pub skipped: usize,
    /// Total reported by the store.
    pub total: u64,
}

/// Page through `query` until the reported total is consumed, the store
/// returns an empty page, or it stops handing out cursors.
///
/// Hits that do not decode into `I` are logged and skipped.
pub async fn fetch_all<I>(
    source: &dyn RecordSource,
    query: &RangeQuery,
    stop: &StopToken,
) -> Result<FetchedBatch<I>, JobError>
where
    I: DeserializeOwned,
{
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut seen = 0u64;
    let mut cursor: Option<String> = None;
    let mut total = 0u64;
    let mut pages = 0usize;

    let result = loop {
        if stop.is_stopped() {
            break Err(JobError::Cancelled);
        }

        let page = match source.fetch_page(query, cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => break Err(e.into()),
        };
        pages += 1;
        total = page.total;

        if page.hits.is_empty() {
            break Ok(());
        }
        seen += page.hits.len() as u64;

        for hit in page.hits {
            match serde_json::from_value::<I>(hit) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    if skipped <= 10 {
                        warn!(index = %query.index, error = %e, "skipping undecodable record");
                    }
                }
            }
        }
        debug!(page = pages, fetched = seen, total, "page decoded");

        if let Some(next) = page.cursor {
            cursor = Some(next);
        } else {
            break Ok(());
        }
        if seen >= total {
            break Ok(());
        }
    };

    if let Some(ref c) = cursor {
        if let Err(e) = source.release(c).await {
            warn!(error = %e, "failed to release search cursor");
        }
    }
    result?;

    if skipped > 0 {
        warn!(index = %query.index, skipped, "records skipped in window");
    }
    Ok(FetchedBatch {
        records,
        skipped,
        total,
    })
}
