use crate::core::error::QueryError;
use crate::core::types::{BatchItem, BatchProgress, Characteristics, Query};
use crate::tools::search::ListingSearch;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Blank entries are dropped and repeats (ignoring case and spacing) searched once.
pub fn prepare_queries(
    texts: &[String],
    characteristics: &Characteristics,
) -> Result<Vec<Query>, QueryError> {
    let mut seen = HashSet::new();
    let queries: Vec<Query> = texts
        .iter()
        .filter_map(|t| Query::new(t.as_str(), characteristics.clone()).ok())
        .filter(|q| seen.insert(q.text().to_lowercase()))
        .collect();
    if queries.is_empty() {
        return Err(QueryError::Empty);
    }
    Ok(queries)
}

/// Search many queries with bounded concurrency, yielding one item per query
/// as soon as it completes. A query counts as failed when no source returned
/// a real listing.
pub fn search_batch(
    search: Arc<dyn ListingSearch>,
    queries: Vec<Query>,
    max_concurrent: usize,
) -> BoxStream<'static, BatchItem> {
    let batch_id = uuid::Uuid::new_v4().to_string();
    let total = queries.len();
    let started = Instant::now();
    info!(
        "Starting batch {} of {} queries (concurrency: {})",
        batch_id, total, max_concurrent
    );

    stream::iter(queries)
        .map(move |q| {
            let search = Arc::clone(&search);
            async move { search.search(&q).await }
        })
        .buffer_unordered(max_concurrent.max(1))
        .scan(
            BatchProgress {
                total,
                processed: 0,
                failed: 0,
            },
            move |progress, result| {
                progress.processed += 1;
                if !result.has_real_listings() {
                    progress.failed += 1;
                }
                if progress.processed == progress.total {
                    info!(
                        "Batch {} completed: {}/{} with results, {} failed, {}ms total",
                        batch_id,
                        progress.total - progress.failed,
                        progress.total,
                        progress.failed,
                        started.elapsed().as_millis()
                    );
                }
                futures::future::ready(Some(BatchItem {
                    batch_id: batch_id.clone(),
                    result,
                    progress: *progress,
                }))
            },
        )
        .boxed()
}
