use crate::core::types::{Query, SearchResult};
use async_trait::async_trait;

/// Anything that can answer a query with a per-source result map.
/// Never fails as a whole; per-source problems are reported inside the result.
#[async_trait]
pub trait ListingSearch: Send + Sync {
    async fn search(&self, query: &Query) -> SearchResult;
}
