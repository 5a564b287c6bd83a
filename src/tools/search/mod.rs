//! Multi-source search: one isolated task per source, merged after all settle.

pub mod adapter;
pub mod chain;
pub mod service;
pub mod sources;

pub use adapter::SourceAdapter;
pub use service::ListingSearch;

use crate::core::config::ScoutConfig;
use crate::core::types::{Query, SearchResult, Source, SourceReport, SourceStatus};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct Orchestrator {
    adapters: Vec<Arc<SourceAdapter>>,
    config: Arc<ScoutConfig>,
}

impl Orchestrator {
    /// Builds adapters for every configured source.
    pub async fn new(config: Arc<ScoutConfig>, client: &reqwest::Client) -> Self {
        let adapters = sources::build_adapters(&config, client).await;
        Self::with_adapters(adapters, config)
    }

    pub fn with_adapters(adapters: Vec<SourceAdapter>, config: Arc<ScoutConfig>) -> Self {
        Self {
            adapters: adapters.into_iter().map(Arc::new).collect(),
            config,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    pub async fn search(&self, query: &Query) -> SearchResult {
        let started = Instant::now();
        info!(
            "🔍 '{}' across {} sources ({} characteristics)",
            query,
            self.adapters.len(),
            query.characteristics().len()
        );

        let tasks = self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let source = adapter.source();
            let deadline = self.config.deadline_for(source);
            let q = query.clone();
            let handle = tokio::spawn(async move {
                tokio::time::timeout(deadline, async move { adapter.search(&q).await }).await
            });
            async move { (source, deadline, handle.await) }
        });
        let settled = join_all(tasks).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut sources = BTreeMap::new();
        for (source, deadline, outcome) in settled {
            let report = match outcome {
                Ok(Ok(report)) => report,
                Ok(Err(_)) => {
                    warn!("⏱️ {} timed out after {}s", source, deadline.as_secs());
                    SourceReport::failed(
                        SourceStatus::TimedOut,
                        format!("timed out after {}s", deadline.as_secs()),
                        deadline.as_millis() as u64,
                    )
                }
                Err(e) => {
                    error!("{} task failed: {}", source, e);
                    SourceReport::failed(
                        SourceStatus::Failed,
                        format!("source task failed: {}", e),
                        elapsed_ms,
                    )
                }
            };
            sources.insert(source, report);
        }

        let result = SearchResult {
            query: query.text().to_string(),
            sources,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "✅ '{}': {} listings from {} sources in {}ms",
            query,
            result.listing_count(),
            result.sources.len(),
            result.total_duration_ms
        );
        result
    }
}

#[async_trait]
impl ListingSearch for Orchestrator {
    async fn search(&self, query: &Query) -> SearchResult {
        Orchestrator::search(self, query).await
    }
}
