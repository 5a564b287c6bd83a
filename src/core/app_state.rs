use crate::core::config::ScoutConfig;
use crate::tools::search::{ListingSearch, Orchestrator};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ScoutConfig>,
    pub search: Arc<dyn ListingSearch>,
    /// Number of configured sources, reported by `/health`.
    pub source_count: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sources", &self.config.sources)
            .field("browser_enabled", &self.config.browser_enabled)
            .field("captcha_solver", &self.config.captcha_api_key.is_some())
            .finish()
    }
}

impl AppState {
    pub async fn new(config: Arc<ScoutConfig>, http_client: reqwest::Client) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&config), &http_client).await;
        let source_count = orchestrator.sources().len();
        Self {
            config,
            search: Arc::new(orchestrator),
            source_count,
        }
    }

    /// Swap the search backend, e.g. for a scripted one in tests.
    pub fn with_search(mut self, search: Arc<dyn ListingSearch>, source_count: usize) -> Self {
        self.search = search;
        self.source_count = source_count;
        self
    }
}
