//! Per-source endpoint tables, selector rules and strategy order.

pub mod aliexpress;
pub mod allegro;
pub mod amazon;

use super::adapter::{PlaceholderStyle, SourceAdapter};
use super::chain::StrategyChain;
use crate::core::config::ScoutConfig;
use crate::core::types::{Source, StrategyKind};
use crate::features::antibot::{IdentityPool, PageClassifier};
use crate::features::captcha::{
    CaptchaResolver, CaptchaSolver, ChallengeResolver, SolverError, TwoCaptchaSolver,
};
use crate::scraping::extractor::Extractor;
use crate::scraping::strategy::{BrowserStrategy, FetchStrategy, HttpStrategy};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared, read-only inputs for building strategies.
pub struct SourceContext<'a> {
    pub client: &'a reqwest::Client,
    pub config: &'a ScoutConfig,
}

impl SourceContext<'_> {
    pub fn http(
        &self,
        kind: StrategyKind,
        template: &str,
        classifier: &PageClassifier,
        extractor: &Arc<Extractor>,
    ) -> HttpStrategy {
        HttpStrategy::new(
            kind,
            self.client.clone(),
            template,
            classifier.clone(),
            Arc::clone(extractor),
        )
        .with_timeout(self.config.http_timeout)
    }

    /// The browser fallback, unless disabled by configuration.
    pub fn browser(
        &self,
        template: &str,
        classifier: &PageClassifier,
        extractor: &Arc<Extractor>,
    ) -> Option<Arc<dyn FetchStrategy>> {
        if !self.config.browser_enabled {
            return None;
        }
        Some(Arc::new(
            BrowserStrategy::new(template, classifier.clone(), Arc::clone(extractor))
                .with_executable(self.config.chrome_executable.clone())
                .with_pacing(self.config.action_delay)
                .with_timeout(self.config.browser_timeout),
        ))
    }
}

/// Everything needed to assemble one source's adapter.
pub struct SourceProfile {
    pub source: Source,
    pub base_url: &'static str,
    pub strategies: Vec<Arc<dyn FetchStrategy>>,
    pub placeholder: PlaceholderStyle,
}

pub fn profile(source: Source, ctx: &SourceContext<'_>) -> anyhow::Result<SourceProfile> {
    match source {
        Source::Allegro => allegro::profile(ctx),
        Source::Amazon => amazon::profile(ctx),
        Source::AliExpress => aliexpress::profile(ctx),
    }
}

/// Challenge resolver backed by the configured image solver, if any.
pub async fn build_resolver(
    config: &ScoutConfig,
    client: &reqwest::Client,
) -> Arc<dyn CaptchaResolver> {
    let solver = match config.captcha_api_key.as_deref() {
        Some(key) => {
            let solver =
                TwoCaptchaSolver::new(client.clone(), key, config.captcha_timeout);
            checked_solver(solver).await
        }
        None => None,
    };
    info!(
        "CAPTCHA image solver: {}",
        if solver.is_some() { "enabled" } else { "disabled" }
    );
    Arc::new(ChallengeResolver::new(solver))
}

/// Keeps the solver unless its service refuses the credential. Transport
/// failures leave it enabled; the service may be back by the first challenge.
pub async fn checked_solver(solver: TwoCaptchaSolver) -> Option<Arc<dyn CaptchaSolver>> {
    match solver.balance().await {
        Ok(balance) => {
            info!("CAPTCHA solver balance: {:.2}", balance);
            Some(Arc::new(solver))
        }
        Err(SolverError::Rejected(reason)) => {
            warn!("CAPTCHA solver credential rejected ({}); image solving disabled", reason);
            None
        }
        Err(e) => {
            warn!("CAPTCHA solver balance check failed: {}", e);
            Some(Arc::new(solver))
        }
    }
}

pub fn build_adapter(
    profile: SourceProfile,
    config: &ScoutConfig,
    resolver: Arc<dyn CaptchaResolver>,
    identities: Arc<IdentityPool>,
) -> SourceAdapter {
    let chain = StrategyChain::new(profile.source, profile.strategies, resolver, identities)
        .with_retry(config.retry)
        .with_pacing(config.action_delay)
        .with_challenge_timeout(config.captcha_timeout + config.browser_timeout);
    info!("{} chain: {:?}", profile.source, chain.kinds());
    SourceAdapter::new(profile.source, profile.base_url, chain)
        .with_scorer(config.scorer())
        .with_exhaustion(config.exhaustion, profile.placeholder)
}

/// Adapters for every configured source. A source whose profile cannot be
/// built is skipped with a warning.
pub async fn build_adapters(config: &ScoutConfig, client: &reqwest::Client) -> Vec<SourceAdapter> {
    let ctx = SourceContext { client, config };
    let resolver = build_resolver(config, client).await;
    let identities = Arc::new(IdentityPool::builtin());

    config
        .sources
        .iter()
        .filter_map(|s| match profile(*s, &ctx) {
            Ok(p) => Some(build_adapter(
                p,
                config,
                Arc::clone(&resolver),
                Arc::clone(&identities),
            )),
            Err(e) => {
                warn!("{}: source disabled: {}", s, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order_follows_cost() {
        let client = reqwest::Client::new();
        let config = ScoutConfig::default();
        let ctx = SourceContext {
            client: &client,
            config: &config,
        };
        let p = profile(Source::Allegro, &ctx).unwrap();
        let kinds: Vec<_> = p.strategies.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::DirectHttp,
                StrategyKind::AlternateEndpoint,
                StrategyKind::MobileHttp,
                StrategyKind::HeadlessBrowser
            ]
        );
    }

    #[test]
    fn aliexpress_api_only_with_key_and_browser_can_be_disabled() {
        let client = reqwest::Client::new();
        let mut config = ScoutConfig {
            browser_enabled: false,
            ..ScoutConfig::default()
        };
        let kinds = |config: &ScoutConfig| {
            let ctx = SourceContext {
                client: &client,
                config,
            };
            profile(Source::AliExpress, &ctx)
                .unwrap()
                .strategies
                .iter()
                .map(|s| s.kind())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            kinds(&config),
            vec![StrategyKind::DirectHttp, StrategyKind::MobileHttp]
        );
        config.rapidapi_key = Some("k".into());
        assert_eq!(kinds(&config)[0], StrategyKind::AlternateEndpoint);
    }
}
