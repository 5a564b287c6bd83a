//! Orchestrator behaviour with scripted strategies: isolation, deadlines,
//! challenge resolution and the exhaustion policy.

use async_trait::async_trait;
use market_scout::antibot::{IdentityPool, PageClass, RequestDelay, Verdict};
use market_scout::captcha::{CaptchaResolver, Resolution};
use market_scout::core::config::{ExhaustionPolicy, RetryPolicy};
use market_scout::scraping::browser_manager::PageHandle;
use market_scout::scraping::strategy::{Attempt, ChallengeSession, FetchRequest, FetchStrategy};
use market_scout::search::adapter::PlaceholderStyle;
use market_scout::search::chain::StrategyChain;
use market_scout::search::SourceAdapter;
use market_scout::{
    AttemptOutcome, Characteristics, FetchError, Listing, Orchestrator, Query, ScoutConfig, Source,
    SourceStatus, StrategyKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

// ── Scripted strategies ──────────────────────────────────────────────────────

enum Script {
    Network,
    Hang,
    Listings(Vec<&'static str>),
    Challenge(Arc<AtomicUsize>),
}

struct Fake {
    kind: StrategyKind,
    script: Script,
    calls: AtomicUsize,
}

impl Fake {
    fn new(kind: StrategyKind, script: Script) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchStrategy for Fake {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn attempt(&self, _req: &FetchRequest<'_>) -> Result<Attempt, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Network => Err(FetchError::Network("connection reset".into())),
            Script::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Script::Listings(titles) => Ok(Attempt::page(
                Verdict {
                    class: PageClass::Ok,
                    reason: None,
                },
                titles
                    .iter()
                    .enumerate()
                    .map(|(i, t)| {
                        let mut l = Listing::new(*t, Source::Allegro);
                        l.product_url = format!("https://allegro.pl/oferta/{}", i);
                        l
                    })
                    .collect(),
            )),
            Script::Challenge(closed) => Ok(Attempt {
                verdict: Verdict {
                    class: PageClass::Captcha,
                    reason: Some("captcha form".into()),
                },
                listings: Vec::new(),
                session: Some(Box::new(FakeChallenge {
                    page: BlankPage,
                    closed: Arc::clone(closed),
                })),
            }),
        }
    }
}

struct BlankPage;

#[async_trait]
impl PageHandle for BlankPage {
    async fn content(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }
    async fn first_present(&self, _selectors: &[&str]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
    async fn mark_by_text(&self, _c: &str, _p: &[&str]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
    async fn hover(&self, _selector: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn click(&self, _selector: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn fill(&self, _selector: &str, _text: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn capture_element(&self, _selector: &str) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
    async fn move_pointer(&self, _x: i32, _y: i32) -> anyhow::Result<()> {
        Ok(())
    }
    async fn scroll_by(&self, _dy: i32) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FakeChallenge {
    page: BlankPage,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ChallengeSession for FakeChallenge {
    fn page(&self) -> &dyn PageHandle {
        &self.page
    }

    async fn reload(&mut self) -> Result<(Verdict, Vec<Listing>), FetchError> {
        Ok((
            Verdict {
                class: PageClass::Ok,
                reason: None,
            },
            vec![Listing::new("Desk lamp LED black", Source::Allegro)],
        ))
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Solves(Resolution);

#[async_trait]
impl CaptchaResolver for Solves {
    async fn resolve(&self, _page: &dyn PageHandle) -> Resolution {
        self.0
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn query(text: &str) -> Query {
    Query::new(text, Characteristics::new()).unwrap()
}

fn config(deadline: Duration) -> Arc<ScoutConfig> {
    Arc::new(ScoutConfig {
        source_deadline: deadline,
        source_deadlines: HashMap::new(),
        ..ScoutConfig::default()
    })
}

fn adapter(
    source: Source,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    resolver: Resolution,
) -> SourceAdapter {
    let chain = StrategyChain::new(
        source,
        strategies,
        Arc::new(Solves(resolver)),
        Arc::new(IdentityPool::builtin()),
    )
    .with_retry(RetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(10),
    ))
    .with_pacing(RequestDelay::none());
    SourceAdapter::new(source, "https://example.test", chain)
}

fn failing(source: Source) -> SourceAdapter {
    adapter(
        source,
        vec![
            Fake::new(StrategyKind::DirectHttp, Script::Network) as Arc<dyn FetchStrategy>,
            Fake::new(StrategyKind::MobileHttp, Script::Network),
        ],
        Resolution::Unsolved,
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_source_reports_even_when_all_fail() {
    init_logger();
    let deadline = Duration::from_secs(5);
    let orch = Orchestrator::with_adapters(
        Source::ALL.iter().map(|s| failing(*s)).collect(),
        config(deadline),
    );

    let started = Instant::now();
    let result = orch.search(&query("desk lamp")).await;

    assert!(started.elapsed() < deadline);
    assert_eq!(result.sources.len(), 3);
    for source in Source::ALL {
        let report = &result.sources[&source];
        assert_eq!(report.status, SourceStatus::Unavailable);
        assert!(report.listings.is_empty());
        let note = report.note.as_deref().unwrap_or_default();
        assert!(note.contains("connection reset"), "note: {}", note);
        // Three tries on each of the two strategies.
        assert_eq!(report.attempts.len(), 6);
        assert!(report
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::NetworkError));
    }
    assert!(!result.has_real_listings());
}

#[tokio::test]
async fn hanging_source_times_out_without_delaying_others() {
    init_logger();
    let deadline = Duration::from_millis(300);
    let hanging = adapter(
        Source::Amazon,
        vec![Fake::new(StrategyKind::DirectHttp, Script::Hang) as Arc<dyn FetchStrategy>],
        Resolution::Unsolved,
    );
    let healthy = adapter(
        Source::Allegro,
        vec![Fake::new(
            StrategyKind::DirectHttp,
            Script::Listings(vec!["Desk lamp LED", "Desk lamp brass"]),
        ) as Arc<dyn FetchStrategy>],
        Resolution::Unsolved,
    );
    let orch = Orchestrator::with_adapters(vec![hanging, healthy], config(deadline));

    let started = Instant::now();
    let result = orch.search(&query("desk lamp")).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= deadline);
    assert!(elapsed < deadline + Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(result.sources[&Source::Amazon].status, SourceStatus::TimedOut);
    let allegro = &result.sources[&Source::Allegro];
    assert_eq!(allegro.status, SourceStatus::Ok);
    assert_eq!(allegro.listings.len(), 2);
    assert_eq!(allegro.strategy, Some(StrategyKind::DirectHttp));
}

#[tokio::test]
async fn solved_challenge_succeeds_on_the_same_strategy() {
    init_logger();
    let closed = Arc::new(AtomicUsize::new(0));
    let browser = Fake::new(
        StrategyKind::HeadlessBrowser,
        Script::Challenge(Arc::clone(&closed)),
    );
    let fallback = Fake::new(StrategyKind::MobileHttp, Script::Listings(vec!["Desk lamp"]));
    let orch = Orchestrator::with_adapters(
        vec![adapter(
            Source::Allegro,
            vec![browser.clone() as Arc<dyn FetchStrategy>, fallback.clone()],
            Resolution::Solved,
        )],
        config(Duration::from_secs(5)),
    );

    let result = orch.search(&query("desk lamp")).await;
    let report = &result.sources[&Source::Allegro];

    assert_eq!(report.status, SourceStatus::Ok);
    assert_eq!(report.strategy, Some(StrategyKind::HeadlessBrowser));
    assert_eq!(report.listings[0].title, "Desk lamp LED black");
    assert_eq!(browser.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    let outcomes: Vec<_> = report.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::CaptchaDetected,
            AttemptOutcome::CaptchaSolved,
            AttemptOutcome::Ok
        ]
    );
}

#[tokio::test]
async fn unsolved_challenge_advances_and_closes_the_page() {
    init_logger();
    let closed = Arc::new(AtomicUsize::new(0));
    let browser = Fake::new(
        StrategyKind::HeadlessBrowser,
        Script::Challenge(Arc::clone(&closed)),
    );
    let fallback = Fake::new(StrategyKind::MobileHttp, Script::Listings(vec!["Desk lamp"]));
    let orch = Orchestrator::with_adapters(
        vec![adapter(
            Source::Allegro,
            vec![browser.clone() as Arc<dyn FetchStrategy>, fallback.clone()],
            Resolution::Unsolved,
        )],
        config(Duration::from_secs(5)),
    );

    let result = orch.search(&query("desk lamp")).await;
    let report = &result.sources[&Source::Allegro];

    assert_eq!(report.strategy, Some(StrategyKind::MobileHttp));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::CaptchaFailed);
}

#[tokio::test]
async fn irrelevant_listings_yield_no_matches() {
    init_logger();
    let orch = Orchestrator::with_adapters(
        vec![adapter(
            Source::Allegro,
            vec![Fake::new(
                StrategyKind::DirectHttp,
                Script::Listings(vec!["Garden hose 20m", "Winter tyres"]),
            ) as Arc<dyn FetchStrategy>],
            Resolution::Unsolved,
        )],
        config(Duration::from_secs(5)),
    );

    let result = orch.search(&query("desk lamp")).await;
    let report = &result.sources[&Source::Allegro];
    assert_eq!(report.status, SourceStatus::NoMatches);
    assert!(report.listings.is_empty());
    assert!(report.note.is_some());
}

#[tokio::test]
async fn placeholder_policy_marks_demo_listings() {
    init_logger();
    let style = PlaceholderStyle {
        search_url: "https://allegro.pl/listing?string={q}".to_string(),
        price_template: "{},00 zł",
    };
    let adapter = failing(Source::Allegro).with_exhaustion(ExhaustionPolicy::Placeholder, style);
    let orch = Orchestrator::with_adapters(vec![adapter], config(Duration::from_secs(5)));

    let result = orch.search(&query("desk lamp")).await;
    let report = &result.sources[&Source::Allegro];

    assert_eq!(report.status, SourceStatus::Unavailable);
    assert_eq!(report.listings.len(), 3);
    assert!(report.listings.iter().all(|l| l.is_placeholder));
    assert!(report.listings.iter().all(|l| l.source_tag == "allegro:demo"));
    assert!(report
        .note
        .as_deref()
        .unwrap_or_default()
        .contains("demonstration"));
    assert!(!result.has_real_listings());
}

/// Never returns, like a solver service that stops answering.
struct StuckResolver;

#[async_trait]
impl CaptchaResolver for StuckResolver {
    async fn resolve(&self, _page: &dyn PageHandle) -> Resolution {
        futures::future::pending::<Resolution>().await
    }
}

#[tokio::test]
async fn stuck_challenge_times_out_and_falls_back() {
    init_logger();
    let closed = Arc::new(AtomicUsize::new(0));
    let browser = Fake::new(
        StrategyKind::HeadlessBrowser,
        Script::Challenge(Arc::clone(&closed)),
    );
    let fallback = Fake::new(StrategyKind::MobileHttp, Script::Listings(vec!["Desk lamp"]));
    let chain = StrategyChain::new(
        Source::Allegro,
        vec![browser.clone() as Arc<dyn FetchStrategy>, fallback.clone()],
        Arc::new(StuckResolver),
        Arc::new(IdentityPool::builtin()),
    )
    .with_pacing(RequestDelay::none())
    .with_challenge_timeout(Duration::from_millis(100));
    let orch = Orchestrator::with_adapters(
        vec![SourceAdapter::new(Source::Allegro, "https://example.test", chain)],
        config(Duration::from_secs(5)),
    );

    let started = Instant::now();
    let result = orch.search(&query("desk lamp")).await;
    let report = &result.sources[&Source::Allegro];

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.status, SourceStatus::Ok);
    assert_eq!(report.strategy, Some(StrategyKind::MobileHttp));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    let outcomes: Vec<_> = report.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::CaptchaDetected,
            AttemptOutcome::TimedOut,
            AttemptOutcome::Ok
        ]
    );
}
