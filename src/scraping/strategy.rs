//! Fetch strategies: one way of obtaining a results page from a source.
//!
//! A strategy performs exactly one attempt per call. Retries, fallback order and
//! challenge handling live in the chain that drives them.

use crate::core::error::FetchError;
use crate::core::types::{Listing, Query, StrategyKind};
use crate::features::antibot::{
    Accept, Identity, IdentityFlavor, PageClass, PageClassifier, RequestDelay, Verdict,
};
use crate::scraping::browser_manager::{find_chrome_executable, BrowserSession, PageHandle};
use crate::scraping::extractor::{Extractor, RawContent};
use crate::scraping::interaction::{dismiss_consent, simulate_presence};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Placeholder replaced by the percent-encoded search phrase in endpoint templates.
pub const PHRASE_SLOT: &str = "{q}";

pub fn render_endpoint(template: &str, phrase: &str) -> String {
    let encoded = utf8_percent_encode(phrase, NON_ALPHANUMERIC).to_string();
    template.replace(PHRASE_SLOT, &encoded)
}

/// Everything one attempt needs. The identity is fresh per attempt.
pub struct FetchRequest<'a> {
    pub query: &'a Query,
    pub phrase: &'a str,
    pub identity: Identity,
}

/// A still-open page sitting on a challenge, handed to the CAPTCHA subsystem.
#[async_trait]
pub trait ChallengeSession: Send {
    fn page(&self) -> &dyn PageHandle;
    /// Re-read and re-classify the page after a challenge interaction.
    async fn reload(&mut self) -> Result<(Verdict, Vec<Listing>), FetchError>;
    async fn close(self: Box<Self>);
}

/// Result of one attempt that produced a response.
pub struct Attempt {
    pub verdict: Verdict,
    /// Extracted listings; only filled for `PageClass::Ok`.
    pub listings: Vec<Listing>,
    /// Present only for browser attempts that hit a challenge.
    pub session: Option<Box<dyn ChallengeSession>>,
}

impl Attempt {
    pub fn page(verdict: Verdict, listings: Vec<Listing>) -> Self {
        Self {
            verdict,
            listings,
            session: None,
        }
    }
}

#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn flavor(&self) -> IdentityFlavor {
        IdentityFlavor::Desktop
    }

    /// Upper bound for a single attempt.
    fn timeout(&self) -> Duration;

    async fn attempt(&self, req: &FetchRequest<'_>) -> Result<Attempt, FetchError>;
}

// ── Plain HTTP ───────────────────────────────────────────────────────────────

/// GET an endpoint template with identity headers. Covers direct, alternate and mobile fetches.
pub struct HttpStrategy {
    kind: StrategyKind,
    client: reqwest::Client,
    template: String,
    flavor: IdentityFlavor,
    accept: Accept,
    headers: Vec<(String, String)>,
    classifier: PageClassifier,
    extractor: Arc<Extractor>,
    timeout: Duration,
}

impl HttpStrategy {
    pub fn new(
        kind: StrategyKind,
        client: reqwest::Client,
        template: impl Into<String>,
        classifier: PageClassifier,
        extractor: Arc<Extractor>,
    ) -> Self {
        Self {
            kind,
            client,
            template: template.into(),
            flavor: IdentityFlavor::Desktop,
            accept: Accept::Html,
            headers: Vec::new(),
            classifier,
            extractor,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn mobile(mut self) -> Self {
        self.flavor = IdentityFlavor::Mobile;
        self
    }

    pub fn json(mut self) -> Self {
        self.accept = Accept::Json;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read_json(&self, status: u16, body: &str, query: &Query) -> Result<Attempt, FetchError> {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(doc) => {
                let verdict = self
                    .classifier
                    .classify_json(status, self.extractor.json_item_count(&doc));
                let listings = if verdict.class == PageClass::Ok {
                    self.extractor.extract(&RawContent::Json(doc), query)
                } else {
                    Vec::new()
                };
                Ok(Attempt::page(verdict, listings))
            }
            Err(e) => {
                // API endpoints answer challenges with HTML.
                let verdict = self.classifier.classify_html(status, body);
                match verdict.class {
                    PageClass::Blocked | PageClass::Captcha => Ok(Attempt::page(verdict, Vec::new())),
                    _ => Err(FetchError::Parse(format!("invalid JSON: {}", e))),
                }
            }
        }
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn flavor(&self) -> IdentityFlavor {
        self.flavor
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, req: &FetchRequest<'_>) -> Result<Attempt, FetchError> {
        let url = render_endpoint(&self.template, req.phrase);
        debug!("{} GET {}", self.kind, url);

        let mut builder = self.client.get(&url);
        for (k, v) in req.identity.headers(self.accept) {
            builder = builder.header(k, v);
        }
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        if resp.status().is_server_error() && status != 503 {
            return Err(FetchError::Network(format!("http_{}", status)));
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(Attempt::page(
                Verdict {
                    class: PageClass::Empty,
                    reason: Some("empty_body".into()),
                },
                Vec::new(),
            ));
        }

        match self.accept {
            Accept::Json => self.read_json(status, &body, req.query),
            Accept::Html => {
                let verdict = self.classifier.classify_html(status, &body);
                let listings = if verdict.class == PageClass::Ok {
                    self.extractor.extract(&RawContent::Html(body), req.query)
                } else {
                    Vec::new()
                };
                Ok(Attempt::page(verdict, listings))
            }
        }
    }
}

// ── Headless browser ─────────────────────────────────────────────────────────

/// Full browser render with human-like interaction. The only strategy that can
/// hand a live challenge page to the CAPTCHA subsystem.
pub struct BrowserStrategy {
    template: String,
    executable: Option<String>,
    classifier: PageClassifier,
    extractor: Arc<Extractor>,
    pacing: RequestDelay,
    timeout: Duration,
}

impl BrowserStrategy {
    pub fn new(template: impl Into<String>, classifier: PageClassifier, extractor: Arc<Extractor>) -> Self {
        Self {
            template: template.into(),
            executable: None,
            classifier,
            extractor,
            pacing: RequestDelay::human(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_executable(mut self, exe: Option<String>) -> Self {
        self.executable = exe;
        self
    }

    pub fn with_pacing(mut self, pacing: RequestDelay) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HeadlessBrowser
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, req: &FetchRequest<'_>) -> Result<Attempt, FetchError> {
        let exe = self
            .executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or_else(|| FetchError::Unsupported("no Chromium-family browser found".into()))?;
        let url = render_endpoint(&self.template, req.phrase);

        let session = BrowserSession::launch(&exe, &req.identity)
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let html: Result<String, FetchError> = async {
            session
                .navigate(&url)
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            simulate_presence(session.page(), &self.pacing).await;
            if let Some(used) = dismiss_consent(session.page()).await {
                debug!("consent handled via {}", used);
                session.settle().await;
            }
            session
                .page()
                .content()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))
        }
        .await;

        let html = match html {
            Ok(h) => h,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let verdict = self.classifier.classify_html(200, &html);
        match verdict.class {
            PageClass::Blocked | PageClass::Captcha => {
                info!(
                    "🧩 browser landed on a challenge ({})",
                    verdict.reason.as_deref().unwrap_or("unknown")
                );
                Ok(Attempt {
                    verdict,
                    listings: Vec::new(),
                    session: Some(Box::new(BrowserChallenge {
                        session,
                        classifier: self.classifier.clone(),
                        extractor: Arc::clone(&self.extractor),
                        query: req.query.clone(),
                    })),
                })
            }
            PageClass::Ok => {
                session.close().await;
                let listings = self.extractor.extract(&RawContent::Html(html), req.query);
                Ok(Attempt::page(verdict, listings))
            }
            PageClass::Empty => {
                session.close().await;
                Ok(Attempt::page(verdict, Vec::new()))
            }
        }
    }
}

struct BrowserChallenge {
    session: BrowserSession,
    classifier: PageClassifier,
    extractor: Arc<Extractor>,
    query: Query,
}

#[async_trait]
impl ChallengeSession for BrowserChallenge {
    fn page(&self) -> &dyn PageHandle {
        self.session.page()
    }

    async fn reload(&mut self) -> Result<(Verdict, Vec<Listing>), FetchError> {
        self.session.settle().await;
        let html = self
            .session
            .page()
            .content()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let verdict = self.classifier.classify_html(200, &html);
        let listings = if verdict.class == PageClass::Ok {
            self.extractor.extract(&RawContent::Html(html), &self.query)
        } else {
            warn!("page still not a results page after challenge");
            Vec::new()
        };
        Ok((verdict, listings))
    }

    async fn close(self: Box<Self>) {
        self.session.close().await;
    }
}
