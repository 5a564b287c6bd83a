//! CAPTCHA resolution: one-click confirmation first, paid image solving second.
//!
//! The resolver never retries on its own. A missing image, input or submit control
//! fails the whole resolution and the strategy chain decides what happens next.

use crate::features::antibot::ChallengeMarkers;
use crate::scraping::browser_manager::PageHandle;
use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Solved,
    Unsolved,
}

/// Resolves a challenge on a live page. Side effects stay within that page.
#[async_trait]
pub trait CaptchaResolver: Send + Sync {
    async fn resolve(&self, page: &dyn PageHandle) -> Resolution;
}

// ── External solver ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no solver credential configured")]
    MissingCredential,
    #[error("solver rejected the request: {0}")]
    Rejected(String),
    #[error("solver did not answer within {0:?}")]
    Timeout(Duration),
    #[error("solver transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Turns a challenge image into text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve_image(&self, png: &[u8]) -> Result<String, SolverError>;
}

/// Client for the 2captcha-compatible `in.php` / `res.php` protocol.
pub struct TwoCaptchaSolver {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: "http://2captcha.com".to_string(),
            poll_interval: Duration::from_secs(5),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Account balance; doubles as a credential check.
    pub async fn balance(&self) -> Result<f64, SolverError> {
        let text = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("action", "getbalance")])
            .send()
            .await?
            .text()
            .await?;
        parse_balance(&text)
    }

    async fn submit(&self, png: &[u8]) -> Result<String, SolverError> {
        let body = base64::engine::general_purpose::STANDARD.encode(png);
        let text = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.as_str()),
                ("method", "base64"),
                ("body", body.as_str()),
            ])
            .send()
            .await?
            .text()
            .await?;
        parse_submit(&text)
    }

    async fn poll(&self, id: &str) -> Result<String, SolverError> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let text = self
                .client
                .get(format!("{}/res.php", self.base_url))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", id),
                ])
                .send()
                .await?
                .text()
                .await?;
            if let Some(answer) = parse_poll(&text)? {
                return Ok(answer);
            }
        }
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve_image(&self, png: &[u8]) -> Result<String, SolverError> {
        if self.api_key.trim().is_empty() {
            return Err(SolverError::MissingCredential);
        }
        let work = async {
            let id = self.submit(png).await?;
            info!("📤 challenge image submitted to solver (task {})", id);
            self.poll(&id).await
        };
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| SolverError::Timeout(self.timeout))?
    }
}

fn parse_submit(text: &str) -> Result<String, SolverError> {
    let text = text.trim();
    match text.strip_prefix("OK|") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(SolverError::Rejected(text.to_string())),
    }
}

/// `Ok(None)` while the task is still pending.
fn parse_poll(text: &str) -> Result<Option<String>, SolverError> {
    let text = text.trim();
    if text == "CAPCHA_NOT_READY" {
        return Ok(None);
    }
    match text.strip_prefix("OK|") {
        Some(answer) if !answer.is_empty() => Ok(Some(answer.to_string())),
        _ => Err(SolverError::Rejected(text.to_string())),
    }
}

fn parse_balance(text: &str) -> Result<f64, SolverError> {
    let text = text.trim();
    if text.starts_with("ERROR_") {
        return Err(SolverError::Rejected(text.to_string()));
    }
    text.parse::<f64>()
        .map_err(|_| SolverError::Rejected(format!("unexpected balance reply: {}", text)))
}

// ── Resolver ─────────────────────────────────────────────────────────────────

pub const CONFIRM_PHRASES: &[&str] = &["potwierdzam", "potwierdź", "confirm", "i am human", "bestätigen"];

const CONFIRM_CANDIDATES: &str =
    "button, input[type=\"submit\"], input[type=\"button\"], [role=\"button\"], a";

pub const IMAGE_SELECTORS: &[&str] = &[
    "img[src*=\"captcha\"]",
    "img[alt*=\"captcha\"]",
    "img[class*=\"captcha\"]",
    "div[class*=\"captcha\"] img",
    "form[action*=\"Captcha\"] img",
];

pub const INPUT_SELECTORS: &[&str] = &[
    "input[name*=\"captcha\"]",
    "input[id*=\"captcha\"]",
    "input[placeholder*=\"kod\"]",
    "input#captchacharacters",
    "textarea[name*=\"captcha\"]",
];

pub const SUBMIT_SELECTORS: &[&str] = &["input[type=\"submit\"]", "button[type=\"submit\"]"];

/// Default resolver: confirmation button, then optional image solver.
pub struct ChallengeResolver {
    solver: Option<Arc<dyn CaptchaSolver>>,
    hover_pause: Duration,
    settle: Duration,
}

impl ChallengeResolver {
    pub fn new(solver: Option<Arc<dyn CaptchaSolver>>) -> Self {
        Self {
            solver,
            hover_pause: Duration::from_millis(500),
            settle: Duration::from_secs(2),
        }
    }

    /// Shorter pauses, for tests.
    pub fn with_pauses(mut self, hover_pause: Duration, settle: Duration) -> Self {
        self.hover_pause = hover_pause;
        self.settle = settle;
        self
    }

    async fn try_confirm(&self, page: &dyn PageHandle) -> Option<Resolution> {
        let target = match page.mark_by_text(CONFIRM_CANDIDATES, CONFIRM_PHRASES).await {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                warn!("confirmation probe failed: {}", e);
                return None;
            }
        };

        info!("🖱️ one-click confirmation found, pressing it");
        page.hover(&target).await.ok();
        tokio::time::sleep(self.hover_pause).await;
        if !page.click(&target).await.unwrap_or(false) {
            return Some(Resolution::Unsolved);
        }
        tokio::time::sleep(self.settle).await;

        let html = page.content().await.unwrap_or_default();
        let cleared = ChallengeMarkers::shared()
            .map(|m| !m.still_challenged(&html))
            .unwrap_or(true);
        Some(if cleared {
            Resolution::Solved
        } else {
            Resolution::Unsolved
        })
    }

    async fn try_image(&self, page: &dyn PageHandle, solver: &dyn CaptchaSolver) -> Resolution {
        let Ok(Some(image)) = page.first_present(IMAGE_SELECTORS).await else {
            warn!("challenge image not found");
            return Resolution::Unsolved;
        };
        let png = match page.capture_element(&image).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Resolution::Unsolved,
            Err(e) => {
                warn!("challenge image capture failed: {}", e);
                return Resolution::Unsolved;
            }
        };
        let Ok(Some(input)) = page.first_present(INPUT_SELECTORS).await else {
            warn!("challenge input not found");
            return Resolution::Unsolved;
        };
        let Ok(Some(submit)) = page.first_present(SUBMIT_SELECTORS).await else {
            warn!("challenge submit control not found");
            return Resolution::Unsolved;
        };

        let answer = match solver.solve_image(&png).await {
            Ok(a) => a,
            Err(e) => {
                warn!("solver failed: {}", e);
                return Resolution::Unsolved;
            }
        };

        if !page.fill(&input, &answer).await.unwrap_or(false) {
            return Resolution::Unsolved;
        }
        if !page.click(&submit).await.unwrap_or(false) {
            return Resolution::Unsolved;
        }
        tokio::time::sleep(self.settle).await;
        info!("✅ challenge answer submitted");
        Resolution::Solved
    }
}

#[async_trait]
impl CaptchaResolver for ChallengeResolver {
    async fn resolve(&self, page: &dyn PageHandle) -> Resolution {
        if let Some(r) = self.try_confirm(page).await {
            return r;
        }
        match &self.solver {
            Some(solver) => self.try_image(page, solver.as_ref()).await,
            None => {
                info!("no solver configured; challenge left unsolved");
                Resolution::Unsolved
            }
        }
    }
}
