//! Evasion layer: request identities, randomized pacing and response classification.
//!
//! Everything here is read-only after startup or scoped to a single call, so the
//! same pools are safely shared by every source task.

use aho_corasick::AhoCorasick;
use rand::seq::IndexedRandom;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

// ── Identities ───────────────────────────────────────────────────────────────

/// A coherent client fingerprint: UA, client hints, locale and viewport agree with each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub sec_ch_ua: Option<String>,
    pub sec_ch_ua_platform: Option<String>,
    pub accept_language: String,
    pub locale: String,
    pub timezone: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub mobile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityFlavor {
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Html,
    Json,
}

impl Identity {
    /// Headers matching this identity for a plain HTTP fetch.
    pub fn headers(&self, accept: Accept) -> Vec<(String, String)> {
        let accept_value = match accept {
            Accept::Html => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
            }
            Accept::Json => "application/json, text/plain, */*",
        };
        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("Accept".to_string(), accept_value.to_string()),
            ("Accept-Language".to_string(), self.accept_language.clone()),
            ("DNT".to_string(), "1".to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
        ];
        if let Some(ch) = &self.sec_ch_ua {
            headers.push(("Sec-CH-UA".to_string(), ch.clone()));
            headers.push((
                "Sec-CH-UA-Mobile".to_string(),
                if self.mobile { "?1" } else { "?0" }.to_string(),
            ));
        }
        if let Some(platform) = &self.sec_ch_ua_platform {
            headers.push(("Sec-CH-UA-Platform".to_string(), platform.clone()));
        }
        match accept {
            Accept::Html => {
                headers.push(("Sec-Fetch-Dest".to_string(), "document".to_string()));
                headers.push(("Sec-Fetch-Mode".to_string(), "navigate".to_string()));
                headers.push(("Sec-Fetch-Site".to_string(), "none".to_string()));
            }
            Accept::Json => {
                headers.push(("Sec-Fetch-Dest".to_string(), "empty".to_string()));
                headers.push(("Sec-Fetch-Mode".to_string(), "cors".to_string()));
                headers.push(("Sec-Fetch-Site".to_string(), "same-origin".to_string()));
            }
        }
        headers
    }
}

fn desktop(
    user_agent: &str,
    sec_ch_ua: Option<&str>,
    platform: Option<&str>,
    locale: (&str, &str, &str),
    viewport: (u32, u32),
) -> Identity {
    let (locale, accept_language, timezone) = locale;
    Identity {
        user_agent: user_agent.to_string(),
        sec_ch_ua: sec_ch_ua.map(str::to_string),
        sec_ch_ua_platform: platform.map(str::to_string),
        accept_language: accept_language.to_string(),
        locale: locale.to_string(),
        timezone: timezone.to_string(),
        viewport_width: viewport.0,
        viewport_height: viewport.1,
        mobile: false,
    }
}

fn mobile(user_agent: &str, locale: (&str, &str, &str), viewport: (u32, u32)) -> Identity {
    let (locale, accept_language, timezone) = locale;
    Identity {
        user_agent: user_agent.to_string(),
        sec_ch_ua: None,
        sec_ch_ua_platform: None,
        accept_language: accept_language.to_string(),
        locale: locale.to_string(),
        timezone: timezone.to_string(),
        viewport_width: viewport.0,
        viewport_height: viewport.1,
        mobile: true,
    }
}

const PL: (&str, &str, &str) = ("pl-PL", "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7", "Europe/Warsaw");
const DE: (&str, &str, &str) = ("de-DE", "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7", "Europe/Berlin");
const EN: (&str, &str, &str) = ("en-US", "en-US,en;q=0.9", "Europe/London");

/// Fixed pool of plausible identities, split by device class.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    desktop: Vec<Identity>,
    mobile: Vec<Identity>,
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::builtin()
    }
}

impl IdentityPool {
    pub fn new(desktop: Vec<Identity>, mobile: Vec<Identity>) -> Self {
        Self { desktop, mobile }
    }

    pub fn builtin() -> Self {
        const CHROME_131: &str = r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#;
        const EDGE_131: &str = r#""Chromium";v="131", "Not_A Brand";v="24", "Microsoft Edge";v="131""#;
        let desktop = vec![
            desktop(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
                Some(CHROME_131),
                Some("\"Windows\""),
                PL,
                (1920, 1080),
            ),
            desktop(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
                Some(CHROME_131),
                Some("\"macOS\""),
                DE,
                (1440, 900),
            ),
            desktop(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
                Some(EDGE_131),
                Some("\"Windows\""),
                EN,
                (1536, 864),
            ),
            desktop(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
                Some(CHROME_131),
                Some("\"Linux\""),
                PL,
                (1366, 768),
            ),
            desktop(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
                None,
                None,
                DE,
                (1920, 1080),
            ),
            desktop(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
                None,
                None,
                EN,
                (1680, 1050),
            ),
        ];
        let mobile = vec![
            mobile(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
                PL,
                (390, 844),
            ),
            mobile(
                "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36",
                DE,
                (412, 915),
            ),
            mobile(
                "Mozilla/5.0 (Linux; Android 13; SM-S918B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Mobile Safari/537.36",
                EN,
                (384, 854),
            ),
        ];
        Self { desktop, mobile }
    }

    fn slice(&self, flavor: IdentityFlavor) -> &[Identity] {
        match flavor {
            IdentityFlavor::Desktop => &self.desktop,
            IdentityFlavor::Mobile => &self.mobile,
        }
    }

    /// Starts a per-call rotation. Dropped with the call.
    pub fn rotation(&self) -> IdentityRotation<'_> {
        IdentityRotation {
            pool: self,
            used: HashSet::new(),
        }
    }
}

/// Draws identities for one source call without repeating any until its pool runs dry.
pub struct IdentityRotation<'a> {
    pool: &'a IdentityPool,
    used: HashSet<(IdentityFlavor, usize)>,
}

impl IdentityRotation<'_> {
    pub fn next(&mut self, flavor: IdentityFlavor) -> Identity {
        let all = self.pool.slice(flavor);
        let all = if all.is_empty() {
            // Mobile strategies can still run with a desktop identity.
            self.pool.slice(IdentityFlavor::Desktop)
        } else {
            all
        };
        if all.is_empty() {
            return IdentityPool::builtin().desktop[0].clone();
        }

        let mut free: Vec<usize> = (0..all.len())
            .filter(|i| !self.used.contains(&(flavor, *i)))
            .collect();
        if free.is_empty() {
            self.used.retain(|(f, _)| *f != flavor);
            free = (0..all.len()).collect();
        }

        let mut rng = rand::rng();
        let idx = free.choose(&mut rng).copied().unwrap_or(0);
        self.used.insert((flavor, idx));
        all[idx].clone()
    }
}

// ── Pacing ───────────────────────────────────────────────────────────────────

/// Randomized delay bounds used between actions and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RequestDelay {
    /// Minimum delay in milliseconds
    pub min_ms: u64,
    /// Maximum delay in milliseconds
    pub max_ms: u64,
}

impl Default for RequestDelay {
    fn default() -> Self {
        Self::human()
    }
}

impl RequestDelay {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        if min_ms > max_ms {
            Self {
                min_ms: max_ms,
                max_ms: min_ms,
            }
        } else {
            Self { min_ms, max_ms }
        }
    }

    /// Uniform 1–3 s, the pace of a person reading a results page.
    pub fn human() -> Self {
        Self::new(1000, 3000)
    }

    /// No waiting at all.
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Uniform draw within the bounds.
    pub fn sample(&self) -> Duration {
        use rand::prelude::*;
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }

    pub async fn pause(&self) {
        let d = self.sample();
        if !d.is_zero() {
            debug!("pacing delay {}ms", d.as_millis());
            tokio::time::sleep(d).await;
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    Ok,
    Blocked,
    Captcha,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub class: PageClass,
    pub reason: Option<String>,
}

impl Verdict {
    fn new(class: PageClass, reason: impl Into<String>) -> Self {
        Self {
            class,
            reason: Some(reason.into()),
        }
    }

    fn ok() -> Self {
        Self {
            class: PageClass::Ok,
            reason: None,
        }
    }
}

const CAPTCHA_KEYWORDS: &[&str] = &[
    "captcha",
    "przepisz kod",
    "przekroczyła limit",
    "kod błędu",
    "limit zapytań",
    "potwierdź, że jesteś człowiekiem",
    "zauważyliśmy nietypowe działanie",
    "verify you are human",
    "enter the characters you see below",
    "geben sie die zeichen unten ein",
    "slide to verify",
    "challenges.cloudflare.com",
    "perimeterx",
    "datadome",
];

const BLOCK_KEYWORDS: &[&str] = &[
    "access denied",
    "request blocked",
    "unusual traffic",
    "automated access",
    "you have been blocked",
    "dostęp zablokowany",
];

const CAPTCHA_SELECTORS: &[&str] = &[
    "iframe[src*=\"captcha\"]",
    "div[class*=\"captcha\"]",
    "img[src*=\"captcha\"]",
    ".g-recaptcha",
    "#captcha",
    "form[action*=\"captcha\"]",
    "form[action*=\"validateCaptcha\"]",
];

/// Markers shared by every source.
pub struct ChallengeMarkers {
    captcha_words: AhoCorasick,
    block_words: AhoCorasick,
    captcha_selectors: Vec<Selector>,
}

static MARKERS: OnceLock<Option<ChallengeMarkers>> = OnceLock::new();

impl ChallengeMarkers {
    fn build() -> Option<Self> {
        let captcha_words = AhoCorasick::new(CAPTCHA_KEYWORDS)
            .map_err(|e| warn!("captcha keyword matcher failed to build: {}", e))
            .ok()?;
        let block_words = AhoCorasick::new(BLOCK_KEYWORDS)
            .map_err(|e| warn!("block keyword matcher failed to build: {}", e))
            .ok()?;
        let captcha_selectors = CAPTCHA_SELECTORS
            .iter()
            .filter_map(|css| Selector::parse(css).ok())
            .collect();
        Some(Self {
            captcha_words,
            block_words,
            captcha_selectors,
        })
    }

    pub fn shared() -> Option<&'static ChallengeMarkers> {
        MARKERS.get_or_init(Self::build).as_ref()
    }

    /// Keyword or DOM evidence of a challenge page.
    pub fn captcha_reason(&self, lower_body: &str, doc: &Html) -> Option<String> {
        if let Some(m) = self.captcha_words.find(lower_body) {
            return Some(format!("keyword:{}", CAPTCHA_KEYWORDS[m.pattern().as_usize()]));
        }
        self.captcha_selectors
            .iter()
            .find(|sel| doc.select(sel).next().is_some())
            .map(|_| "captcha_element".to_string())
    }

    pub fn block_reason(&self, lower_body: &str) -> Option<String> {
        self.block_words
            .find(lower_body)
            .map(|m| format!("keyword:{}", BLOCK_KEYWORDS[m.pattern().as_usize()]))
    }

    /// Cheap text-only check used after a challenge interaction.
    pub fn still_challenged(&self, html: &str) -> bool {
        let lower = html.to_lowercase();
        let doc = Html::parse_document(html);
        self.captcha_reason(&lower, &doc).is_some()
    }
}

fn status_verdict(status: u16) -> Option<Verdict> {
    match status {
        401 | 403 => Some(Verdict::new(PageClass::Blocked, format!("http_{}", status))),
        429 => Some(Verdict::new(PageClass::Blocked, "http_429")),
        404 | 410 => Some(Verdict::new(PageClass::Empty, format!("http_{}", status))),
        _ => None,
    }
}

/// Per-source classifier: knows which elements a real results page must contain.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    expected: Vec<Selector>,
}

impl PageClassifier {
    pub fn new(expected_css: &[&str]) -> Self {
        let expected = expected_css
            .iter()
            .filter_map(|css| match Selector::parse(css) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!("ignoring invalid expected-element selector '{}': {:?}", css, e);
                    None
                }
            })
            .collect();
        Self { expected }
    }

    /// Classifies an HTML response. Order: status code, challenge markers, expected elements.
    /// Ambiguous pages come out as `Empty`, never `Blocked`.
    pub fn classify_html(&self, status: u16, body: &str) -> Verdict {
        let lower = body.to_lowercase();
        let doc = Html::parse_document(body);
        let has_expected = self.expected.iter().any(|sel| doc.select(sel).next().is_some());

        if let Some(v) = status_verdict(status) {
            return v;
        }

        if let Some(markers) = ChallengeMarkers::shared() {
            if !has_expected {
                if let Some(reason) = markers.captcha_reason(&lower, &doc) {
                    return Verdict::new(PageClass::Captcha, reason);
                }
                if status == 503 {
                    return Verdict::new(PageClass::Blocked, "http_503");
                }
                if let Some(reason) = markers.block_reason(&lower) {
                    return Verdict::new(PageClass::Blocked, reason);
                }
            }
        }

        if !has_expected {
            return Verdict::new(PageClass::Empty, "no_expected_elements");
        }
        Verdict::ok()
    }

    /// Classifies a JSON API response by status and item presence.
    pub fn classify_json(&self, status: u16, item_count: usize) -> Verdict {
        if let Some(v) = status_verdict(status) {
            return v;
        }
        if item_count == 0 {
            return Verdict::new(PageClass::Empty, "no_items");
        }
        Verdict::ok()
    }
}
