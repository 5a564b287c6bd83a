use crate::core::types::Source;
use crate::features::antibot::RequestDelay;
use crate::nlp::relevance::{ExclusionRule, RelevanceScorer};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "MARKET_SCOUT_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_CAPTCHA_API_KEY: &str = "CAPTCHA_API_KEY";
pub const ENV_RAPIDAPI_KEY: &str = "RAPIDAPI_KEY";

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    let v = env_str(name)?.to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

// ── Policies ─────────────────────────────────────────────────────────────────

/// What a source reports once every strategy has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Empty list plus an explanatory note.
    #[default]
    Unavailable,
    /// Deterministic demonstration listings, flagged `isPlaceholder`.
    Placeholder,
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unavailable" => Ok(ExhaustionPolicy::Unavailable),
            "placeholder" | "demo" => Ok(ExhaustionPolicy::Placeholder),
            other => Err(format!("unknown exhaustion policy '{}'", other)),
        }
    }
}

/// Retry budget for transient network failures within one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        let (min_backoff, max_backoff) = if min_backoff > max_backoff {
            (max_backoff, min_backoff)
        } else {
            (min_backoff, max_backoff)
        };
        Self {
            max_attempts: max_attempts.max(1),
            min_backoff,
            max_backoff,
        }
    }

    /// Jittered exponential delays for one retry sequence.
    pub fn delays(&self) -> BackoffDelays {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.min_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.25)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        BackoffDelays {
            inner,
            min: self.min_backoff,
            max: self.max_backoff,
        }
    }
}

pub struct BackoffDelays {
    inner: ExponentialBackoff,
    min: Duration,
    max: Duration,
}

impl BackoffDelays {
    /// Next delay, always within `[min_backoff, max_backoff]`.
    pub fn next_delay(&mut self) -> Duration {
        self.inner
            .next_backoff()
            .unwrap_or(self.max)
            .clamp(self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// FileConfig: market-scout.json with env-var fallback for every field
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    /// Sources searched by default. Default: all three.
    pub sources: Option<Vec<Source>>,
    /// Per-source wall-clock limit. Default: 45.
    pub source_deadline_secs: Option<u64>,
    /// Per-source overrides, e.g. `{ "aliexpress": 60 }`.
    #[serde(default)]
    pub source_deadlines: HashMap<Source, u64>,
    pub retry_attempts: Option<u32>,
    pub backoff_min_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    /// Randomized pause between actions and between strategies.
    pub action_delay: Option<RequestDelay>,
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
    pub exhaustion_policy: Option<ExhaustionPolicy>,
    pub browser_enabled: Option<bool>,
    pub chrome_executable: Option<String>,
    pub browser_timeout_secs: Option<u64>,
    /// Image-CAPTCHA service key. Never logged.
    pub captcha_api_key: Option<String>,
    pub captcha_timeout_secs: Option<u64>,
    /// Enables the AliExpress JSON API strategy. Never logged.
    pub rapidapi_key: Option<String>,
    pub batch_concurrency: Option<usize>,
    pub http_timeout_secs: Option<u64>,
    pub http_connect_timeout_secs: Option<u64>,
    /// Replaces the built-in accessory exclusion table when present.
    pub exclusion_rules: Option<Vec<ExclusionRule>>,
}

impl FileConfig {
    /// Sources: JSON → `SCOUT_SOURCES` (comma separated) → all.
    pub fn resolve_sources(&self) -> Vec<Source> {
        if let Some(s) = &self.sources {
            if !s.is_empty() {
                return s.clone();
            }
        }
        env_str("SCOUT_SOURCES")
            .map(|v| {
                v.split(',')
                    .filter_map(|s| match s.parse::<Source>() {
                        Ok(src) => Some(src),
                        Err(e) => {
                            tracing::warn!("SCOUT_SOURCES: {}", e);
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Source::ALL.to_vec())
    }

    /// Deadline: JSON per-source → `SCOUT_SOURCE_DEADLINE_SECS_<SOURCE>` → JSON global
    /// → `SCOUT_SOURCE_DEADLINE_SECS` → 45 s.
    pub fn resolve_deadline(&self, source: Source) -> Duration {
        let per_source_env = format!(
            "SCOUT_SOURCE_DEADLINE_SECS_{}",
            source.as_str().to_ascii_uppercase()
        );
        let secs = self
            .source_deadlines
            .get(&source)
            .copied()
            .or_else(|| env_parse(&per_source_env))
            .or(self.source_deadline_secs)
            .or_else(|| env_parse("SCOUT_SOURCE_DEADLINE_SECS"))
            .unwrap_or(45);
        Duration::from_secs(secs.max(1))
    }

    pub fn resolve_retry(&self) -> RetryPolicy {
        let attempts = self
            .retry_attempts
            .or_else(|| env_parse("SCOUT_RETRY_ATTEMPTS"))
            .unwrap_or(3);
        let min = self
            .backoff_min_ms
            .or_else(|| env_parse("SCOUT_BACKOFF_MIN_MS"))
            .unwrap_or(2000);
        let max = self
            .backoff_max_ms
            .or_else(|| env_parse("SCOUT_BACKOFF_MAX_MS"))
            .unwrap_or(10_000);
        RetryPolicy::new(attempts, Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn resolve_action_delay(&self) -> RequestDelay {
        if let Some(d) = self.action_delay {
            return RequestDelay::new(d.min_ms, d.max_ms);
        }
        RequestDelay::new(
            env_parse("SCOUT_ACTION_DELAY_MIN_MS").unwrap_or(1000),
            env_parse("SCOUT_ACTION_DELAY_MAX_MS").unwrap_or(3000),
        )
    }

    pub fn resolve_max_results(&self) -> usize {
        self.max_results
            .or_else(|| env_parse("SCOUT_MAX_RESULTS"))
            .unwrap_or(10)
    }

    pub fn resolve_min_score(&self) -> f64 {
        self.min_score
            .or_else(|| env_parse("SCOUT_MIN_SCORE"))
            .unwrap_or(0.3)
    }

    pub fn resolve_exhaustion(&self) -> ExhaustionPolicy {
        self.exhaustion_policy
            .or_else(|| env_parse("SCOUT_EXHAUSTION_POLICY"))
            .unwrap_or_default()
    }

    pub fn resolve_browser_enabled(&self) -> bool {
        self.browser_enabled
            .or_else(|| env_flag("SCOUT_BROWSER_ENABLED"))
            .unwrap_or(true)
    }

    /// Explicit browser path. `None` means auto-discovery at attempt time.
    pub fn resolve_chrome_executable(&self) -> Option<String> {
        self.chrome_executable
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| env_str(ENV_CHROME_EXECUTABLE))
    }

    pub fn resolve_browser_timeout(&self) -> Duration {
        Duration::from_secs(
            self.browser_timeout_secs
                .or_else(|| env_parse("SCOUT_BROWSER_TIMEOUT_SECS"))
                .unwrap_or(30),
        )
    }

    pub fn resolve_captcha_api_key(&self) -> Option<String> {
        self.captcha_api_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| env_str(ENV_CAPTCHA_API_KEY))
    }

    pub fn resolve_captcha_timeout(&self) -> Duration {
        Duration::from_secs(
            self.captcha_timeout_secs
                .or_else(|| env_parse("CAPTCHA_TIMEOUT_SECS"))
                .unwrap_or(120),
        )
    }

    pub fn resolve_rapidapi_key(&self) -> Option<String> {
        self.rapidapi_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| env_str(ENV_RAPIDAPI_KEY))
    }

    pub fn resolve_batch_concurrency(&self) -> usize {
        self.batch_concurrency
            .or_else(|| env_parse("SCOUT_BATCH_CONCURRENCY"))
            .unwrap_or(4)
            .max(1)
    }

    pub fn resolve_http_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http_timeout_secs
                .or_else(|| env_parse("HTTP_TIMEOUT_SECS"))
                .unwrap_or(20),
        )
    }

    pub fn resolve_http_connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http_connect_timeout_secs
                .or_else(|| env_parse("HTTP_CONNECT_TIMEOUT_SECS"))
                .unwrap_or(10),
        )
    }

    pub fn resolve_exclusion_rules(&self) -> Vec<ExclusionRule> {
        self.exclusion_rules
            .clone()
            .unwrap_or_else(|| vec![ExclusionRule::phone_accessories()])
            .into_iter()
            .map(ExclusionRule::normalized)
            .collect()
    }
}

/// Load `market-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `MARKET_SCOUT_CONFIG` env var path
/// 2. `./market-scout.json`
/// 3. `../market-scout.json`
///
/// Missing file → defaults (env-var fallbacks still apply).
/// Parse error → log a warning, use defaults.
pub fn load_file_config() -> FileConfig {
    let mut candidates = vec![
        PathBuf::from("market-scout.json"),
        PathBuf::from("../market-scout.json"),
    ];
    if let Some(p) = env_str(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(p));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match serde_json::from_str::<FileConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("market-scout.json loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    "market-scout.json parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                FileConfig::default()
            }
        };
    }
    FileConfig::default()
}

// ── Resolved config ──────────────────────────────────────────────────────────

/// Fully resolved, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub sources: Vec<Source>,
    pub source_deadline: Duration,
    pub source_deadlines: HashMap<Source, Duration>,
    pub retry: RetryPolicy,
    pub action_delay: RequestDelay,
    pub max_results: usize,
    pub min_score: f64,
    pub exhaustion: ExhaustionPolicy,
    pub browser_enabled: bool,
    pub chrome_executable: Option<String>,
    pub browser_timeout: Duration,
    pub captcha_api_key: Option<String>,
    pub captcha_timeout: Duration,
    pub rapidapi_key: Option<String>,
    pub batch_concurrency: usize,
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub exclusion_rules: Vec<ExclusionRule>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            sources: Source::ALL.to_vec(),
            source_deadline: Duration::from_secs(45),
            source_deadlines: HashMap::new(),
            retry: RetryPolicy::default(),
            action_delay: RequestDelay::human(),
            max_results: 10,
            min_score: 0.3,
            exhaustion: ExhaustionPolicy::Unavailable,
            browser_enabled: true,
            chrome_executable: None,
            browser_timeout: Duration::from_secs(30),
            captcha_api_key: None,
            captcha_timeout: Duration::from_secs(120),
            rapidapi_key: None,
            batch_concurrency: 4,
            http_timeout: Duration::from_secs(20),
            http_connect_timeout: Duration::from_secs(10),
            exclusion_rules: vec![ExclusionRule::phone_accessories()],
        }
    }
}

impl ScoutConfig {
    /// File → env → defaults.
    pub fn load() -> Self {
        Self::resolve(&load_file_config())
    }

    pub fn resolve(file: &FileConfig) -> Self {
        let source_deadlines = Source::ALL
            .iter()
            .map(|s| (*s, file.resolve_deadline(*s)))
            .collect();
        Self {
            sources: file.resolve_sources(),
            source_deadline: file
                .source_deadline_secs
                .or_else(|| env_parse("SCOUT_SOURCE_DEADLINE_SECS"))
                .map(|s: u64| Duration::from_secs(s.max(1)))
                .unwrap_or(Duration::from_secs(45)),
            source_deadlines,
            retry: file.resolve_retry(),
            action_delay: file.resolve_action_delay(),
            max_results: file.resolve_max_results(),
            min_score: file.resolve_min_score(),
            exhaustion: file.resolve_exhaustion(),
            browser_enabled: file.resolve_browser_enabled(),
            chrome_executable: file.resolve_chrome_executable(),
            browser_timeout: file.resolve_browser_timeout(),
            captcha_api_key: file.resolve_captcha_api_key(),
            captcha_timeout: file.resolve_captcha_timeout(),
            rapidapi_key: file.resolve_rapidapi_key(),
            batch_concurrency: file.resolve_batch_concurrency(),
            http_timeout: file.resolve_http_timeout(),
            http_connect_timeout: file.resolve_http_connect_timeout(),
            exclusion_rules: file.resolve_exclusion_rules(),
        }
    }

    pub fn deadline_for(&self, source: Source) -> Duration {
        self.source_deadlines
            .get(&source)
            .copied()
            .unwrap_or(self.source_deadline)
    }

    pub fn scorer(&self) -> RelevanceScorer {
        RelevanceScorer::new(self.min_score, self.max_results, self.exclusion_rules.clone())
    }
}
