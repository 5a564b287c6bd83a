//! Ordered strategy fallback for one source.
//!
//! `Init → TryStrategy(i) → {Success, Retry, NextStrategy, Exhausted}`. Every
//! attempt is recorded; retry counters and identities live only for one run.

use crate::core::config::RetryPolicy;
use crate::core::error::FetchError;
use crate::core::types::{AttemptOutcome, FetchAttempt, Listing, Query, Source, StrategyKind};
use crate::features::antibot::{IdentityPool, PageClass, RequestDelay, Verdict};
use crate::features::captcha::{CaptchaResolver, Resolution};
use crate::scraping::strategy::{Attempt, ChallengeSession, FetchRequest, FetchStrategy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum ChainOutcome {
    /// A strategy produced at least one listing.
    Fetched {
        strategy: StrategyKind,
        listings: Vec<Listing>,
    },
    /// Every strategy was tried without success.
    Exhausted { last_error: Option<FetchError> },
}

#[derive(Debug)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub attempts: Vec<FetchAttempt>,
}

/// What one strategy turn resolved to.
enum Step {
    Success(Vec<Listing>),
    Advance(FetchError),
}

fn outcome_of(err: &FetchError) -> AttemptOutcome {
    match err {
        FetchError::Network(_) | FetchError::Unsupported(_) => AttemptOutcome::NetworkError,
        FetchError::Blocked { .. } => AttemptOutcome::Blocked,
        FetchError::Captcha(_) => AttemptOutcome::CaptchaFailed,
        FetchError::Parse(_) => AttemptOutcome::Empty,
        FetchError::Timeout(_) => AttemptOutcome::TimedOut,
    }
}

fn reason(v: &Verdict) -> String {
    v.reason.clone().unwrap_or_else(|| "unspecified".to_string())
}

pub struct StrategyChain {
    source: Source,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    resolver: Arc<dyn CaptchaResolver>,
    identities: Arc<IdentityPool>,
    retry: RetryPolicy,
    pacing: RequestDelay,
    challenge_timeout: Duration,
}

impl StrategyChain {
    pub fn new(
        source: Source,
        strategies: Vec<Arc<dyn FetchStrategy>>,
        resolver: Arc<dyn CaptchaResolver>,
        identities: Arc<IdentityPool>,
    ) -> Self {
        Self {
            source,
            strategies,
            resolver,
            identities,
            retry: RetryPolicy::default(),
            pacing: RequestDelay::human(),
            challenge_timeout: Duration::from_secs(150),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacing(mut self, pacing: RequestDelay) -> Self {
        self.pacing = pacing;
        self
    }

    /// Upper bound on resolving a challenge and re-reading the page.
    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub async fn run(&self, query: &Query, phrase: &str) -> ChainReport {
        let mut attempts = Vec::new();
        let mut rotation = self.identities.rotation();
        let mut last_error = None;

        for (i, strategy) in self.strategies.iter().enumerate() {
            if i > 0 {
                self.pacing.pause().await;
            }
            let kind = strategy.kind();
            let mut delays = self.retry.delays();
            let mut tries = 0u32;

            let step = loop {
                tries += 1;
                let req = FetchRequest {
                    query,
                    phrase,
                    identity: rotation.next(strategy.flavor()),
                };
                debug!("{} → {} (try {})", self.source, kind, tries);

                match tokio::time::timeout(strategy.timeout(), strategy.attempt(&req)).await {
                    Err(_) => {
                        let e = FetchError::Timeout(format!(
                            "{} exceeded {}s",
                            kind,
                            strategy.timeout().as_secs()
                        ));
                        attempts.push(FetchAttempt::now(kind, AttemptOutcome::TimedOut, Some(e.to_string())));
                        break Step::Advance(e);
                    }
                    Ok(Err(e)) if e.is_retryable() && tries < self.retry.max_attempts => {
                        let wait = delays.next_delay();
                        warn!(
                            "{} {} network error (try {}/{}), retrying in {}ms: {}",
                            self.source,
                            kind,
                            tries,
                            self.retry.max_attempts,
                            wait.as_millis(),
                            e
                        );
                        attempts.push(FetchAttempt::now(kind, AttemptOutcome::NetworkError, Some(e.to_string())));
                        tokio::time::sleep(wait).await;
                    }
                    Ok(Err(e)) => {
                        attempts.push(FetchAttempt::now(kind, outcome_of(&e), Some(e.to_string())));
                        break Step::Advance(e);
                    }
                    Ok(Ok(attempt)) => break self.settle(kind, attempt, &mut attempts).await,
                }
            };

            match step {
                Step::Success(listings) => {
                    info!(
                        "✅ {} via {}: {} listings ({} attempts)",
                        self.source,
                        kind,
                        listings.len(),
                        attempts.len()
                    );
                    return ChainReport {
                        outcome: ChainOutcome::Fetched {
                            strategy: kind,
                            listings,
                        },
                        attempts,
                    };
                }
                Step::Advance(e) => {
                    info!("{} {} gave up: {}", self.source, kind, e);
                    last_error = Some(e);
                }
            }
        }

        warn!(
            "⛔ {}: all {} strategies exhausted",
            self.source,
            self.strategies.len()
        );
        ChainReport {
            outcome: ChainOutcome::Exhausted { last_error },
            attempts,
        }
    }

    /// Turns a classified response into the chain's next move. Any challenge
    /// session is closed before returning.
    async fn settle(
        &self,
        kind: StrategyKind,
        attempt: Attempt,
        log: &mut Vec<FetchAttempt>,
    ) -> Step {
        let Attempt {
            verdict,
            listings,
            session,
        } = attempt;

        match verdict.class {
            PageClass::Ok if !listings.is_empty() => {
                log.push(FetchAttempt::now(kind, AttemptOutcome::Ok, None));
                if let Some(s) = session {
                    s.close().await;
                }
                Step::Success(listings)
            }
            PageClass::Ok | PageClass::Empty => {
                if let Some(s) = session {
                    s.close().await;
                }
                let detail = if verdict.class == PageClass::Ok {
                    "no listings extracted".to_string()
                } else {
                    reason(&verdict)
                };
                log.push(FetchAttempt::now(kind, AttemptOutcome::Empty, Some(detail.clone())));
                Step::Advance(FetchError::Parse(detail))
            }
            PageClass::Blocked | PageClass::Captcha => {
                let outcome = if verdict.class == PageClass::Captcha {
                    AttemptOutcome::CaptchaDetected
                } else {
                    AttemptOutcome::Blocked
                };
                log.push(FetchAttempt::now(kind, outcome, Some(reason(&verdict))));

                match session {
                    Some(mut s) => {
                        let step = self.resolve_challenge(kind, s.as_mut(), log).await;
                        s.close().await;
                        step
                    }
                    None if verdict.class == PageClass::Captcha => {
                        Step::Advance(FetchError::Captcha(reason(&verdict)))
                    }
                    None => Step::Advance(FetchError::Blocked {
                        reason: reason(&verdict),
                    }),
                }
            }
        }
    }

    /// One resolution, then one re-read of the same page, both within the
    /// challenge deadline.
    async fn resolve_challenge(
        &self,
        kind: StrategyKind,
        session: &mut dyn ChallengeSession,
        log: &mut Vec<FetchAttempt>,
    ) -> Step {
        let resolved = tokio::time::timeout(
            self.challenge_timeout,
            self.resolve_and_reload(kind, session, log),
        )
        .await;

        match resolved {
            Ok(step) => step,
            Err(_) => {
                let e = FetchError::Timeout(format!(
                    "{} challenge exceeded {}s",
                    kind,
                    self.challenge_timeout.as_secs()
                ));
                warn!("⏱️ {} {}", self.source, e);
                log.push(FetchAttempt::now(kind, AttemptOutcome::TimedOut, Some(e.to_string())));
                Step::Advance(e)
            }
        }
    }

    async fn resolve_and_reload(
        &self,
        kind: StrategyKind,
        session: &mut dyn ChallengeSession,
        log: &mut Vec<FetchAttempt>,
    ) -> Step {
        if self.resolver.resolve(session.page()).await == Resolution::Unsolved {
            log.push(FetchAttempt::now(kind, AttemptOutcome::CaptchaFailed, None));
            return Step::Advance(FetchError::Captcha("challenge not resolved".into()));
        }
        log.push(FetchAttempt::now(kind, AttemptOutcome::CaptchaSolved, None));
        info!("🔓 {} challenge resolved, re-reading page", self.source);

        match session.reload().await {
            Ok((v, listings)) if v.class == PageClass::Ok && !listings.is_empty() => {
                log.push(FetchAttempt::now(kind, AttemptOutcome::Ok, Some("after challenge".into())));
                Step::Success(listings)
            }
            Ok((v, _)) => {
                let outcome = match v.class {
                    PageClass::Captcha => AttemptOutcome::CaptchaFailed,
                    PageClass::Blocked => AttemptOutcome::Blocked,
                    _ => AttemptOutcome::Empty,
                };
                log.push(FetchAttempt::now(kind, outcome, Some(reason(&v))));
                Step::Advance(FetchError::Captcha(format!(
                    "page unusable after challenge: {}",
                    reason(&v)
                )))
            }
            Err(e) => {
                log.push(FetchAttempt::now(kind, outcome_of(&e), Some(e.to_string())));
                Step::Advance(e)
            }
        }
    }
}
