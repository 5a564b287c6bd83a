use super::chain::{ChainOutcome, StrategyChain};
use crate::core::config::ExhaustionPolicy;
use crate::core::types::{Listing, Query, Source, SourceReport, SourceStatus};
use crate::nlp::query_builder::search_phrase;
use crate::nlp::relevance::{tokenize, RelevanceScorer};
use crate::scraping::strategy::render_endpoint;
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;

/// How demonstration listings look for one source.
#[derive(Debug, Clone)]
pub struct PlaceholderStyle {
    /// Search page template with a `{q}` slot, used as the demo product URL.
    pub search_url: String,
    /// Price template with a `{}` slot.
    pub price_template: &'static str,
}

/// One source: its strategy chain plus ranking and exhaustion handling.
pub struct SourceAdapter {
    source: Source,
    base_url: String,
    chain: StrategyChain,
    scorer: RelevanceScorer,
    exhaustion: ExhaustionPolicy,
    placeholder: Option<PlaceholderStyle>,
}

impl SourceAdapter {
    pub fn new(source: Source, base_url: impl Into<String>, chain: StrategyChain) -> Self {
        Self {
            source,
            base_url: base_url.into(),
            chain,
            scorer: RelevanceScorer::default(),
            exhaustion: ExhaustionPolicy::Unavailable,
            placeholder: None,
        }
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_exhaustion(mut self, policy: ExhaustionPolicy, style: PlaceholderStyle) -> Self {
        self.exhaustion = policy;
        self.placeholder = Some(style);
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub async fn search(&self, query: &Query) -> SourceReport {
        let started = Instant::now();
        let phrase = search_phrase(query);
        let report = self.chain.run(query, &phrase).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match report.outcome {
            ChainOutcome::Fetched { strategy, listings } => {
                let fetched = listings.len();
                let ranked = self.scorer.rank(self.dedupe(listings), query);
                let (status, note) = if ranked.is_empty() {
                    (
                        SourceStatus::NoMatches,
                        Some(format!(
                            "{} listings fetched, none passed the relevance filter",
                            fetched
                        )),
                    )
                } else {
                    (SourceStatus::Ok, None)
                };
                info!(
                    "{}: {} of {} listings kept ({}ms)",
                    self.source,
                    ranked.len(),
                    fetched,
                    duration_ms
                );
                SourceReport {
                    status,
                    listings: ranked,
                    note,
                    strategy: Some(strategy),
                    attempts: report.attempts,
                    duration_ms,
                }
            }
            ChainOutcome::Exhausted { last_error } => {
                let cause = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no strategies configured".to_string());
                let mut note = format!("all strategies exhausted; last error: {}", cause);
                let listings = match (self.exhaustion, &self.placeholder) {
                    (ExhaustionPolicy::Placeholder, Some(style)) => {
                        note.push_str("; showing demonstration data, not real offers");
                        placeholders(self.source, query, style)
                    }
                    _ => Vec::new(),
                };
                SourceReport {
                    status: SourceStatus::Unavailable,
                    listings,
                    note: Some(note),
                    strategy: None,
                    attempts: report.attempts,
                    duration_ms,
                }
            }
        }
    }

    /// Drops repeats by product URL, or by normalized title when the URL is
    /// only the source origin. First occurrence wins.
    fn dedupe(&self, listings: Vec<Listing>) -> Vec<Listing> {
        let base = self.base_url.trim_end_matches('/');
        let mut seen = HashSet::new();
        listings
            .into_iter()
            .filter(|l| {
                let url = l.product_url.trim_end_matches('/');
                let key = if url.is_empty() || url == base {
                    format!("title:{}", tokenize(&l.title).join(" "))
                } else {
                    format!("url:{}", url)
                };
                seen.insert(key)
            })
            .collect()
    }
}

/// Deterministic demonstration listings. Always flagged and tagged `<source>:demo`.
pub fn placeholders(source: Source, query: &Query, style: &PlaceholderStyle) -> Vec<Listing> {
    let url = render_endpoint(&style.search_url, query.text());
    [(1, 149), (2, 299), (3, 599)]
        .into_iter()
        .map(|(i, price)| {
            let mut l = Listing::new(format!("{} (demonstration {})", query.text(), i), source);
            l.price = style.price_template.replace("{}", &price.to_string());
            l.product_url = url.clone();
            l.description = Some("Demonstration data, not a real offer".to_string());
            l.source_tag = format!("{}:demo", source.as_str());
            l.is_placeholder = true;
            l
        })
        .collect()
}
