use crate::core::types::{CharacteristicKey, Listing, Query};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Title similarity weight.
pub const TITLE_WEIGHT: f64 = 0.4;
/// Description similarity weight, only when a description exists.
pub const DESCRIPTION_WEIGHT: f64 = 0.2;
/// Bonus per fully matched characteristic; half of it for a token-overlap match.
pub const CHARACTERISTIC_STEP: f64 = 0.1;
/// Ceiling for the summed characteristic bonus.
pub const CHARACTERISTIC_CAP: f64 = 0.4;
/// Added when the whole query appears as a contiguous phrase in the title.
/// Larger than every other component combined.
pub const EXACT_PHRASE_BONUS: f64 = 1.0;

/// Lowercase alphanumeric tokens. Single characters are kept: "iphone x" and
/// "iphone 13" must stay distinct queries.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn token_matches(query_token: &str, text_token: &str) -> bool {
    if query_token == text_token {
        return true;
    }
    let (short, long) = if query_token.len() <= text_token.len() {
        (query_token, text_token)
    } else {
        (text_token, query_token)
    };
    short.chars().count() >= 4 && long.starts_with(short)
}

/// Share of query tokens found in `text_tokens`, in [0, 1].
fn similarity(query_tokens: &[String], text_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let hits = query_tokens
        .iter()
        .filter(|q| text_tokens.iter().any(|t| token_matches(q, t)))
        .count();
    hits as f64 / query_tokens.len() as f64
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

// ── Exclusion rules ──────────────────────────────────────────────────────────

/// Data-driven "this is an accessory, not the product" filter for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub name: String,
    /// Query tokens that place a search in this category.
    pub query_tokens: Vec<String>,
    /// `category` / `type` characteristic values that place a search in this category.
    #[serde(default)]
    pub category_values: Vec<String>,
    /// Title tokens that mark a listing as an accessory.
    pub excluded_tokens: Vec<String>,
}

impl ExclusionRule {
    pub fn phone_accessories() -> Self {
        let s = |v: &[&str]| v.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        Self {
            name: "phone_accessories".to_string(),
            query_tokens: s(&[
                "iphone", "smartphone", "smartfon", "telefon", "phone", "handy", "galaxy", "pixel",
                "xiaomi", "redmi", "huawei", "motorola", "oneplus",
            ]),
            category_values: s(&[
                "phone", "phones", "smartphone", "smartphones", "smartfon", "smartfony", "telefon",
                "telefony", "handy",
            ]),
            excluded_tokens: s(&[
                "case", "cover", "bumper", "skin", "etui", "pokrowiec", "obudowa", "hülle",
                "schutzhülle", "charger", "ładowarka", "ladowarka", "ladegerät", "cable", "kabel",
                "ladekabel", "adapter", "holder", "uchwyt", "mount", "stand", "glass", "szkło",
                "szklo", "panzerglas", "protector", "folia", "strap",
            ]),
        }
    }

    /// Lowercases and re-tokenizes every entry so hand-written rules match
    /// tokenized text. Multi-word entries become space-joined phrases. Entries
    /// with no alphanumeric content are dropped with a warning.
    pub fn normalized(self) -> Self {
        let name = self.name;
        let clean = |field: &str, entries: Vec<String>| -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for entry in entries {
                let tokens = tokenize(&entry);
                if tokens.is_empty() {
                    warn!("exclusion rule '{}': ignoring empty {} entry {:?}", name, field, entry);
                    continue;
                }
                let phrase = tokens.join(" ");
                if !out.contains(&phrase) {
                    out.push(phrase);
                }
            }
            out
        };
        let query_tokens = clean("query_tokens", self.query_tokens);
        let category_values = clean("category_values", self.category_values);
        let excluded_tokens = clean("excluded_tokens", self.excluded_tokens);
        if excluded_tokens.is_empty() {
            warn!("exclusion rule '{}' has no excluded tokens and never fires", name);
        }
        Self {
            name,
            query_tokens,
            category_values,
            excluded_tokens,
        }
    }

    fn applies(&self, query_tokens: &[String], query: &Query) -> bool {
        if self
            .query_tokens
            .iter()
            .any(|entry| contains_phrase(query_tokens, &phrase_tokens(entry)))
        {
            return true;
        }
        [CharacteristicKey::Category, CharacteristicKey::Type]
            .into_iter()
            .filter_map(|k| query.characteristics().get(k))
            .map(tokenize)
            .any(|value| {
                self.category_values
                    .iter()
                    .any(|entry| contains_phrase(&value, &phrase_tokens(entry)))
            })
    }

    /// Accessory phrases in the title that the query itself did not ask for.
    fn excludes(&self, title_tokens: &[String], query_tokens: &[String]) -> bool {
        self.excluded_tokens.iter().any(|entry| {
            let phrase = phrase_tokens(entry);
            contains_phrase(title_tokens, &phrase) && !contains_phrase(query_tokens, &phrase)
        })
    }
}

fn phrase_tokens(entry: &str) -> Vec<String> {
    entry.split_whitespace().map(str::to_string).collect()
}

// ── Scorer ───────────────────────────────────────────────────────────────────

/// Deterministic relevance scoring and ranking. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    min_score: f64,
    max_results: usize,
    rules: Vec<ExclusionRule>,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(0.3, 10, vec![ExclusionRule::phone_accessories()])
    }
}

impl RelevanceScorer {
    pub fn new(min_score: f64, max_results: usize, rules: Vec<ExclusionRule>) -> Self {
        Self {
            min_score,
            max_results,
            rules: rules.into_iter().map(ExclusionRule::normalized).collect(),
        }
    }

    /// Name of the exclusion rule that rejects this listing, if any.
    pub fn excluded_by(&self, listing: &Listing, query: &Query) -> Option<&str> {
        let query_tokens = tokenize(query.text());
        let title_tokens = tokenize(&listing.title);
        self.rules
            .iter()
            .find(|r| r.applies(&query_tokens, query) && r.excludes(&title_tokens, &query_tokens))
            .map(|r| r.name.as_str())
    }

    /// Score in `[0, ~2.0]`. Excluded listings score exactly zero.
    pub fn score(&self, listing: &Listing, query: &Query) -> f64 {
        if self.excluded_by(listing, query).is_some() {
            return 0.0;
        }

        let query_tokens = tokenize(query.text());
        let title_tokens = tokenize(&listing.title);
        let desc_tokens = listing
            .description
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();

        let mut score = TITLE_WEIGHT * similarity(&query_tokens, &title_tokens);
        if listing.description.is_some() {
            score += DESCRIPTION_WEIGHT * similarity(&query_tokens, &desc_tokens);
        }

        let mut matched = 0.0;
        for (_, value) in query.characteristics().iter() {
            let value_tokens = tokenize(value);
            if value_tokens.is_empty() {
                continue;
            }
            if contains_phrase(&title_tokens, &value_tokens)
                || contains_phrase(&desc_tokens, &value_tokens)
            {
                matched += 1.0;
            } else if value_tokens
                .iter()
                .any(|v| title_tokens.contains(v) || desc_tokens.contains(v))
            {
                matched += 0.5;
            }
        }
        score += (CHARACTERISTIC_STEP * matched).min(CHARACTERISTIC_CAP);

        if contains_phrase(&title_tokens, &query_tokens) {
            score += EXACT_PHRASE_BONUS;
        }
        score
    }

    /// Scores, filters and orders listings. Ties keep extraction order.
    pub fn rank(&self, listings: Vec<Listing>, query: &Query) -> Vec<Listing> {
        let before = listings.len();
        let mut kept: Vec<Listing> = listings
            .into_iter()
            .filter_map(|mut l| {
                if let Some(rule) = self.excluded_by(&l, query) {
                    debug!("excluded by {}: {}", rule, l.title);
                    return None;
                }
                l.relevance_score = self.score(&l, query);
                (l.relevance_score >= self.min_score).then_some(l)
            })
            .collect();

        kept.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });
        kept.truncate(self.max_results);

        info!(
            "Ranked {} of {} listings (min score {:.2})",
            kept.len(),
            before,
            self.min_score
        );
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Characteristics, Source};

    #[test]
    fn tokenize_keeps_single_characters() {
        assert_eq!(
            tokenize("Apple iPhone X, 128GB / 2"),
            vec!["apple", "iphone", "x", "128gb", "2"]
        );
        assert_eq!(tokenize("Ładowarka USB-C"), vec!["ładowarka", "usb", "c"]);
    }

    #[test]
    fn normalized_rule_matches_mixed_case_and_phrases() {
        let rule = ExclusionRule {
            name: "custom".into(),
            query_tokens: vec!["iPhone".into(), "  ".into()],
            category_values: Vec::new(),
            excluded_tokens: vec!["Case".into(), "Screen-Protector".into()],
        }
        .normalized();
        assert_eq!(rule.query_tokens, vec!["iphone"]);
        assert_eq!(rule.excluded_tokens, vec!["case", "screen protector"]);

        let q = tokenize("iphone 13");
        assert!(rule.excludes(&tokenize("iPhone 13 screen protector 2-pack"), &q));
        assert!(!rule.excludes(&tokenize("iPhone 13 screen 6.1 inch"), &q));
    }

    #[test]
    fn prefix_matching_needs_four_chars() {
        assert!(token_matches("lamp", "lamps"));
        assert!(!token_matches("13", "130"));
    }

    #[test]
    fn exclusion_skipped_when_query_asks_for_accessory() {
        let scorer = RelevanceScorer::default();
        let q = Query::new("iphone 13 case", Characteristics::new()).unwrap();
        let l = Listing::new("iPhone 13 Case Silicone", Source::Amazon);
        assert!(scorer.excluded_by(&l, &q).is_none());
        assert!(scorer.score(&l, &q) > 1.0);
    }

    #[test]
    fn category_characteristic_triggers_rule() {
        let scorer = RelevanceScorer::default();
        let q = Query::new(
            "nothing 2a",
            Characteristics::new().with(CharacteristicKey::Category, "Smartfony"),
        )
        .unwrap();
        let l = Listing::new("Nothing 2a etui silikonowe", Source::Allegro);
        assert_eq!(scorer.excluded_by(&l, &q), Some("phone_accessories"));
    }

    #[test]
    fn rank_is_stable_and_capped() {
        let scorer = RelevanceScorer::new(0.1, 2, Vec::new());
        let q = Query::new("desk lamp", Characteristics::new()).unwrap();
        let listings = vec![
            Listing::new("Lamp", Source::Allegro),
            Listing::new("Desk lamp white", Source::Allegro),
            Listing::new("Table lamp", Source::Allegro),
        ];
        let ranked = scorer.rank(listings, &q);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].title, "Desk lamp white");
        // Equal scores keep extraction order.
        assert_eq!(ranked[1].title, "Lamp");
    }
}
