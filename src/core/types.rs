use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::error::QueryError;

/// Shown instead of a price when a listing does not expose one.
pub const PRICE_NOT_AVAILABLE: &str = "price not available";

// ── Query & characteristics ──────────────────────────────────────────────────

/// Fixed vocabulary of structured characteristics a caller may attach to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacteristicKey {
    Brand,
    Color,
    Size,
    Material,
    Category,
    Type,
    Model,
}

impl CharacteristicKey {
    pub const ALL: [CharacteristicKey; 7] = [
        CharacteristicKey::Brand,
        CharacteristicKey::Color,
        CharacteristicKey::Size,
        CharacteristicKey::Material,
        CharacteristicKey::Category,
        CharacteristicKey::Type,
        CharacteristicKey::Model,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicKey::Brand => "brand",
            CharacteristicKey::Color => "color",
            CharacteristicKey::Size => "size",
            CharacteristicKey::Material => "material",
            CharacteristicKey::Category => "category",
            CharacteristicKey::Type => "type",
            CharacteristicKey::Model => "model",
        }
    }
}

impl FromStr for CharacteristicKey {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brand" => Ok(CharacteristicKey::Brand),
            "color" | "colour" => Ok(CharacteristicKey::Color),
            "size" => Ok(CharacteristicKey::Size),
            "material" => Ok(CharacteristicKey::Material),
            "category" => Ok(CharacteristicKey::Category),
            "type" => Ok(CharacteristicKey::Type),
            "model" => Ok(CharacteristicKey::Model),
            other => Err(QueryError::UnknownCharacteristic(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Characteristics(BTreeMap<CharacteristicKey, String>);

impl Characteristics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Blank values are ignored.
    pub fn with(mut self, key: CharacteristicKey, value: impl Into<String>) -> Self {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.0.insert(key, value.to_string());
        }
        self
    }

    /// Parses a loose string map (as received over the wire), rejecting keys outside the vocabulary.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mut out = Self::new();
        for (k, v) in map {
            let key: CharacteristicKey = k.parse()?;
            out = out.with(key, v.as_str());
        }
        Ok(out)
    }

    pub fn get(&self, key: CharacteristicKey) -> Option<&str> {
        self.0.get(&key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CharacteristicKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Free-text search request plus optional characteristics. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    text: String,
    #[serde(skip_serializing_if = "Characteristics::is_empty")]
    characteristics: Characteristics,
}

impl Query {
    pub fn new(text: impl Into<String>, characteristics: Characteristics) -> Result<Self, QueryError> {
        let text = text.into().split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self {
            text,
            characteristics,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn characteristics(&self) -> &Characteristics {
        &self.characteristics
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ── Sources ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Allegro,
    Amazon,
    #[serde(rename = "aliexpress")]
    AliExpress,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Allegro, Source::Amazon, Source::AliExpress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Allegro => "allegro",
            Source::Amazon => "amazon",
            Source::AliExpress => "aliexpress",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allegro" => Ok(Source::Allegro),
            "amazon" => Ok(Source::Amazon),
            "aliexpress" | "ali" => Ok(Source::AliExpress),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

// ── Listings ─────────────────────────────────────────────────────────────────

/// Normalized product record shared by every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub title: String,
    /// Display string exactly as the source shows it, or [`PRICE_NOT_AVAILABLE`].
    pub price: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    #[serde(rename = "productURL")]
    pub product_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub relevance_score: f64,
    pub source_tag: String,
    /// Synthetic demonstration data, never a real offer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_placeholder: bool,
}

impl Listing {
    pub fn new(title: impl Into<String>, source: Source) -> Self {
        Self {
            title: title.into(),
            price: PRICE_NOT_AVAILABLE.to_string(),
            image_url: String::new(),
            product_url: String::new(),
            seller_name: None,
            description: None,
            relevance_score: 0.0,
            source_tag: source.as_str().to_string(),
            is_placeholder: false,
        }
    }
}

// ── Fetch attempts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectHttp,
    AlternateEndpoint,
    MobileHttp,
    HeadlessBrowser,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::DirectHttp => "direct_http",
            StrategyKind::AlternateEndpoint => "alternate_endpoint",
            StrategyKind::MobileHttp => "mobile_http",
            StrategyKind::HeadlessBrowser => "headless_browser",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptOutcome {
    Ok,
    Blocked,
    CaptchaDetected,
    CaptchaSolved,
    CaptchaFailed,
    NetworkError,
    Empty,
    TimedOut,
}

/// Diagnostic record of one strategy invocation. Lives for one search only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAttempt {
    pub strategy: StrategyKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FetchAttempt {
    pub fn now(strategy: StrategyKind, outcome: AttemptOutcome, detail: Option<String>) -> Self {
        Self {
            strategy,
            timestamp: Utc::now(),
            outcome,
            detail,
        }
    }
}

// ── Search results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// At least one real listing survived ranking.
    Ok,
    /// A strategy succeeded but nothing passed the relevance filter.
    NoMatches,
    /// Every strategy was exhausted.
    Unavailable,
    /// The per-source deadline elapsed.
    TimedOut,
    /// The source task failed unexpectedly.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub status: SourceStatus,
    pub listings: Vec<Listing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub attempts: Vec<FetchAttempt>,
    pub duration_ms: u64,
}

impl SourceReport {
    pub fn failed(status: SourceStatus, note: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status,
            listings: Vec::new(),
            note: Some(note.into()),
            strategy: None,
            attempts: Vec::new(),
            duration_ms,
        }
    }

    /// True when at least one listing is real data.
    pub fn has_real_listings(&self) -> bool {
        self.listings.iter().any(|l| !l.is_placeholder)
    }
}

/// Per-source outcome of one query. Every searched source has an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub query: String,
    pub sources: BTreeMap<Source, SourceReport>,
    pub total_duration_ms: u64,
}

impl SearchResult {
    pub fn listing_count(&self) -> usize {
        self.sources.values().map(|r| r.listings.len()).sum()
    }

    pub fn has_real_listings(&self) -> bool {
        self.sources.values().any(SourceReport::has_real_listings)
    }
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub batch_id: String,
    pub result: SearchResult,
    pub progress: BatchProgress,
}

// ── Wire types for the HTTP wrapper ──────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub characteristics: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSearchRequest {
    pub queries: Vec<String>,
    #[serde(default)]
    pub characteristics: HashMap<String, String>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalizes_whitespace_and_rejects_blank() {
        let q = Query::new("  iphone   13 ", Characteristics::new()).unwrap();
        assert_eq!(q.text(), "iphone 13");
        assert!(matches!(
            Query::new("   ", Characteristics::new()),
            Err(QueryError::Empty)
        ));
    }

    #[test]
    fn characteristics_reject_unknown_keys() {
        let mut map = HashMap::new();
        map.insert("Brand".to_string(), "Apple".to_string());
        map.insert("colour".to_string(), "black".to_string());
        let c = Characteristics::from_map(&map).unwrap();
        assert_eq!(c.get(CharacteristicKey::Brand), Some("Apple"));
        assert_eq!(c.get(CharacteristicKey::Color), Some("black"));

        map.insert("weight".to_string(), "1kg".to_string());
        assert!(Characteristics::from_map(&map).is_err());
    }

    #[test]
    fn search_result_serializes_sources_as_keys() {
        let mut sources = BTreeMap::new();
        sources.insert(
            Source::AliExpress,
            SourceReport::failed(SourceStatus::Unavailable, "all strategies exhausted", 5),
        );
        let result = SearchResult {
            query: "lamp".into(),
            sources,
            total_duration_ms: 5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sources"]["aliexpress"]["status"], "unavailable");
        assert_eq!(
            json["sources"]["aliexpress"]["note"],
            "all strategies exhausted"
        );
    }
}
