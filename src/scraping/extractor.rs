//! Listing extraction: ordered candidate rules per field, first non-empty match wins.
//!
//! Fields are resolved independently, so a missing price rule never hides a title.
//! Rules never fail; absent fields fall back to sentinels and title-less records
//! are dropped.

use crate::core::types::{Listing, Query, Source};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Raw payload handed over by a fetch strategy.
#[derive(Debug, Clone)]
pub enum RawContent {
    Html(String),
    Json(Value),
}

impl RawContent {
    pub fn len(&self) -> usize {
        match self {
            RawContent::Html(s) => s.len(),
            RawContent::Json(v) => v.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── HTML rules ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum FieldRule {
    /// Text content of the first match under the container.
    Text(Selector),
    /// First non-empty attribute (in order) of the first match.
    Attr(Selector, Vec<&'static str>),
    /// Attribute of the container element itself.
    OwnAttr(Vec<&'static str>),
    /// Regex over the container's whole text.
    Pattern(Regex),
}

/// Ordered candidates for one field.
#[derive(Debug, Clone, Default)]
pub struct FieldRules(Vec<FieldRule>);

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(css: &str) -> Option<Selector> {
        match Selector::parse(css) {
            Ok(sel) => Some(sel),
            Err(e) => {
                warn!("ignoring invalid selector '{}': {:?}", css, e);
                None
            }
        }
    }

    pub fn text(mut self, css: &str) -> Self {
        if let Some(sel) = Self::parse(css) {
            self.0.push(FieldRule::Text(sel));
        }
        self
    }

    pub fn attr(mut self, css: &str, attrs: &[&'static str]) -> Self {
        if let Some(sel) = Self::parse(css) {
            self.0.push(FieldRule::Attr(sel, attrs.to_vec()));
        }
        self
    }

    pub fn own_attr(mut self, attrs: &[&'static str]) -> Self {
        self.0.push(FieldRule::OwnAttr(attrs.to_vec()));
        self
    }

    pub fn pattern(mut self, re: &str) -> Self {
        match Regex::new(re) {
            Ok(re) => self.0.push(FieldRule::Pattern(re)),
            Err(e) => warn!("ignoring invalid pattern '{}': {}", re, e),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of the first rule that yields a non-empty string.
    pub fn first_match(&self, container: ElementRef<'_>) -> Option<String> {
        self.0.iter().find_map(|rule| {
            let value = match rule {
                FieldRule::Text(sel) => container
                    .select(sel)
                    .next()
                    .map(|n| normalize_ws(&n.text().collect::<String>())),
                FieldRule::Attr(sel, attrs) => container
                    .select(sel)
                    .next()
                    .and_then(|n| first_attr(n, attrs)),
                FieldRule::OwnAttr(attrs) => first_attr(container, attrs),
                FieldRule::Pattern(re) => {
                    let text = normalize_ws(&container.text().collect::<String>());
                    re.find(&text).map(|m| m.as_str().to_string())
                }
            };
            value.filter(|v| !v.is_empty())
        })
    }
}

fn first_attr(el: ElementRef<'_>, attrs: &[&'static str]) -> Option<String> {
    attrs.iter().find_map(|a| {
        el.value()
            .attr(a)
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.starts_with("data:"))
            .map(str::to_string)
    })
}

/// Selector tables for one source's HTML pages.
#[derive(Debug, Clone, Default)]
pub struct HtmlRules {
    containers: Vec<Selector>,
    pub title: FieldRules,
    pub price: FieldRules,
    pub image: FieldRules,
    pub url: FieldRules,
    pub seller: FieldRules,
    pub description: FieldRules,
}

impl HtmlRules {
    /// Container selectors in priority order. The first one that yields at least
    /// one titled listing wins for the whole page.
    pub fn containers(css: &[&str]) -> Self {
        Self {
            containers: css.iter().filter_map(|c| FieldRules::parse(c)).collect(),
            ..Default::default()
        }
    }
}

// ── JSON rules ───────────────────────────────────────────────────────────────

/// One JSON candidate: a pointer, or several pointers poured into a template.
#[derive(Debug, Clone)]
pub enum JsonField {
    Path(String),
    Template {
        pointers: Vec<String>,
        template: &'static str,
    },
}

impl JsonField {
    pub fn path(p: &str) -> Self {
        JsonField::Path(p.to_string())
    }

    /// `template` holds one `{}` per pointer; all pointers must resolve.
    pub fn template(pointers: &[&str], template: &'static str) -> Self {
        JsonField::Template {
            pointers: pointers.iter().map(|p| p.to_string()).collect(),
            template,
        }
    }

    fn resolve(&self, item: &Value) -> Option<String> {
        match self {
            JsonField::Path(p) => scalar(item.pointer(p)?),
            JsonField::Template { pointers, template } => {
                let mut out = template.to_string();
                for p in pointers {
                    let v = scalar(item.pointer(p)?)?;
                    out = out.replacen("{}", &v, 1);
                }
                Some(out)
            }
        }
    }
}

fn scalar(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => normalize_ws(s),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn first_json(fields: &[JsonField], item: &Value) -> Option<String> {
    fields.iter().find_map(|f| f.resolve(item))
}

#[derive(Debug, Clone, Default)]
pub struct JsonRules {
    /// Pointers to the item array, first non-empty array wins.
    pub items: Vec<String>,
    pub title: Vec<JsonField>,
    pub price: Vec<JsonField>,
    pub image: Vec<JsonField>,
    pub url: Vec<JsonField>,
    pub seller: Vec<JsonField>,
    pub description: Vec<JsonField>,
}

impl JsonRules {
    pub fn items<'a>(&self, doc: &'a Value) -> &'a [Value] {
        self.items
            .iter()
            .find_map(|p| {
                doc.pointer(p)
                    .and_then(Value::as_array)
                    .filter(|a| !a.is_empty())
            })
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Source-specific extraction rules plus the origin used to absolutize URLs.
#[derive(Debug, Clone)]
pub struct Extractor {
    source: Source,
    base: Url,
    html: Option<HtmlRules>,
    json: Option<JsonRules>,
}

impl Extractor {
    pub fn new(source: Source, base: Url) -> Self {
        Self {
            source,
            base,
            html: None,
            json: None,
        }
    }

    pub fn with_html(mut self, rules: HtmlRules) -> Self {
        self.html = Some(rules);
        self
    }

    pub fn with_json(mut self, rules: JsonRules) -> Self {
        self.json = Some(rules);
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Number of items a JSON payload carries under the configured item pointers.
    pub fn json_item_count(&self, doc: &Value) -> usize {
        self.json.as_ref().map(|r| r.items(doc).len()).unwrap_or(0)
    }

    pub fn extract(&self, raw: &RawContent, query: &Query) -> Vec<Listing> {
        let out = match raw {
            RawContent::Html(html) => self.extract_html(html),
            RawContent::Json(doc) => self.extract_json(doc),
        };
        debug!(
            "{}: extracted {} listings for '{}'",
            self.source,
            out.len(),
            query
        );
        out
    }

    fn resolve_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        self.base.join(href).ok().map(|u| u.to_string())
    }

    fn build(
        &self,
        title: Option<String>,
        price: Option<String>,
        image: Option<String>,
        url: Option<String>,
        seller: Option<String>,
        description: Option<String>,
    ) -> Option<Listing> {
        let title = title.filter(|t| !t.trim().is_empty())?;
        let mut listing = Listing::new(title, self.source);
        if let Some(p) = price {
            listing.price = p;
        }
        listing.image_url = image
            .and_then(|i| self.resolve_url(&i))
            .unwrap_or_default();
        listing.product_url = url
            .and_then(|u| self.resolve_url(&u))
            .unwrap_or_else(|| self.base.to_string());
        listing.seller_name = seller;
        listing.description = description;
        Some(listing)
    }

    fn extract_html(&self, html: &str) -> Vec<Listing> {
        let Some(rules) = &self.html else {
            return Vec::new();
        };
        let doc = Html::parse_document(html);

        let mut out = Vec::new();
        for container_sel in &rules.containers {
            for container in doc.select(container_sel) {
                let listing = self.build(
                    rules.title.first_match(container),
                    rules.price.first_match(container),
                    rules.image.first_match(container),
                    rules.url.first_match(container),
                    rules.seller.first_match(container),
                    rules.description.first_match(container),
                );
                if let Some(l) = listing {
                    out.push(l);
                }
            }
            if !out.is_empty() {
                break;
            }
        }
        out
    }

    fn extract_json(&self, doc: &Value) -> Vec<Listing> {
        let Some(rules) = &self.json else {
            return Vec::new();
        };
        rules
            .items(doc)
            .iter()
            .filter_map(|item| {
                self.build(
                    first_json(&rules.title, item),
                    first_json(&rules.price, item),
                    first_json(&rules.image, item),
                    first_json(&rules.url, item),
                    first_json(&rules.seller, item),
                    first_json(&rules.description, item),
                )
            })
            .collect()
    }
}
