use super::{SourceContext, SourceProfile};
use crate::core::types::{Source, StrategyKind};
use crate::features::antibot::PageClassifier;
use crate::scraping::extractor::{Extractor, FieldRules, HtmlRules, JsonField, JsonRules};
use crate::scraping::strategy::FetchStrategy;
use crate::tools::search::adapter::PlaceholderStyle;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const BASE_URL: &str = "https://www.aliexpress.com";
const WHOLESALE: &str = "https://www.aliexpress.com/wholesale?SearchText={q}";
const MOBILE_WHOLESALE: &str = "https://m.aliexpress.com/wholesale?SearchText={q}";
const DATAHUB: &str = "https://aliexpress-datahub.p.rapidapi.com/item_search_2?q={q}&page=1";
const DATAHUB_HOST: &str = "aliexpress-datahub.p.rapidapi.com";

const CONTAINERS: &[&str] = &[
    "div[data-widget-cid] a[href*=\"/item/\"]",
    "div.list-item",
    "div.product-item",
    "a[href*=\"/item/\"]",
];

pub fn html_rules() -> HtmlRules {
    let mut r = HtmlRules::containers(CONTAINERS);
    r.title = FieldRules::new()
        .text("h3")
        .text("[class*=\"title\"]")
        .attr("a[title]", &["title"])
        .own_attr(&["title", "aria-label"]);
    r.price = FieldRules::new()
        .text("[class*=\"price-sale\"]")
        .text("[class*=\"price\"]")
        .pattern(r"(US\s*)?\$\s?\d+(\.\d+)?|\d+[,.]\d{2}\s*(zł|€)");
    r.image = FieldRules::new().attr("img", &["src", "data-src", "data-lazy-src"]);
    r.url = FieldRules::new()
        .own_attr(&["href"])
        .attr("a[href*=\"/item/\"]", &["href"]);
    r
}

pub fn json_rules() -> JsonRules {
    JsonRules {
        items: vec!["/result/resultList".into()],
        title: vec![JsonField::path("/item/title")],
        price: vec![
            JsonField::template(&["/item/sku/def/promotionPrice"], "US ${}"),
            JsonField::template(&["/item/sku/def/price"], "US ${}"),
        ],
        image: vec![JsonField::path("/item/image")],
        url: vec![JsonField::path("/item/itemUrl")],
        seller: vec![JsonField::path("/item/store/storeTitle")],
        description: Vec::new(),
    }
}

pub fn profile(ctx: &SourceContext<'_>) -> anyhow::Result<SourceProfile> {
    let extractor = Arc::new(
        Extractor::new(Source::AliExpress, Url::parse(BASE_URL)?)
            .with_html(html_rules())
            .with_json(json_rules()),
    );
    let classifier = PageClassifier::new(CONTAINERS);

    let mut strategies: Vec<Arc<dyn FetchStrategy>> = Vec::new();
    match ctx.config.rapidapi_key.as_deref() {
        Some(key) => strategies.push(Arc::new(
            ctx.http(StrategyKind::AlternateEndpoint, DATAHUB, &classifier, &extractor)
                .json()
                .with_header("x-rapidapi-key", key)
                .with_header("x-rapidapi-host", DATAHUB_HOST),
        )),
        None => debug!("RAPIDAPI_KEY not set; AliExpress API strategy skipped"),
    }
    strategies.push(Arc::new(ctx.http(
        StrategyKind::DirectHttp,
        WHOLESALE,
        &classifier,
        &extractor,
    )));
    strategies.push(Arc::new(
        ctx.http(StrategyKind::MobileHttp, MOBILE_WHOLESALE, &classifier, &extractor)
            .mobile(),
    ));
    strategies.extend(ctx.browser(WHOLESALE, &classifier, &extractor));

    Ok(SourceProfile {
        source: Source::AliExpress,
        base_url: BASE_URL,
        strategies,
        placeholder: PlaceholderStyle {
            search_url: WHOLESALE.to_string(),
            price_template: "US ${}.99",
        },
    })
}
