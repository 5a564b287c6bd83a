use super::{SourceContext, SourceProfile};
use crate::core::types::{Source, StrategyKind};
use crate::features::antibot::PageClassifier;
use crate::scraping::strategy::FetchStrategy;
use crate::scraping::extractor::{Extractor, FieldRules, HtmlRules, JsonField, JsonRules};
use crate::tools::search::adapter::PlaceholderStyle;
use std::sync::Arc;
use url::Url;

pub const BASE_URL: &str = "https://allegro.pl";
const LISTING: &str = "https://allegro.pl/listing?string={q}";
const WEBAPI: &str = "https://allegro.pl/webapi/search/offers?phrase={q}";
const MOBILE: &str = "https://m.allegro.pl/listing?string={q}";

const CONTAINERS: &[&str] = &[
    "article[data-role=\"offer\"]",
    "[data-testid=\"listing-item\"]",
    "div[data-role=\"offer\"]",
    "div[data-box-name*=\"listing\"] article",
];

pub fn html_rules() -> HtmlRules {
    let mut r = HtmlRules::containers(CONTAINERS);
    r.title = FieldRules::new()
        .text("h2 a[href*=\"/oferta/\"]")
        .text("h3 a[href*=\"/oferta/\"]")
        .text("a[data-testid*=\"title\"]")
        .attr("a[title]", &["title"]);
    r.price = FieldRules::new()
        .text("[data-testid*=\"price\"]")
        .text("[data-role=\"price\"]")
        .text("span[class*=\"price\"]")
        .pattern(r"\d[\d\s]*[,.]?\d*\s*zł");
    r.image = FieldRules::new().attr("img", &["src", "data-src"]);
    r.url = FieldRules::new()
        .attr("h2 a[href*=\"/oferta/\"]", &["href"])
        .attr("a[href*=\"/oferta/\"]", &["href"]);
    r.seller = FieldRules::new()
        .text("[data-testid*=\"seller\"]")
        .text("[data-testid*=\"shop\"]");
    r
}

pub fn json_rules() -> JsonRules {
    JsonRules {
        items: vec!["/items".into(), "/items/regular".into()],
        title: vec![JsonField::path("/name"), JsonField::path("/title")],
        price: vec![
            JsonField::template(&["/price"], "{} zł"),
            JsonField::template(&["/sellingMode/price/amount"], "{} zł"),
        ],
        image: vec![JsonField::path("/image"), JsonField::path("/images/0/url")],
        url: vec![JsonField::path("/url")],
        seller: vec![JsonField::path("/seller/name"), JsonField::path("/seller/login")],
        description: Vec::new(),
    }
}

pub fn profile(ctx: &SourceContext<'_>) -> anyhow::Result<SourceProfile> {
    let extractor = Arc::new(
        Extractor::new(Source::Allegro, Url::parse(BASE_URL)?)
            .with_html(html_rules())
            .with_json(json_rules()),
    );
    let classifier = PageClassifier::new(CONTAINERS);

    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(ctx.http(StrategyKind::DirectHttp, LISTING, &classifier, &extractor)),
        Arc::new(
            ctx.http(StrategyKind::AlternateEndpoint, WEBAPI, &classifier, &extractor)
                .json()
                .with_header("Referer", "https://allegro.pl/"),
        ),
        Arc::new(
            ctx.http(StrategyKind::MobileHttp, MOBILE, &classifier, &extractor)
                .mobile(),
        ),
    ];
    strategies.extend(ctx.browser(LISTING, &classifier, &extractor));

    Ok(SourceProfile {
        source: Source::Allegro,
        base_url: BASE_URL,
        strategies,
        placeholder: PlaceholderStyle {
            search_url: LISTING.to_string(),
            price_template: "{},00 zł",
        },
    })
}
