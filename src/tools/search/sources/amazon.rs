use super::{SourceContext, SourceProfile};
use crate::core::types::{Source, StrategyKind};
use crate::features::antibot::PageClassifier;
use crate::scraping::extractor::{Extractor, FieldRules, HtmlRules};
use crate::scraping::strategy::FetchStrategy;
use crate::tools::search::adapter::PlaceholderStyle;
use std::sync::Arc;
use url::Url;

pub const BASE_URL: &str = "https://www.amazon.de";
const SEARCH: &str = "https://www.amazon.de/s?k={q}";
const SEARCH_ALL_DEPARTMENTS: &str = "https://www.amazon.de/s?k={q}&i=aps&ref=nb_sb_noss";

const CONTAINERS: &[&str] = &[
    "div[data-asin][data-component-type=\"s-search-result\"]",
    "div.s-result-item[data-asin]",
];

pub fn html_rules() -> HtmlRules {
    let mut r = HtmlRules::containers(CONTAINERS);
    r.title = FieldRules::new()
        .text("h2 a span")
        .text("h2 span")
        .attr("h2", &["aria-label"]);
    r.price = FieldRules::new()
        .text("span.a-price span.a-offscreen")
        .text("span.a-color-price")
        .pattern(r"\d[\d.]*,\d{2}\s*€");
    r.image = FieldRules::new().attr("img.s-image", &["src", "data-src"]);
    r.url = FieldRules::new()
        .attr("h2 a.a-link-normal", &["href"])
        .attr("a.a-link-normal[href*=\"/dp/\"]", &["href"]);
    r.description = FieldRules::new().text("div[data-cy=\"secondary-offer-recipe\"]");
    r
}

pub fn profile(ctx: &SourceContext<'_>) -> anyhow::Result<SourceProfile> {
    let extractor = Arc::new(
        Extractor::new(Source::Amazon, Url::parse(BASE_URL)?).with_html(html_rules()),
    );
    let classifier = PageClassifier::new(CONTAINERS);

    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(ctx.http(StrategyKind::DirectHttp, SEARCH, &classifier, &extractor)),
        Arc::new(ctx.http(
            StrategyKind::AlternateEndpoint,
            SEARCH_ALL_DEPARTMENTS,
            &classifier,
            &extractor,
        )),
        Arc::new(
            ctx.http(StrategyKind::MobileHttp, SEARCH, &classifier, &extractor)
                .mobile(),
        ),
    ];
    strategies.extend(ctx.browser(SEARCH, &classifier, &extractor));

    Ok(SourceProfile {
        source: Source::Amazon,
        base_url: BASE_URL,
        strategies,
        placeholder: PlaceholderStyle {
            search_url: SEARCH.to_string(),
            price_template: "{},99 €",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Characteristics, Query};
    use crate::scraping::extractor::RawContent;

    #[test]
    fn parses_search_result_cards() {
        let html = r#"
            <div data-asin="B0TEST" data-component-type="s-search-result">
              <h2><a class="a-link-normal" href="/Apple-iPhone-13/dp/B0TEST"><span>Apple iPhone 13 (128 GB) - Mitternacht</span></a></h2>
              <span class="a-price"><span class="a-offscreen">549,00 €</span></span>
              <img class="s-image" src="https://m.media-amazon.com/images/I/x.jpg">
            </div>
            <div data-asin="" data-component-type="s-search-result"><span>sponsored slot</span></div>"#;
        let ex = Extractor::new(Source::Amazon, Url::parse(BASE_URL).unwrap()).with_html(html_rules());
        let q = Query::new("iphone 13", Characteristics::new()).unwrap();
        let out = ex.extract(&RawContent::Html(html.into()), &q);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Apple iPhone 13 (128 GB) - Mitternacht");
        assert_eq!(out[0].price, "549,00 €");
        assert_eq!(out[0].product_url, "https://www.amazon.de/Apple-iPhone-13/dp/B0TEST");
        assert_eq!(out[0].source_tag, "amazon");
    }
}
