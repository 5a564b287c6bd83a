//! HTTP wrapper: request validation, single search and NDJSON batch streaming.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use market_scout::{
    http, AppState, ListingSearch, Listing, Query, ScoutConfig, SearchResult, Source,
    SourceReport, SourceStatus, StrategyKind,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Answers every query from Allegro, except queries containing "nothing".
struct StubSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl ListingSearch for StubSearch {
    async fn search(&self, query: &Query) -> SearchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let report = if query.text().contains("nothing") {
            SourceReport::failed(SourceStatus::Unavailable, "all strategies exhausted", 3)
        } else {
            let mut l = Listing::new(format!("{} original", query.text()), Source::Allegro);
            l.product_url = "https://allegro.pl/oferta/1".to_string();
            l.relevance_score = 1.4;
            SourceReport {
                status: SourceStatus::Ok,
                listings: vec![l],
                note: None,
                strategy: Some(StrategyKind::DirectHttp),
                attempts: Vec::new(),
                duration_ms: 12,
            }
        };
        let mut sources = BTreeMap::new();
        sources.insert(Source::Allegro, report);
        SearchResult {
            query: query.text().to_string(),
            sources,
            total_duration_ms: 12,
        }
    }
}

async fn app() -> (axum::Router, Arc<StubSearch>) {
    let stub = Arc::new(StubSearch {
        calls: AtomicUsize::new(0),
    });
    let config = Arc::new(ScoutConfig {
        browser_enabled: false,
        ..ScoutConfig::default()
    });
    let state = AppState::new(config, reqwest::Client::new())
        .await
        .with_search(Arc::clone(&stub) as Arc<dyn ListingSearch>, 1);
    (http::router(Arc::new(state)), stub)
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_service_and_sources() {
    let (app, _) = app().await;
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "market-scout");
    assert_eq!(body["sources"], 1);
}

#[tokio::test]
async fn search_returns_per_source_reports() {
    let (app, stub) = app().await;
    let resp = tokio_test::assert_ok!(
        app.oneshot(post(
            "/search",
            serde_json::json!({ "query": "desk lamp", "characteristics": { "color": "black" } }),
        ))
        .await
    );
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;

    assert_eq!(body["query"], "desk lamp");
    let allegro = &body["sources"]["allegro"];
    assert_eq!(allegro["status"], "ok");
    assert_eq!(allegro["strategy"], "direct_http");
    assert_eq!(allegro["listings"][0]["title"], "desk lamp original");
    assert_eq!(allegro["listings"][0]["productURL"], "https://allegro.pl/oferta/1");
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_searching() {
    let (app, stub) = app().await;

    let resp = app
        .clone()
        .oneshot(post(
            "/search",
            serde_json::json!({ "query": "desk lamp", "characteristics": { "flavour": "mint" } }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap_or_default().contains("flavour"));

    let resp = app
        .clone()
        .oneshot(post("/search", serde_json::json!({ "query": "   " })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(post("/search/batch", serde_json::json!({ "queries": ["", " "] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_streams_one_line_per_unique_query() {
    let (app, stub) = app().await;
    let resp = app
        .oneshot(post(
            "/search/batch",
            serde_json::json!({
                "queries": ["desk lamp", "Desk  Lamp", "nothing here", "iphone 13"],
                "max_concurrent": 2
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let items: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(items.len(), 3);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 3);

    let batch_id = items[0]["batchId"].as_str().unwrap().to_string();
    assert!(items.iter().all(|i| i["batchId"] == batch_id.as_str()));
    let processed: Vec<u64> = items
        .iter()
        .map(|i| i["progress"]["processed"].as_u64().unwrap())
        .collect();
    assert_eq!(processed, vec![1, 2, 3]);

    let last = &items[2]["progress"];
    assert_eq!(last["total"], 3);
    assert_eq!(last["failed"], 1);
}
