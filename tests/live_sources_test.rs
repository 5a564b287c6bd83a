/// Live marketplace checks. They hit real sites, so they are opt-in:
/// cargo test --test live_sources_test -- --ignored --nocapture
use market_scout::{Characteristics, Orchestrator, Query, ScoutConfig, Source, SourceStatus};
use std::sync::Arc;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

async fn orchestrator() -> Orchestrator {
    let config = Arc::new(ScoutConfig::load());
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(config.http_connect_timeout)
        .build()
        .unwrap();
    Orchestrator::new(config, &client).await
}

#[tokio::test]
#[ignore]
async fn live_every_source_reports() {
    init_logger();
    let orch = orchestrator().await;
    let q = Query::new("desk lamp", Characteristics::new()).unwrap();
    let result = orch.search(&q).await;

    println!("\n🔍 '{}' in {}ms", result.query, result.total_duration_ms);
    for (source, report) in &result.sources {
        println!(
            "  {:<10} {:?} via {:?}: {} listings ({} attempts) {}",
            source.as_str(),
            report.status,
            report.strategy,
            report.listings.len(),
            report.attempts.len(),
            report.note.as_deref().unwrap_or("")
        );
        for l in report.listings.iter().take(3) {
            println!("      {:.2}  {}  [{}]", l.relevance_score, l.title, l.price);
        }
    }

    assert_eq!(result.sources.len(), orch.sources().len());
    for report in result.sources.values() {
        if report.status == SourceStatus::Ok {
            assert!(report.listings.iter().all(|l| !l.title.is_empty()));
        }
    }
}

#[tokio::test]
#[ignore]
async fn live_allegro_phone_search_has_no_accessories() {
    init_logger();
    let orch = orchestrator().await;
    let q = Query::new("iphone 13", Characteristics::new()).unwrap();
    let result = orch.search(&q).await;

    let Some(report) = result.sources.get(&Source::Allegro) else {
        println!("allegro not configured, skipping");
        return;
    };
    for l in &report.listings {
        let lower = l.title.to_lowercase();
        assert!(!lower.contains("etui"), "accessory slipped through: {}", l.title);
        assert!(!lower.contains("szkło"), "accessory slipped through: {}", l.title);
    }
}
