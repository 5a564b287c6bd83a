//! Image solver wire protocol against a local `in.php` / `res.php` stand-in.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Form, Router};
use market_scout::captcha::{CaptchaSolver, SolverError, TwoCaptchaSolver};
use market_scout::search::sources::checked_solver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

struct Service {
    /// Polls answered with `CAPCHA_NOT_READY` before the answer is released.
    pending_polls: usize,
    balance_reply: &'static str,
    polls: AtomicUsize,
    submitted: AtomicUsize,
}

async fn submit(State(svc): State<Arc<Service>>, Form(form): Form<HashMap<String, String>>) -> String {
    svc.submitted.fetch_add(1, Ordering::SeqCst);
    let well_formed = form.get("method").map(String::as_str) == Some("base64")
        && form.get("key").is_some_and(|k| !k.is_empty())
        && form.get("body").is_some_and(|b| !b.is_empty());
    if well_formed {
        "OK|42".to_string()
    } else {
        "ERROR_WRONG_CAPTCHA_ID".to_string()
    }
}

async fn result(
    State(svc): State<Arc<Service>>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    match params.get("action").map(String::as_str) {
        Some("getbalance") => svc.balance_reply.to_string(),
        Some("get") if params.get("id").map(String::as_str) == Some("42") => {
            let n = svc.polls.fetch_add(1, Ordering::SeqCst);
            if n < svc.pending_polls {
                "CAPCHA_NOT_READY".to_string()
            } else {
                "OK|x7k2p".to_string()
            }
        }
        _ => "ERROR_WRONG_CAPTCHA_ID".to_string(),
    }
}

async fn serve(svc: Arc<Service>) -> String {
    let app = Router::new()
        .route("/in.php", post(submit))
        .route("/res.php", get(result))
        .with_state(svc);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/", addr)
}

fn service(pending_polls: usize, balance_reply: &'static str) -> Arc<Service> {
    Arc::new(Service {
        pending_polls,
        balance_reply,
        polls: AtomicUsize::new(0),
        submitted: AtomicUsize::new(0),
    })
}

fn solver(base_url: &str, timeout: Duration) -> TwoCaptchaSolver {
    TwoCaptchaSolver::new(reqwest::Client::new(), "test-key", timeout)
        .with_base_url(base_url)
        .with_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn submits_then_polls_until_the_answer_is_ready() {
    init_logger();
    let svc = service(2, "3.50");
    let base = serve(Arc::clone(&svc)).await;

    let answer = tokio_test::assert_ok!(
        solver(&base, Duration::from_secs(5))
            .solve_image(b"\x89PNG fake")
            .await
    );
    assert_eq!(answer, "x7k2p");
    assert_eq!(svc.submitted.load(Ordering::SeqCst), 1);
    assert_eq!(svc.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_when_the_answer_never_arrives() {
    init_logger();
    let svc = service(usize::MAX, "3.50");
    let base = serve(Arc::clone(&svc)).await;

    let err = solver(&base, Duration::from_millis(200))
        .solve_image(b"\x89PNG fake")
        .await
        .unwrap_err();
    assert!(matches!(err, SolverError::Timeout(d) if d == Duration::from_millis(200)));
    assert!(svc.polls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn empty_key_fails_without_calling_the_service() {
    let svc = service(0, "3.50");
    let base = serve(Arc::clone(&svc)).await;

    let err = TwoCaptchaSolver::new(reqwest::Client::new(), "  ", Duration::from_secs(1))
        .with_base_url(base)
        .solve_image(b"png")
        .await
        .unwrap_err();
    assert!(matches!(err, SolverError::MissingCredential));
    assert_eq!(svc.submitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn balance_check_keeps_a_valid_credential() {
    init_logger();
    let base = serve(service(0, "3.50")).await;
    let s = solver(&base, Duration::from_secs(1));

    let balance = tokio_test::assert_ok!(s.balance().await);
    assert!((balance - 3.5).abs() < f64::EPSILON);
    assert!(checked_solver(s).await.is_some());
}

#[tokio::test]
async fn balance_check_disables_a_rejected_credential() {
    init_logger();
    let base = serve(service(0, "ERROR_WRONG_USER_KEY")).await;
    let s = solver(&base, Duration::from_secs(1));

    assert!(matches!(s.balance().await, Err(SolverError::Rejected(r)) if r == "ERROR_WRONG_USER_KEY"));
    assert!(checked_solver(s).await.is_none());
}

#[tokio::test]
async fn unreachable_service_keeps_the_solver() {
    init_logger();
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let s = solver(&format!("http://{}", addr), Duration::from_secs(1));
    assert!(matches!(s.balance().await, Err(SolverError::Http(_))));
    assert!(checked_solver(s).await.is_some());
}
