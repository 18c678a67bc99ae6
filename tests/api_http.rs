// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET  /health
// - GET  /api/codes (default + scope filters + invalid scope)
// - GET  /api/codes/health (caching headers, sanitized sources)
// - POST /api/codes/report (validation + persisted JSONL line)
// - POST /api/chat/message (validation, NDJSON frames, rate limit)

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use slimy_codes_service::api::{self, AppState};
use slimy_codes_service::chat::history::ChatHistory;
use slimy_codes_service::chat::provider::{ChatError, ChatProvider, MockChatProvider, MockOutcome};
use slimy_codes_service::chat::retry::RetryPolicy;
use slimy_codes_service::codes::aggregator::{Aggregator, FeedSlot};
use slimy_codes_service::codes::cache::CodesCache;
use slimy_codes_service::codes::report::ReportLog;
use slimy_codes_service::codes::sources::sample::SampleFeed;
use slimy_codes_service::codes::types::SourceKind;
use slimy_codes_service::ratelimit::RateLimiter;
use slimy_codes_service::store::{KvStore, MemoryStore};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

struct TestHarness {
    app: Router,
    // Holds the report directory alive for the duration of the test.
    report_dir: tempfile::TempDir,
}

fn harness() -> TestHarness {
    harness_with(Arc::new(MockChatProvider::echo()), 100)
}

/// Same wiring as `build_state`, but with a scriptable chat provider, an
/// in-memory sample-only feed set, and a tempdir report log.
fn harness_with(chat_provider: Arc<dyn ChatProvider>, chat_limit: u32) -> TestHarness {
    let report_dir = tempfile::tempdir().expect("tempdir");
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let cache = CodesCache::new(
        Arc::clone(&kv),
        Duration::from_secs(30),
        Duration::from_secs(600),
    );
    let aggregator = Aggregator::new(
        vec![
            FeedSlot::unconfigured(SourceKind::AggregatorPrimary),
            FeedSlot::unconfigured(SourceKind::CommunitySecondary),
            FeedSlot::configured(SourceKind::Sample, Box::new(SampleFeed)),
        ],
        SourceKind::DEFAULT_PRIORITY.to_vec(),
        cache,
    );
    let state = AppState {
        aggregator: Arc::new(aggregator),
        reports: Arc::new(ReportLog::new(report_dir.path())),
        limiter: Arc::new(RateLimiter::new(
            Arc::clone(&kv),
            chat_limit,
            Duration::from_secs(60),
        )),
        chat_provider,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        chat_history: Arc::new(ChatHistory::with_capacity(100)),
    };
    TestHarness {
        app: api::router(state),
        report_dir,
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET request");
    let resp = app.oneshot(req).await.expect("oneshot GET");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, bytes)
}

async fn post_json(
    app: Router,
    uri: &str,
    payload: Json,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST request");
    let resp = app.oneshot(req).await.expect("oneshot POST");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, bytes)
}

fn parse(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("parse json body")
}

// ---------------------------------------------------------------
// /health
// ---------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_and_ok_body() {
    let h = harness();
    let (status, _, bytes) = get(h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

// ---------------------------------------------------------------
// /api/codes
// ---------------------------------------------------------------

#[tokio::test]
async fn codes_returns_array_with_contract_fields() {
    let h = harness();
    let (status, _, bytes) = get(h.app, "/api/codes").await;
    assert_eq!(status, StatusCode::OK);

    let v = parse(&bytes);
    let codes = v["codes"].as_array().expect("codes array");
    assert!(!codes.is_empty(), "sample feed should produce codes");
    for c in codes {
        assert!(c["code"].is_string(), "missing 'code' in {c}");
        assert!(c["source"].is_string(), "missing 'source' in {c}");
        assert!(c["timestamp"].is_string(), "missing 'timestamp' in {c}");
        assert!(c["tags"].is_array(), "missing 'tags' in {c}");
    }
    // Newest first.
    let stamps: Vec<&str> = codes
        .iter()
        .map(|c| c["timestamp"].as_str().expect("timestamp"))
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(stamps, sorted, "codes must be sorted newest first");
}

#[tokio::test]
async fn codes_active_scope_drops_expired_entries() {
    let h = harness();
    let (status, _, bytes) = get(h.app, "/api/codes?scope=active").await;
    assert_eq!(status, StatusCode::OK);

    let v = parse(&bytes);
    let codes = v["codes"].as_array().expect("codes array");
    assert!(!codes.is_empty());
    let now = Utc::now();
    for c in codes {
        assert_ne!(c["code"].as_str(), Some("SHELL-SHINE-EXPIRED"));
        if let Some(exp) = c["expires"].as_str() {
            let exp: chrono::DateTime<Utc> = exp.parse().expect("parse expires");
            assert!(exp > now, "active scope must exclude expired codes");
        }
    }
}

#[tokio::test]
async fn codes_past7_scope_drops_old_entries() {
    let h = harness();
    let (status, _, bytes) = get(h.app, "/api/codes?scope=past7").await;
    assert_eq!(status, StatusCode::OK);

    let v = parse(&bytes);
    let codes = v["codes"].as_array().expect("codes array");
    assert!(!codes.is_empty());
    for c in codes {
        assert_ne!(c["code"].as_str(), Some("TRAIL-OLDIE-2023"));
    }
}

#[tokio::test]
async fn codes_rejects_unknown_scope_with_envelope() {
    let h = harness();
    let (status, _, bytes) = get(h.app, "/api/codes?scope=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let v = parse(&bytes);
    assert_eq!(v["ok"], json!(false));
    assert_eq!(v["code"], json!("bad_request"));
    assert!(v["message"].is_string());
}

// ---------------------------------------------------------------
// /api/codes/health
// ---------------------------------------------------------------

#[tokio::test]
async fn codes_health_reports_sources_without_error_detail() {
    let h = harness();
    let (status, headers, bytes) = get(h.app, "/api/codes/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("public, s-maxage=60, stale-while-revalidate=600")
    );

    let v = parse(&bytes);
    assert_eq!(v["ok"], json!(true), "sample source alone keeps ok=true");
    assert!(v["totalCodes"].as_u64().expect("totalCodes") > 0);

    let sources = v["sources"].as_object().expect("sources map");
    assert_eq!(sources["sample"]["status"], json!("ok"));
    assert_eq!(
        sources["aggregator-primary"]["status"],
        json!("not_configured")
    );
    // Raw upstream error strings never leave the service.
    for (name, health) in sources {
        assert!(
            health.get("error").is_none(),
            "source {name} must not expose 'error': {health}"
        );
    }
}

// ---------------------------------------------------------------
// /api/codes/report
// ---------------------------------------------------------------

#[tokio::test]
async fn report_without_code_is_rejected() {
    let h = harness();
    let (status, _, bytes) =
        post_json(h.app, "/api/codes/report", json!({ "reason": "expired" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v = parse(&bytes);
    assert_eq!(v["ok"], json!(false));

    let h = harness();
    let (status, _, _) = post_json(h.app, "/api/codes/report", json!({ "code": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_is_acknowledged_and_persisted_as_jsonl() {
    let h = harness();
    let payload = json!({
        "code": "DEAD-CODE-99",
        "reason": "already redeemed",
        "userId": "user-7",
    });
    let (status, _, bytes) = post_json(h.app, "/api/codes/report", payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&bytes)["ok"], json!(true));

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let path = h
        .report_dir
        .path()
        .join(format!("code-reports-{today}.jsonl"));
    let content = std::fs::read_to_string(&path).expect("read report log");
    let line: Json = serde_json::from_str(content.lines().next().expect("one line"))
        .expect("parse report line");
    assert_eq!(line["code"], json!("DEAD-CODE-99"));
    assert_eq!(line["userId"], json!("user-7"));
    assert!(line["reportedAt"].is_string());
}

// ---------------------------------------------------------------
// /api/chat/message
// ---------------------------------------------------------------

fn ndjson_frames(bytes: &[u8]) -> Vec<Json> {
    String::from_utf8(bytes.to_vec())
        .expect("utf8 body")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("parse frame"))
        .collect()
}

#[tokio::test]
async fn chat_rejects_blank_message() {
    let h = harness();
    let (status, _, bytes) =
        post_json(h.app, "/api/chat/message", json!({ "message": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&bytes)["ok"], json!(false));
}

#[tokio::test]
async fn chat_streams_ndjson_chunks_then_complete() {
    let provider = Arc::new(MockChatProvider::scripted(vec![MockOutcome::Chunks(vec![
        "Hello ".into(),
        "snail!".into(),
    ])]));
    let h = harness_with(provider, 100);

    let (status, headers, bytes) =
        post_json(h.app, "/api/chat/message", json!({ "message": "hi" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/x-ndjson")
    );
    assert_eq!(
        headers.get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-store")
    );

    let frames = ndjson_frames(&bytes);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["type"], json!("chunk"));
    assert_eq!(frames[0]["content"], json!("Hello "));
    assert_eq!(frames[1]["content"], json!("snail!"));

    let last = &frames[2];
    assert_eq!(last["type"], json!("complete"));
    assert_eq!(last["message"]["content"], json!("Hello snail!"));
    assert_eq!(last["message"]["role"], json!("assistant"));
    assert!(last["message"]["id"].is_string());
    // Chunk ids match the final message id.
    assert_eq!(frames[0]["id"], last["message"]["id"]);
}

#[tokio::test]
async fn chat_recovers_from_transient_upstream_failures() {
    let provider = Arc::new(MockChatProvider::scripted(vec![
        MockOutcome::Fail(ChatError::Upstream("down".into())),
        MockOutcome::Fail(ChatError::Upstream("still down".into())),
        MockOutcome::Chunks(vec!["recovered".into()]),
    ]));
    let h = harness_with(Arc::clone(&provider) as Arc<dyn ChatProvider>, 100);

    let (status, _, bytes) =
        post_json(h.app, "/api/chat/message", json!({ "message": "hi" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(provider.attempts(), 3);

    let frames = ndjson_frames(&bytes);
    assert!(frames.iter().all(|f| f["type"] != json!("error")));
    assert_eq!(frames.last().expect("frames")["type"], json!("complete"));
}

#[tokio::test]
async fn chat_terminal_failure_is_a_single_error_frame() {
    let provider = Arc::new(MockChatProvider::scripted(vec![MockOutcome::Fail(
        ChatError::Auth,
    )]));
    let h = harness_with(Arc::clone(&provider) as Arc<dyn ChatProvider>, 100);

    // Terminal errors arrive in-band; the HTTP status is already committed.
    let (status, _, bytes) =
        post_json(h.app, "/api/chat/message", json!({ "message": "hi" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(provider.attempts(), 1, "auth errors must not be retried");

    let frames = ndjson_frames(&bytes);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], json!("error"));
    assert_eq!(frames[0]["code"], json!("upstream_auth"));
}

#[tokio::test]
async fn chat_rate_limit_returns_429_with_reset_headers() {
    let h = harness_with(Arc::new(MockChatProvider::echo()), 2);
    let payload = json!({ "message": "hi", "userId": "user-42" });

    for _ in 0..2 {
        let (status, _, _) = post_json(h.app.clone(), "/api/chat/message", payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, bytes) =
        post_json(h.app.clone(), "/api/chat/message", payload.clone()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(parse(&bytes)["code"], json!("rate_limited"));

    let retry_after: u64 = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after header");
    assert!((1..=60).contains(&retry_after));
    assert!(
        headers.get("x-ratelimit-reset").is_some(),
        "missing x-ratelimit-reset"
    );

    // A different caller is counted independently.
    let (status, _, _) = post_json(
        h.app,
        "/api/chat/message",
        json!({ "message": "hi", "userId": "user-43" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
