// SPDX-License-Identifier: Apache-2.0
//
// API contract tests against a live server socket, guarding the frozen
// wire shapes shared with integrated applications.

use opscreen_match::{SourceKind, WatchlistRow, WatchlistSnapshot};
use opscreen_server::{build_router, AppState, ServiceConfig};
use opscreen_store::Store;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn sanction_row(id: &str, name: &str, regime: &str, birth_date: Option<&str>) -> WatchlistRow {
    WatchlistRow {
        id: id.to_string(),
        schema: "Person".to_string(),
        name: name.to_string(),
        aliases: Vec::new(),
        birth_date: birth_date.map(str::to_string),
        position: None,
        topics: Some("sanction".to_string()),
        regime: Some(regime.to_string()),
        dataset: None,
        source_type: SourceKind::Sanctions,
    }
}

fn fixture_snapshot() -> WatchlistSnapshot {
    WatchlistSnapshot::from_rows(vec![
        sanction_row("s-orlov", "Viktor Orlov", "UN-SC-2653", None),
        sanction_row("s-smith", "John Smith", "UN-SC-1999", Some("1985-03-15")),
    ])
}

async fn test_state(with_store: bool, tweak: impl FnOnce(&mut ServiceConfig)) -> AppState {
    let mut cfg = ServiceConfig {
        token_signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
        ..ServiceConfig::default()
    };
    tweak(&mut cfg);
    let store = with_store.then(|| Arc::new(Store::open_in_memory().expect("open store")));
    let state = AppState::with_config(cfg, store);
    state
        .snapshots
        .install("opensanctions", fixture_snapshot())
        .await;
    state
}

async fn spawn_app(state: AppState) -> SocketAddr {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve app");
    });
    addr
}

async fn send_raw(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&Value>,
    extra_headers: &[(&str, &str)],
) -> (u16, String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let payload = body.map(Value::to_string).unwrap_or_default();
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    for (key, value) in extra_headers {
        req.push_str(&format!("{key}: {value}\r\n"));
    }
    if body.is_some() {
        req.push_str("Content-Type: application/json\r\n");
    }
    req.push_str(&format!("Content-Length: {}\r\n\r\n{payload}", payload.len()));
    stream.write_all(req.as_bytes()).await.expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, raw_body) = response
        .split_once("\r\n\r\n")
        .expect("http response separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status");
    (status, head.to_string(), raw_body.to_string())
}

async fn post_json(addr: SocketAddr, path: &str, body: Value) -> (u16, Value) {
    let (status, _, text) = send_raw(addr, "POST", path, Some(&body), &[]).await;
    let parsed = serde_json::from_str(text.trim()).unwrap_or(Value::Null);
    (status, parsed)
}

async fn get_json(addr: SocketAddr, path: &str) -> (u16, Value) {
    let (status, _, text) = send_raw(addr, "GET", path, None, &[]).await;
    let parsed = serde_json::from_str(text.trim()).unwrap_or(Value::Null);
    (status, parsed)
}

fn valid_body(name: &str) -> Value {
    json!({
        "name": name,
        "requestor": "ContractTest",
        "entity_type": "Person",
        "reason_for_check": "Client Onboarding",
        "business_reference": "CASE-1",
    })
}

const FROZEN_KEYS: [&str; 13] = [
    "Match Found",
    "Risk Level",
    "Confidence",
    "Score",
    "Top Matches",
    "Check Summary",
    "Is Sanctioned",
    "Is PEP",
    "Sanctions Name",
    "Birth Date",
    "Regime",
    "Position",
    "Topics",
];

#[tokio::test]
async fn health_returns_plain_ok() {
    let addr = spawn_app(test_state(false, |_| {}).await).await;
    let (status, _, body) = send_raw(addr, "GET", "/health", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body.trim(), "ok");
}

#[tokio::test]
async fn opcheck_rejects_missing_fields_with_indicators() {
    let addr = spawn_app(test_state(false, |_| {}).await).await;

    let (status, body) = post_json(
        addr,
        "/opcheck",
        json!({"name": "Test", "entity_type": "Person"}),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase()
        .contains("requestor"));

    let (status, body) = post_json(
        addr,
        "/opcheck",
        json!({"requestor": "Tester", "entity_type": "Person"}),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase()
        .contains("name"));

    let (status, body) = post_json(
        addr,
        "/opcheck",
        json!({
            "name": "Test",
            "requestor": "Tester",
            "reason_for_check": "Curiosity",
            "business_reference": "CASE-1",
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_reason");

    let (status, body) = post_json(
        addr,
        "/opcheck",
        json!({
            "name": "Test",
            "requestor": "Tester",
            "reason_for_check": "Client Onboarding",
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing_business_reference");
}

#[tokio::test]
async fn opcheck_inline_mode_returns_frozen_keys() {
    let addr = spawn_app(test_state(false, |_| {}).await).await;
    let (status, body) = post_json(addr, "/opcheck", valid_body("NonExistentPersonXYZ123")).await;
    assert_eq!(status, 200, "body: {body}");
    for key in FROZEN_KEYS {
        assert!(body.get(key).is_some(), "missing frozen key {key}");
    }
    let summary = &body["Check Summary"];
    for key in ["Status", "Source", "Date"] {
        assert!(summary.get(key).is_some(), "missing summary key {key}");
    }
    assert_eq!(summary["Status"], "Cleared");
    assert_eq!(body["entity_key"].as_str().unwrap_or_default().len(), 64);
}

#[tokio::test]
async fn opcheck_unknown_backend_is_invalid_input() {
    let addr = spawn_app(test_state(false, |_| {}).await).await;
    let mut body = valid_body("Anyone");
    body["search_backend"] = json!("acme-screening");
    let (status, body) = post_json(addr, "/opcheck", body).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_search_backend");
}

#[tokio::test]
async fn opcheck_synchronous_path_persists_evidence() {
    let state = test_state(true, |_| {}).await;
    let addr = spawn_app(state.clone()).await;

    let (status, body) = post_json(addr, "/opcheck", valid_body("Viktor Orlov")).await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["Check Summary"]["Status"], "Fail Sanction");
    assert_eq!(body["Risk Level"], "High Risk");
    assert_eq!(body["Is Sanctioned"], true);

    // Same submission again: a cache hit, not a new screening.
    let (status, cached) = post_json(addr, "/opcheck", valid_body("Viktor Orlov")).await;
    assert_eq!(status, 200);
    assert_eq!(cached["Check Summary"]["Date"], body["Check Summary"]["Date"]);
    let pending = state
        .with_store(|s| s.pending_running_count())
        .await
        .unwrap();
    assert_eq!(pending, 0, "cache reuse must not enqueue work");
}

#[tokio::test]
async fn opcheck_queues_under_load_and_is_idempotent() {
    // sync_threshold 0 forces every miss onto the queue.
    let state = test_state(true, |cfg| cfg.sync_threshold = 0).await;
    let addr = spawn_app(state.clone()).await;

    let (status, body) = post_json(addr, "/opcheck", valid_body("Jane Doe")).await;
    assert_eq!(status, 202, "body: {body}");
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().expect("job_id").to_string();
    assert_eq!(
        body["location"],
        format!("/opcheck/jobs/{job_id}").as_str()
    );

    let (status, body) = post_json(addr, "/opcheck", valid_body("Jane Doe")).await;
    assert_eq!(status, 202);
    assert_eq!(body["status"], "already_pending");
    let pending = state
        .with_store(|s| s.pending_running_count())
        .await
        .unwrap();
    assert_eq!(pending, 1, "exactly one job per fingerprint");

    let (status, job) = get_json(addr, &format!("/opcheck/jobs/{job_id}")).await;
    assert_eq!(status, 200);
    assert_eq!(job["status"], "pending");
    assert!(job.get("result").is_none());
}

#[tokio::test]
async fn worker_completes_queued_job_and_result_is_pollable() {
    let state = test_state(true, |cfg| cfg.sync_threshold = 0).await;
    let addr = spawn_app(state.clone()).await;

    let mut body = valid_body("John Smith");
    body["dob"] = json!("1985-03-15");
    let (status, queued) = post_json(addr, "/opcheck", body).await;
    assert_eq!(status, 202);
    let job_id = queued["job_id"].as_str().expect("job_id").to_string();

    assert!(opscreen_server::worker::worker_tick(&state).await);
    assert!(!opscreen_server::worker::worker_tick(&state).await, "queue drained");

    let (status, job) = get_json(addr, &format!("/opcheck/jobs/{job_id}")).await;
    assert_eq!(status, 200, "body: {job}");
    assert_eq!(job["status"], "completed");
    let result = &job["result"];
    assert_eq!(result["Check Summary"]["Status"], "Fail Sanction");
    assert_eq!(result["Risk Level"], "High Risk");
    assert_eq!(result["Confidence"], "High");
    assert_eq!(result["Score"], 100);

    // uk flag stays false for a UN-regime match.
    let (_, search) = get_json(addr, "/opcheck/search?name=John%20Smith").await;
    assert_eq!(search["results"][0]["uk_sanctions_flag"], false);
    assert_eq!(search["results"][0]["status"], "Fail Sanction");
}

#[tokio::test]
async fn dob_mismatch_clears_but_reports_top_matches() {
    let addr = spawn_app(test_state(false, |_| {}).await).await;
    let mut body = valid_body("John Smith");
    body["dob"] = json!("1970-01-01");
    let (status, report) = post_json(addr, "/opcheck", body).await;
    assert_eq!(status, 200);
    assert_eq!(report["Check Summary"]["Status"], "Cleared");
    assert_eq!(report["Score"], 0);
    let top = report["Top Matches"].as_array().expect("top matches");
    assert!(
        top.iter().any(|m| m[0] == "John Smith"),
        "advisory list must keep the name-only match"
    );
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let state = test_state(false, |cfg| {
        cfg.rate_limit_per_ip.capacity = 1.0;
        cfg.rate_limit_per_ip.refill_per_sec = 0.001;
    })
    .await;
    let addr = spawn_app(state).await;

    let (first, _) = post_json(addr, "/opcheck", valid_body("Anyone")).await;
    assert_eq!(first, 200);
    let (status, head, body) = send_raw(
        addr,
        "POST",
        "/opcheck",
        Some(&valid_body("Anyone")),
        &[],
    )
    .await;
    assert_eq!(status, 429, "body: {body}");
    assert!(
        head.to_lowercase().contains("retry-after"),
        "429 must carry a Retry-After hint"
    );
}

#[tokio::test]
async fn internal_api_disabled_without_credentials() {
    let addr = spawn_app(test_state(true, |_| {}).await).await;
    let (status, body) = post_json(
        addr,
        "/internal/screening/jobs",
        json!({"name": "Jane Doe", "requestor": "batch"}),
    )
    .await;
    assert_eq!(status, 503, "body: {body}");
}

#[tokio::test]
async fn internal_api_enforces_key_and_enqueues() {
    let state = test_state(true, |cfg| {
        cfg.internal_api_key = Some("secret-key".to_string());
        cfg.sync_threshold = 0;
    })
    .await;
    let addr = spawn_app(state).await;

    let item = json!({"name": "Jane Doe", "requestor": "batch"});
    let (status, _, _) = send_raw(
        addr,
        "POST",
        "/internal/screening/jobs",
        Some(&item),
        &[("x-internal-screening-key", "wrong")],
    )
    .await;
    assert_eq!(status, 401);

    let (status, _, text) = send_raw(
        addr,
        "POST",
        "/internal/screening/jobs",
        Some(&item),
        &[("x-internal-screening-key", "secret-key")],
    )
    .await;
    assert_eq!(status, 200);
    let body: Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(body["status"], "queued");
    assert!(body["job_id"].is_string());

    // Bulk: duplicate of the queued entity plus a fresh one.
    let bulk = json!({"requests": [
        {"name": "Jane Doe", "requestor": "batch"},
        {"name": "Someone Else", "requestor": "batch"},
        {"name": "", "requestor": "batch"},
    ]});
    let (status, _, text) = send_raw(
        addr,
        "POST",
        "/internal/screening/jobs/bulk",
        Some(&bulk),
        &[("x-internal-screening-key", "secret-key")],
    )
    .await;
    assert_eq!(status, 200);
    let body: Value = serde_json::from_str(text.trim()).unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["status"], "already_pending");
    assert_eq!(results[1]["status"], "queued");
    assert_eq!(results[2]["status"], "error");
}

#[tokio::test]
async fn review_flow_over_http() {
    let state = test_state(true, |_| {}).await;
    let addr = spawn_app(state.clone()).await;

    // Seed a failing row via the synchronous path.
    let (status, report) = post_json(addr, "/opcheck", valid_body("Viktor Orlov")).await;
    assert_eq!(status, 200);
    let entity_key = report["entity_key"].as_str().expect("entity key").to_string();

    let (status, row) = post_json(
        addr,
        &format!("/opcheck/{entity_key}/review/claim"),
        json!({"actor": "analyst.a"}),
    )
    .await;
    assert_eq!(status, 200, "body: {row}");
    assert_eq!(row["review_state"], "IN_REVIEW");

    let (status, body) = post_json(
        addr,
        &format!("/opcheck/{entity_key}/review/complete"),
        json!({"actor": "analyst.a", "outcome": "False Positive – Proceeded", "notes": "short"}),
    )
    .await;
    assert_eq!(status, 400, "short notes must be rejected: {body}");

    let (status, row) = post_json(
        addr,
        &format!("/opcheck/{entity_key}/review/complete"),
        json!({
            "actor": "analyst.a",
            "outcome": "False Positive – Proceeded",
            "notes": "checked docs and cleared",
        }),
    )
    .await;
    assert_eq!(status, 200, "body: {row}");
    assert_eq!(row["review_state"], "COMPLETED");
    assert_eq!(row["review_outcome"], "False Positive – Proceeded");

    let (status, body) = post_json(
        addr,
        &format!("/opcheck/{entity_key}/false-positive"),
        json!({"actor": "analyst.b", "reason": "customer shares the name only"}),
    )
    .await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["evidence"]["false_positive_override"], true);
    // Decision fields untouched by the override.
    assert_eq!(body["evidence"]["status"], "Fail Sanction");
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let addr = spawn_app(test_state(true, |_| {}).await).await;
    let (status, _) = get_json(addr, "/opcheck/jobs/not-a-uuid").await;
    assert_eq!(status, 404);
    let (status, _) = get_json(
        addr,
        "/opcheck/jobs/00000000-0000-4000-8000-000000000000",
    )
    .await;
    assert_eq!(status, 404);
}
