// SPDX-License-Identifier: Apache-2.0
//
// Refresh coordinator end-to-end: UK delta detection, targeted re-screen
// enqueueing, idempotent re-runs, and worker pickup of forced jobs.

use opscreen_match::{SourceKind, WatchlistRow};
use opscreen_server::{refresh::run_refresh, worker::worker_tick, AppState, ServiceConfig};
use opscreen_store::Store;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn uk_row(id: &str, name: &str) -> WatchlistRow {
    WatchlistRow {
        id: id.to_string(),
        schema: "Person".to_string(),
        name: name.to_string(),
        aliases: Vec::new(),
        birth_date: None,
        position: None,
        topics: None,
        regime: Some("GB-HMT".to_string()),
        dataset: Some("HM Treasury Consolidated List".to_string()),
        source_type: SourceKind::Sanctions,
    }
}

fn write_snapshot(path: &Path, rows: &[WatchlistRow]) {
    let lines: Vec<String> = rows
        .iter()
        .map(|r| serde_json::to_string(r).expect("serialize row"))
        .collect();
    std::fs::write(path, lines.join("\n")).expect("write snapshot");
}

fn state_with_watchlist(path: PathBuf) -> AppState {
    let cfg = ServiceConfig {
        token_signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
        watchlist_path: Some(path),
        ..ServiceConfig::default()
    };
    let store = Arc::new(Store::open_in_memory().expect("open store"));
    AppState::with_config(cfg, Some(store))
}

#[tokio::test]
async fn refresh_detects_uk_delta_and_requeues_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("watchlist.jsonl");
    write_snapshot(
        &snapshot_path,
        &[uk_row("r-a", "Alexei Morozov"), uk_row("r-b", "Boris Volkov")],
    );
    let state = state_with_watchlist(snapshot_path.clone());

    // First run establishes the baseline: everything is an addition.
    let first = run_refresh(&state, true, true).await.expect("first refresh");
    assert!(first.synced);
    assert_eq!(first.run.delta_added, 2);
    assert_eq!(first.run.delta_removed, 0);
    assert_eq!(first.run.uk_row_count, 2);

    // Re-run with the unchanged snapshot: short-circuit, no new jobs.
    let rerun = run_refresh(&state, true, true).await.expect("rerun");
    assert!(!rerun.uk_changed);
    assert_eq!(rerun.run.queued_count, 0);
    assert_eq!(rerun.run.candidate_count, 0);
    assert_eq!(rerun.run.uk_hash, first.run.uk_hash);

    // Seed a previously-cleared valid evidence row whose name overlaps one
    // of the upcoming additions, then swap the snapshot: three rows added,
    // one removed.
    let (status, report) = {
        let addr = spawn(&state).await;
        post_opcheck(addr, "Dmitri Ivanov").await
    };
    assert_eq!(status, 200);
    assert_eq!(report["Check Summary"]["Status"], "Cleared");

    write_snapshot(
        &snapshot_path,
        &[
            uk_row("r-b", "Boris Volkov"),
            uk_row("r-c", "Carlos Mendez"),
            uk_row("r-d", "Dmitri Ivanov"),
            uk_row("r-e", "Elena Petrova"),
        ],
    );
    let changed = run_refresh(&state, true, true).await.expect("changed refresh");
    assert!(changed.uk_changed);
    assert_eq!(changed.run.delta_added, 3);
    assert_eq!(changed.run.delta_removed, 1);
    assert_eq!(changed.run.delta_changed, 0);
    assert_eq!(changed.run.candidate_count, 1, "the cleared Dmitri row overlaps r-d");
    assert_eq!(
        changed.run.queued_count + changed.run.already_pending_count,
        changed.run.candidate_count,
        "each candidate must be queued or already pending"
    );

    // Idempotence again after the change was absorbed.
    let settled = run_refresh(&state, true, true).await.expect("settled");
    assert!(!settled.uk_changed);
    assert_eq!(settled.run.queued_count, 0);

    // The forced job re-screens against the new snapshot and flips the row.
    assert!(worker_tick(&state).await);
    let key = report["entity_key"].as_str().unwrap().to_string();
    let row = {
        let key = opscreen_model::EntityKey::parse(&key).unwrap();
        state
            .with_store(move |s| s.get_evidence(&key))
            .await
            .unwrap()
            .expect("evidence row")
    };
    assert_eq!(row.status.label(), "Fail Sanction");
    assert!(row.uk_sanctions_flag);
    assert_eq!(
        row.screened_against_uk_hash.as_deref(),
        Some(changed.run.uk_hash.as_str())
    );
    assert_eq!(row.screened_against_refresh_run_id, Some(changed.run.run_id));
}

#[tokio::test]
async fn rescreen_that_changes_status_resets_review() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("watchlist.jsonl");
    write_snapshot(&snapshot_path, &[uk_row("r-x", "Xavier Quinn")]);
    let state = state_with_watchlist(snapshot_path.clone());
    run_refresh(&state, true, true).await.expect("baseline");

    let addr = spawn(&state).await;
    let (status, report) = post_opcheck(addr, "Xavier Quinn").await;
    assert_eq!(status, 200);
    assert_eq!(report["Check Summary"]["Status"], "Fail Sanction");
    let key = opscreen_model::EntityKey::parse(report["entity_key"].as_str().unwrap()).unwrap();

    let claim_key = key.clone();
    state
        .with_store(move |s| s.claim_review(&claim_key, "analyst", chrono::Utc::now()))
        .await
        .expect("claim review");

    // The subject drops off the UK list; the forced re-screen clears them
    // and the in-flight review resets.
    write_snapshot(&snapshot_path, &[uk_row("r-y", "Someone Unrelated")]);
    let changed = run_refresh(&state, true, true).await.expect("refresh");
    assert!(changed.uk_changed);
    assert_eq!(changed.run.candidate_count, 1, "matched row id was removed");
    assert!(worker_tick(&state).await);

    let row = {
        let key = key.clone();
        state
            .with_store(move |s| s.get_evidence(&key))
            .await
            .unwrap()
            .expect("evidence row")
    };
    assert_eq!(row.status.label(), "Cleared");
    assert_eq!(row.review_state.label(), "UNREVIEWED");
    assert!(row.review_claimed_by.is_none());
}

async fn spawn(state: &AppState) -> std::net::SocketAddr {
    let app = opscreen_server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .expect("serve app");
    });
    addr
}

async fn post_opcheck(addr: std::net::SocketAddr, name: &str) -> (u16, serde_json::Value) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let body = json!({
        "name": name,
        "requestor": "RefreshTest",
        "entity_type": "Person",
        "reason_for_check": "Periodic Re-Screen",
        "business_reference": "REFRESH-1",
    })
    .to_string();
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let req = format!(
        "POST /opcheck HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    let (head, payload) = response.split_once("\r\n\r\n").expect("separator");
    let status = head
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status");
    (
        status,
        serde_json::from_str(payload.trim()).unwrap_or(serde_json::Value::Null),
    )
}
