// SPDX-License-Identifier: Apache-2.0
//
// Refresh coordinator: reacts to a newly materialized watchlist snapshot by
// diffing the UK-regime rows and enqueueing targeted re-screen jobs.

use crate::config::DEFAULT_SEARCH_BACKEND;
use crate::dispatch::error_response;
use crate::{client_ip, AppState, AuditEntry, SnapshotLookupError};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use opscreen_model::{CheckReason, ScreeningStatus};
use opscreen_store::{EnqueueOutcome, NewJob, RefreshRun, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tracing::{info, warn};
use uuid::Uuid;

const REFRESH_REQUESTOR: &str = "refresh-coordinator";
const NAME_PREFIX_LEN: usize = 4;

#[derive(Debug)]
pub enum RefreshError {
    SnapshotUnavailable(String),
    Store(StoreError),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SnapshotUnavailable(msg) => write!(f, "snapshot unavailable: {msg}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub run: RefreshRun,
    pub uk_changed: bool,
    pub snapshot_rows: usize,
    pub synced: bool,
}

fn empty_run(
    run_id: Uuid,
    uk_hash: String,
    prev_uk_hash: Option<String>,
    uk_row_count: u64,
) -> RefreshRun {
    RefreshRun {
        run_id,
        ran_at: Utc::now(),
        uk_hash,
        prev_uk_hash,
        uk_row_count,
        delta_added: 0,
        delta_removed: 0,
        delta_changed: 0,
        candidate_count: 0,
        queued_count: 0,
        reused_count: 0,
        already_pending_count: 0,
        failed_count: 0,
    }
}

/// One coordinator run. Serialized process-wide by the refresh advisory
/// lock; re-running against an unchanged snapshot short-circuits on the UK
/// hash and enqueues nothing.
pub async fn run_refresh(
    state: &AppState,
    include_peps: bool,
    sync_store: bool,
) -> Result<RefreshSummary, RefreshError> {
    let _guard = state.refresh_lock.lock().await;

    let snapshot = state
        .snapshots
        .reload(DEFAULT_SEARCH_BACKEND, include_peps)
        .await
        .map_err(|e| match e {
            SnapshotLookupError::UnknownBackend(b) => RefreshError::SnapshotUnavailable(format!(
                "no watchlist path configured for backend {b:?}"
            )),
            SnapshotLookupError::Unavailable(msg) => RefreshError::SnapshotUnavailable(msg),
        })?;
    let uk_hash = snapshot.uk_hash();
    let new_state = snapshot.uk_state();
    let run_id = Uuid::new_v4();

    if state.store.is_none() || !sync_store {
        return Ok(RefreshSummary {
            run: empty_run(run_id, uk_hash, None, new_state.len() as u64),
            uk_changed: false,
            snapshot_rows: snapshot.row_count(),
            synced: false,
        });
    }

    let prev_hash = state
        .with_store(|s| s.latest_refresh_run())
        .await
        .map_err(RefreshError::Store)?
        .map(|r| r.uk_hash);
    if prev_hash.as_deref() == Some(uk_hash.as_str()) {
        info!(uk_hash = %uk_hash, "refresh short-circuit: UK watchlist unchanged");
        let run = empty_run(run_id, uk_hash, prev_hash, new_state.len() as u64);
        let to_insert = run.clone();
        state
            .with_store(move |s| s.insert_refresh_run(&to_insert))
            .await
            .map_err(RefreshError::Store)?;
        return Ok(RefreshSummary {
            run,
            uk_changed: false,
            snapshot_rows: snapshot.row_count(),
            synced: true,
        });
    }

    let prev_state: BTreeMap<String, String> = state
        .with_store(|s| s.load_uk_state())
        .await
        .map_err(RefreshError::Store)?;

    let added: Vec<String> = new_state
        .keys()
        .filter(|id| !prev_state.contains_key(*id))
        .cloned()
        .collect();
    let removed: Vec<String> = prev_state
        .keys()
        .filter(|id| !new_state.contains_key(*id))
        .cloned()
        .collect();
    let changed: Vec<String> = new_state
        .iter()
        .filter(|(id, hash)| prev_state.get(*id).is_some_and(|prev| prev != *hash))
        .map(|(id, _)| id.clone())
        .collect();

    // Candidate heuristic: rows that matched a removed/changed UK subject,
    // plus previously-cleared rows whose name prefix overlaps an addition.
    let gone_or_changed: BTreeSet<&String> = removed.iter().chain(changed.iter()).collect();
    let added_prefixes: BTreeSet<String> = snapshot
        .uk_names_for_ids(&added)
        .into_iter()
        .filter(|n| n.len() >= NAME_PREFIX_LEN)
        .map(|n| n[..NAME_PREFIX_LEN].to_string())
        .collect();

    let now = Utc::now();
    let pool = state
        .with_store(move |s| s.rescreen_candidate_pool(now))
        .await
        .map_err(RefreshError::Store)?;
    let candidates: Vec<_> = pool
        .into_iter()
        .filter(|c| {
            let matched_gone = c
                .matched_row_id
                .as_ref()
                .is_some_and(|id| gone_or_changed.contains(id));
            let cleared_overlap = c.status == ScreeningStatus::Cleared
                && added_prefixes
                    .iter()
                    .any(|p| c.normalized_name.starts_with(p.as_str()));
            matched_gone || cleared_overlap
        })
        .collect();

    let business_reference = format!("refresh:{run_id}");
    let (mut queued, mut already_pending, mut reused, mut failed) = (0_u64, 0_u64, 0_u64, 0_u64);
    for candidate in &candidates {
        let candidate = candidate.clone();
        let business_reference = business_reference.clone();
        let outcome = state
            .with_store(move |s| {
                s.enqueue_job(
                    &NewJob {
                        entity_key: &candidate.entity_key,
                        name: &candidate.display_name,
                        date_of_birth: candidate.date_of_birth.as_deref(),
                        entity_type: candidate.entity_type,
                        requestor: REFRESH_REQUESTOR,
                        reason: CheckReason::PeriodicReScreen,
                        business_reference: &business_reference,
                        refresh_run_id: Some(run_id),
                        force_rescreen: true,
                    },
                    Utc::now(),
                )
            })
            .await;
        match outcome {
            Ok(EnqueueOutcome::Queued(_)) => queued += 1,
            Ok(EnqueueOutcome::AlreadyPending) => already_pending += 1,
            Ok(EnqueueOutcome::Reused) => reused += 1,
            Err(e) => {
                warn!("refresh enqueue failed: {e}");
                failed += 1;
            }
        }
    }

    let run = RefreshRun {
        run_id,
        ran_at: now,
        uk_hash: uk_hash.clone(),
        prev_uk_hash: prev_hash,
        uk_row_count: new_state.len() as u64,
        delta_added: added.len() as u64,
        delta_removed: removed.len() as u64,
        delta_changed: changed.len() as u64,
        candidate_count: candidates.len() as u64,
        queued_count: queued,
        reused_count: reused,
        already_pending_count: already_pending,
        failed_count: failed,
    };
    let to_persist = run.clone();
    state
        .with_store(move |s| {
            s.replace_uk_state(&new_state)?;
            s.insert_refresh_run(&to_persist)
        })
        .await
        .map_err(RefreshError::Store)?;
    info!(
        run_id = %run_id,
        uk_hash = %uk_hash,
        delta_added = run.delta_added,
        delta_removed = run.delta_removed,
        delta_changed = run.delta_changed,
        candidates = run.candidate_count,
        queued = run.queued_count,
        "refresh run complete"
    );
    Ok(RefreshSummary {
        run,
        uk_changed: true,
        snapshot_rows: snapshot.row_count(),
        synced: true,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshBody {
    pub include_peps: Option<bool>,
    pub sync_postgres: Option<bool>,
}

fn refresh_auth(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> Result<(), Response> {
    if let Some(expected) = &state.cfg.internal_api_key {
        let provided = headers
            .get("x-api-key")
            .or_else(|| headers.get("x-internal-screening-key"))
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        if provided != Some(expected.as_str()) {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key",
            ));
        }
        return Ok(());
    }
    if !state.cfg.internal_ip_allowlist.is_empty() {
        let ip = client_ip(headers, peer, &state.cfg);
        if !state.cfg.internal_ip_allowlist.iter().any(|a| a == &ip) {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Client IP not allowed",
            ));
        }
    }
    Ok(())
}

/// `POST /refresh_opensanctions`: reload the snapshot and run the
/// coordinator. The `postgres_*` response keys are a frozen contract with
/// existing callers.
pub(crate) async fn refresh_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RefreshBody>,
) -> Response {
    if let Err(denied) = refresh_auth(&state, &headers, peer) {
        return denied;
    }
    let include_peps = body
        .include_peps
        .unwrap_or(state.cfg.refresh_include_peps_default);
    let sync_store = body.sync_postgres.unwrap_or(true);
    let correlation = state.correlation_id(&headers);

    let summary = match run_refresh(&state, include_peps, sync_store).await {
        Ok(summary) => summary,
        Err(e) => {
            state
                .audit
                .emit(AuditEntry {
                    actor: "operator",
                    action: "watchlist_refresh",
                    entity_key: None,
                    business_reference: None,
                    reason: None,
                    outcome: "failed",
                    correlation_id: Some(&correlation),
                })
                .await;
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response();
        }
    };
    state
        .audit
        .emit(AuditEntry {
            actor: "operator",
            action: "watchlist_refresh",
            entity_key: None,
            business_reference: None,
            reason: None,
            outcome: if summary.uk_changed { "uk_changed" } else { "unchanged" },
            correlation_id: Some(&correlation),
        })
        .await;
    let run = &summary.run;
    Json(json!({
        "status": "ok",
        "postgres_synced": summary.synced,
        "postgres_rows": summary.snapshot_rows,
        "refresh_run": {
            "run_id": run.run_id.to_string(),
            "uk_hash": &run.uk_hash,
            "uk_changed": summary.uk_changed,
            "delta": {
                "added": run.delta_added,
                "removed": run.delta_removed,
                "changed": run.delta_changed,
            },
            "rescreen": {
                "candidates": run.candidate_count,
                "queued": run.queued_count,
                "already_pending": run.already_pending_count,
                "reused": run.reused_count,
                "failed": run.failed_count,
            },
        },
    }))
    .into_response()
}
