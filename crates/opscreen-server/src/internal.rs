// SPDX-License-Identifier: Apache-2.0
//
// Internal queue-ingestion API: enqueue only, never runs a screening and
// never returns screening results.

use crate::dispatch::error_response;
use crate::{client_ip, AppState, AuditEntry};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use opscreen_model::{derive_entity_key, CheckReason, EntityKind};
use opscreen_store::{EnqueueOutcome, NewJob};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::info;

const BULK_MAX_ITEMS: usize = 500;

#[derive(Debug, Deserialize)]
pub(crate) struct InternalScreeningItem {
    pub name: Option<String>,
    pub dob: Option<String>,
    pub entity_type: Option<String>,
    pub requestor: Option<String>,
    pub reason_for_check: Option<String>,
    pub business_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InternalBulkBody {
    pub requests: Vec<InternalScreeningItem>,
}

/// Require the internal API key and/or IP allowlist; with neither
/// configured the surface is disabled outright.
pub(crate) fn require_internal_auth(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Result<(), Response> {
    let key_configured = state.cfg.internal_api_key.is_some();
    let allowlist_configured = !state.cfg.internal_ip_allowlist.is_empty();
    if !key_configured && !allowlist_configured {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "disabled",
            "Internal screening API is disabled (no API key or IP allowlist configured)",
        ));
    }
    if let Some(expected) = &state.cfg.internal_api_key {
        let provided = headers
            .get("x-internal-screening-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::trim)
                    .map(str::to_string)
            });
        if provided.as_deref() != Some(expected.as_str()) {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key",
            ));
        }
    }
    if allowlist_configured {
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

/// One entity: validate, then reused | already_pending | queued.
async fn internal_outcome(state: &AppState, item: &InternalScreeningItem) -> Value {
    let name = item.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return json!({ "status": "error", "error": "missing_name" });
    }
    let requestor = item.requestor.as_deref().map(str::trim).unwrap_or_default();
    if requestor.is_empty() {
        return json!({ "status": "error", "error": "missing_requestor" });
    }
    let entity_type = match EntityKind::parse(item.entity_type.as_deref().unwrap_or_default()) {
        Ok(kind) => kind,
        Err(_) => return json!({ "status": "error", "error": "invalid_entity_type" }),
    };
    let reason = match item.reason_for_check.as_deref().map(str::trim) {
        None | Some("") => CheckReason::AdHocComplianceReview,
        Some(raw) => match CheckReason::parse(raw) {
            Ok(reason) => reason,
            Err(_) => return json!({ "status": "error", "error": "invalid_reason" }),
        },
    };
    let dob = item
        .dob
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let key = match derive_entity_key(name, entity_type, dob.as_deref()) {
        Ok(key) => key,
        Err(_) => return json!({ "status": "error", "error": "invalid_name" }),
    };

    let name = name.to_string();
    let requestor = requestor.to_string();
    let business_reference = item
        .business_reference
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let enqueued = state
        .with_store(move |s| {
            s.enqueue_job(
                &NewJob {
                    entity_key: &key,
                    name: &name,
                    date_of_birth: dob.as_deref(),
                    entity_type,
                    requestor: &requestor,
                    reason,
                    business_reference: &business_reference,
                    refresh_run_id: None,
                    force_rescreen: false,
                },
                Utc::now(),
            )
        })
        .await;
    match enqueued {
        Ok(EnqueueOutcome::Reused) => json!({ "status": "reused" }),
        Ok(EnqueueOutcome::AlreadyPending) => json!({ "status": "already_pending" }),
        Ok(EnqueueOutcome::Queued(job_id)) => {
            json!({ "status": "queued", "job_id": job_id.to_string() })
        }
        Err(e) => json!({ "status": "error", "error": e.to_string() }),
    }
}

pub(crate) async fn internal_jobs_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(item): Json<InternalScreeningItem>,
) -> Response {
    if let Err(denied) = require_internal_auth(&state, &headers, peer) {
        return denied;
    }
    if state.store.is_none() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Screening queue requires persistent storage",
        );
    }
    let outcome = internal_outcome(&state, &item).await;
    if outcome["status"] == "error" {
        return error_response(
            StatusCode::BAD_REQUEST,
            outcome["error"].as_str().unwrap_or("validation_error"),
            "validation error",
        );
    }
    let correlation = state.correlation_id(&headers);
    info!(
        status = outcome["status"].as_str().unwrap_or_default(),
        job_id = outcome["job_id"].as_str().unwrap_or_default(),
        "internal screening"
    );
    state
        .audit
        .emit(AuditEntry {
            actor: item.requestor.as_deref().unwrap_or("internal"),
            action: "internal_enqueue",
            entity_key: None,
            business_reference: item.business_reference.as_deref(),
            reason: item.reason_for_check.as_deref(),
            outcome: outcome["status"].as_str().unwrap_or_default(),
            correlation_id: Some(&correlation),
        })
        .await;
    Json(outcome).into_response()
}

pub(crate) async fn internal_jobs_bulk_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<InternalBulkBody>,
) -> Response {
    if let Err(denied) = require_internal_auth(&state, &headers, peer) {
        return denied;
    }
    if state.store.is_none() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Screening queue requires persistent storage",
        );
    }
    if body.requests.len() > BULK_MAX_ITEMS {
        return error_response(
            StatusCode::BAD_REQUEST,
            "too_many_items",
            &format!("Bulk requests are capped at {BULK_MAX_ITEMS} items"),
        );
    }
    let mut results = Vec::with_capacity(body.requests.len());
    let mut counts = [0_u64; 4]; // reused, already_pending, queued, error
    for item in &body.requests {
        let outcome = internal_outcome(&state, item).await;
        match outcome["status"].as_str() {
            Some("reused") => counts[0] += 1,
            Some("already_pending") => counts[1] += 1,
            Some("queued") => counts[2] += 1,
            _ => counts[3] += 1,
        }
        results.push(outcome);
    }
    info!(
        total = results.len(),
        reused = counts[0],
        already_pending = counts[1],
        queued = counts[2],
        errors = counts[3],
        "internal screening bulk"
    );
    let correlation = state.correlation_id(&headers);
    state
        .audit
        .emit(AuditEntry {
            actor: "internal",
            action: "internal_enqueue_bulk",
            entity_key: None,
            business_reference: None,
            reason: None,
            outcome: &format!(
                "queued={} already_pending={} reused={} errors={}",
                counts[2], counts[1], counts[0], counts[3]
            ),
            correlation_id: Some(&correlation),
        })
        .await;
    Json(json!({ "results": results })).into_response()
}
