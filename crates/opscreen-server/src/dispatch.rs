// SPDX-License-Identifier: Apache-2.0

use crate::{client_ip, run_matcher, AppState, AuditEntry, MatcherError};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use opscreen_model::{derive_entity_key, CheckReason, EntityKey, EntityKind, ScreeningReport};
use opscreen_store::{
    format_ts, EnqueueOutcome, EvidenceRow, NewJob, ScreeningInputs, StoreError, UpsertContext,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::info;
use uuid::Uuid;

pub(crate) fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

pub(crate) fn store_error_response(err: &StoreError) -> Response {
    match err {
        StoreError::Invalid(msg) => error_response(StatusCode::BAD_REQUEST, "invalid_input", msg),
        StoreError::NotFound => {
            error_response(StatusCode::NOT_FOUND, "not_found", "resource not found")
        }
        StoreError::Conflict(msg) => error_response(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Unavailable(msg) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpCheckBody {
    pub name: Option<String>,
    pub dob: Option<String>,
    pub entity_type: Option<String>,
    pub requestor: Option<String>,
    pub reason_for_check: Option<String>,
    pub business_reference: Option<String>,
    pub search_backend: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ScreenRequest {
    pub name: String,
    pub dob: Option<String>,
    pub entity_type: EntityKind,
    pub requestor: String,
    pub reason: CheckReason,
    pub business_reference: String,
    pub search_backend: Option<String>,
}

/// What the dispatch path decided for one screening request.
pub enum ScreenOutcome {
    /// Matcher ran inside this request (inline mode or low queue pressure).
    Synchronous(Box<ScreeningReport>),
    /// A valid evidence row answered the request without a matcher run.
    Cached(Box<ScreeningReport>),
    Queued(Uuid),
    AlreadyPending,
    Reused,
}

pub(crate) enum ScreenFailure {
    Matcher(MatcherError),
    Store(StoreError),
}

pub(crate) fn validate_screen_body(
    body: &OpCheckBody,
) -> Result<ScreenRequest, (&'static str, String)> {
    let requestor = body.requestor.as_deref().map(str::trim).unwrap_or_default();
    if requestor.is_empty() {
        return Err((
            "missing_requestor",
            "Please provide 'requestor' (your name) to run a check.".to_string(),
        ));
    }
    let name = body.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err((
            "missing_name",
            "Please provide 'name' to run a check.".to_string(),
        ));
    }
    let entity_type = EntityKind::parse(body.entity_type.as_deref().unwrap_or_default())
        .map_err(|e| ("invalid_entity_type", e.0))?;
    let reason_raw = body
        .reason_for_check
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if reason_raw.is_empty() {
        return Err((
            "missing_reason",
            "Please provide 'reason_for_check' from the approved list.".to_string(),
        ));
    }
    let reason = CheckReason::parse(reason_raw).map_err(|e| ("invalid_reason", e.0))?;
    let business_reference = body
        .business_reference
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if business_reference.is_empty() {
        return Err((
            "missing_business_reference",
            "Please provide 'business_reference' for the audit trail.".to_string(),
        ));
    }
    Ok(ScreenRequest {
        name: name.to_string(),
        dob: body
            .dob
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        entity_type,
        requestor: requestor.to_string(),
        reason,
        business_reference: business_reference.to_string(),
        search_backend: body
            .search_backend
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

async fn run_and_persist(
    state: &AppState,
    request: &ScreenRequest,
    key: &EntityKey,
) -> Result<ScreenOutcome, ScreenFailure> {
    let outcome = run_matcher(
        state,
        request.search_backend.as_deref(),
        request.name.clone(),
        request.dob.clone(),
        request.entity_type,
    )
    .await
    .map_err(ScreenFailure::Matcher)?;
    if state.store.is_some() {
        let upsert_key = key.clone();
        let request = request.clone();
        let report = outcome.report.clone();
        let matched_row_id = outcome.matched_row_id.clone();
        let validity_days = state.cfg.validity_days;
        state
            .with_store(move |s| {
                s.upsert_evidence(
                    &upsert_key,
                    &ScreeningInputs {
                        display_name: &request.name,
                        date_of_birth: request.dob.as_deref(),
                        entity_type: request.entity_type,
                        requestor: &request.requestor,
                    },
                    &report,
                    &UpsertContext {
                        matched_row_id: matched_row_id.as_deref(),
                        ..UpsertContext::default()
                    },
                    validity_days,
                    Utc::now(),
                )
            })
            .await
            // Persistence was requested; never silently answer unpersisted.
            .map_err(ScreenFailure::Store)?;
    }
    Ok(ScreenOutcome::Synchronous(Box::new(outcome.report)))
}

/// The dispatch decision: cached first, then sync-vs-queue by pressure.
pub(crate) async fn screen_flow(
    state: &AppState,
    request: &ScreenRequest,
    key: &EntityKey,
) -> Result<ScreenOutcome, ScreenFailure> {
    if state.store.is_none() {
        return run_and_persist(state, request, key).await;
    }

    // Reuse always wins, regardless of load.
    let now = Utc::now();
    let lookup_key = key.clone();
    let cached = state
        .with_store(move |s| s.get_valid_evidence(&lookup_key, now))
        .await
        .map_err(ScreenFailure::Store)?;
    if let Some(row) = cached {
        info!(entity_key = key.short(), "screening reused (valid)");
        return Ok(ScreenOutcome::Cached(Box::new(row.report)));
    }

    let pressure = state
        .with_store(|s| s.pending_running_count())
        .await
        .map_err(ScreenFailure::Store)?;
    if state.cfg.sync_enabled && pressure < state.cfg.sync_threshold {
        info!(
            entity_key = key.short(),
            queue_depth = pressure,
            threshold = state.cfg.sync_threshold,
            "synchronous screening chosen"
        );
        return run_and_persist(state, request, key).await;
    }

    let enqueue_key = key.clone();
    let request_for_job = request.clone();
    let enqueued = state
        .with_store(move |s| {
            s.enqueue_job(
                &NewJob {
                    entity_key: &enqueue_key,
                    name: &request_for_job.name,
                    date_of_birth: request_for_job.dob.as_deref(),
                    entity_type: request_for_job.entity_type,
                    requestor: &request_for_job.requestor,
                    reason: request_for_job.reason,
                    business_reference: &request_for_job.business_reference,
                    refresh_run_id: None,
                    force_rescreen: false,
                },
                Utc::now(),
            )
        })
        .await
        .map_err(ScreenFailure::Store)?;
    match enqueued {
        EnqueueOutcome::Queued(job_id) => {
            info!(
                entity_key = key.short(),
                job_id = %job_id,
                queue_depth = pressure,
                "screening queued due to load"
            );
            Ok(ScreenOutcome::Queued(job_id))
        }
        EnqueueOutcome::AlreadyPending => Ok(ScreenOutcome::AlreadyPending),
        EnqueueOutcome::Reused => Ok(ScreenOutcome::Reused),
    }
}

fn report_response(mut report: ScreeningReport, key: &EntityKey) -> Response {
    report.entity_key = Some(key.clone());
    Json(report).into_response()
}

fn queued_response(job_id: Uuid) -> Response {
    let location = format!("/opcheck/jobs/{job_id}");
    let mut response = (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "queued",
            "job_id": job_id.to_string(),
            "location": &location,
            "message": "Screening queued (load protection). Poll GET /opcheck/jobs/{job_id} for outcome.",
        })),
    )
        .into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&location) {
        response
            .headers_mut()
            .insert(axum::http::header::LOCATION, value);
    }
    response
}

fn deferred_response(status: &str, message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": status, "message": message })),
    )
        .into_response()
}

fn matcher_error_response(err: &MatcherError) -> Response {
    match err {
        MatcherError::UnknownBackend(backend) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_search_backend",
            &format!("unknown search backend {backend:?}"),
        ),
        MatcherError::Unavailable(msg) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "matcher_unavailable", msg)
        }
    }
}

/// Screen an entity: reuse a valid evidence row first; otherwise run inline
/// while queue pressure is low, else enqueue a background job.
pub(crate) async fn opcheck_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OpCheckBody>,
) -> Response {
    let correlation = state.correlation_id(&headers);
    let ip = client_ip(&headers, peer, &state.cfg);
    if !state
        .ip_limiter
        .allow(&ip, &state.cfg.rate_limit_per_ip)
        .await
    {
        let hint = crate::RateLimiter::retry_after_hint(&state.cfg.rate_limit_per_ip);
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many screening requests from this address.",
        );
        if let Ok(value) = axum::http::HeaderValue::from_str(&hint.to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
        return response;
    }

    let request = match validate_screen_body(&body) {
        Ok(request) => request,
        Err((code, message)) => {
            state
                .audit
                .emit(AuditEntry {
                    actor: body.requestor.as_deref().unwrap_or("anonymous"),
                    action: "screen",
                    entity_key: None,
                    business_reference: body.business_reference.as_deref(),
                    reason: body.reason_for_check.as_deref(),
                    outcome: "rejected",
                    correlation_id: Some(&correlation),
                })
                .await;
            return error_response(StatusCode::BAD_REQUEST, code, &message);
        }
    };
    let key = match derive_entity_key(&request.name, request.entity_type, request.dob.as_deref()) {
        Ok(key) => key,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_name", &e.0),
    };

    let result = screen_flow(&state, &request, &key).await;
    let audit_outcome = match &result {
        Ok(ScreenOutcome::Synchronous(_)) => "synchronous",
        Ok(ScreenOutcome::Cached(_) | ScreenOutcome::Reused) => "cached",
        Ok(ScreenOutcome::Queued(_) | ScreenOutcome::AlreadyPending) => "queued",
        Err(_) => "rejected",
    };
    state
        .audit
        .emit(AuditEntry {
            actor: &request.requestor,
            action: "screen",
            entity_key: Some(&key),
            business_reference: Some(&request.business_reference),
            reason: Some(request.reason.label()),
            outcome: audit_outcome,
            correlation_id: Some(&correlation),
        })
        .await;
    match result {
        Ok(ScreenOutcome::Synchronous(report) | ScreenOutcome::Cached(report)) => {
            report_response(*report, &key)
        }
        Ok(ScreenOutcome::Queued(job_id)) => queued_response(job_id),
        Ok(ScreenOutcome::AlreadyPending) => deferred_response(
            "already_pending",
            "A screening job for this entity is already in progress.",
        ),
        Ok(ScreenOutcome::Reused) => deferred_response(
            "reused",
            "A valid screening for this entity already exists.",
        ),
        Err(ScreenFailure::Matcher(err)) => matcher_error_response(&err),
        Err(ScreenFailure::Store(err)) => store_error_response(&err),
    }
}

/// Job polling endpoint; completed jobs include the evidence result.
pub(crate) async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(job_id) = Uuid::parse_str(job_id.trim()) else {
        return error_response(StatusCode::NOT_FOUND, "not_found", "Job not found");
    };
    if state.store.is_none() {
        return error_response(StatusCode::NOT_FOUND, "not_found", "Job not found");
    }
    match state.with_store(move |s| s.job_status(job_id)).await {
        Ok(Some(view)) => {
            let mut payload = json!({
                "status": view.state.as_str(),
                "job_id": view.job_id.to_string(),
                "entity_key": view.entity_key.as_str(),
            });
            if let Some(error_message) = view.error_message {
                payload["error_message"] = Value::String(error_message);
            }
            if let Some(result) = view.result {
                payload["result"] = serde_json::to_value(result).unwrap_or(Value::Null);
            }
            Json(payload).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not_found", "Job not found"),
        Err(e) => store_error_response(&e),
    }
}

pub(crate) fn evidence_json(row: &EvidenceRow) -> Value {
    json!({
        "entity_key": row.entity_key.as_str(),
        "display_name": &row.display_name,
        "normalized_name": &row.normalized_name,
        "date_of_birth": &row.date_of_birth,
        "entity_type": row.entity_type.as_str(),
        "last_screened_at": format_ts(row.last_screened_at),
        "screening_valid_until": format_ts(row.valid_until),
        "status": row.status.label(),
        "risk_level": row.risk_level.label(),
        "confidence": row.confidence.label(),
        "score": row.score,
        "uk_sanctions_flag": row.uk_sanctions_flag,
        "pep_flag": row.pep_flag,
        "last_requestor": &row.last_requestor,
        "updated_at": format_ts(row.updated_at),
        "review_state": row.review_state.label(),
        "review_claimed_by": &row.review_claimed_by,
        "review_claimed_at": row.review_claimed_at.map(format_ts),
        "review_completed_by": &row.review_completed_by,
        "review_completed_at": row.review_completed_at.map(format_ts),
        "review_outcome": row.review_outcome.map(|o| o.label()),
        "review_notes": &row.review_notes,
        "false_positive_override": row.false_positive_override,
        "false_positive_reason": &row.false_positive_reason,
        "result": &row.report,
    })
}

/// Bounded evidence search over display/normalized names or an exact key.
pub(crate) async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if state.store.is_none() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Search requires persistent storage",
        );
    }
    let name = params.get("name").cloned();
    let entity_key = match params.get("entity_key").map(|raw| EntityKey::parse(raw)) {
        None => None,
        Some(Ok(key)) => Some(key),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, "invalid_entity_key", &e.0),
    };
    if entity_key.is_none() && name.as_deref().map(str::trim).unwrap_or_default().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_criteria",
            "Provide 'name' and/or 'entity_key' to search.",
        );
    }
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let correlation = state.correlation_id(&headers);
    let rows = match state
        .with_store(move |s| s.search_evidence(name.as_deref(), entity_key.as_ref(), limit, offset))
        .await
    {
        Ok(rows) => rows,
        Err(e) => return store_error_response(&e),
    };
    state
        .audit
        .emit(AuditEntry {
            actor: "operator",
            action: "evidence_search",
            entity_key: None,
            business_reference: None,
            reason: None,
            outcome: "ok",
            correlation_id: Some(&correlation),
        })
        .await;
    Json(json!({ "results": rows.iter().map(evidence_json).collect::<Vec<_>>() })).into_response()
}
