// SPDX-License-Identifier: Apache-2.0
//
// Review workflow endpoints: analysts claim a potential match, record a
// structured outcome, or override a row as a false positive. None of these
// paths may touch decision fields.

use crate::dispatch::{error_response, evidence_json, store_error_response};
use crate::{AppState, AuditEntry};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use opscreen_model::{EntityKey, ReviewOutcome};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewClaimBody {
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewCompleteBody {
    pub actor: Option<String>,
    pub outcome: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FalsePositiveBody {
    pub actor: Option<String>,
    pub reason: Option<String>,
}

fn parse_key(raw: &str) -> Result<EntityKey, Response> {
    EntityKey::parse(raw)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, "invalid_entity_key", &e.0))
}

fn required_actor(actor: Option<&str>) -> Result<String, Response> {
    let actor = actor.map(str::trim).unwrap_or_default();
    if actor.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "missing_actor",
            "Please provide 'actor' for the review trail.",
        ));
    }
    Ok(actor.to_string())
}

fn storage_guard(state: &AppState) -> Result<(), Response> {
    if state.store.is_none() {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Review workflow requires persistent storage",
        ));
    }
    Ok(())
}

pub(crate) async fn review_claim_handler(
    State(state): State<AppState>,
    Path(entity_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ReviewClaimBody>,
) -> Response {
    if let Err(resp) = storage_guard(&state) {
        return resp;
    }
    let key = match parse_key(&entity_key) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    let actor = match required_actor(body.actor.as_deref()) {
        Ok(actor) => actor,
        Err(resp) => return resp,
    };
    let claim_key = key.clone();
    let claim_actor = actor.clone();
    let result = state
        .with_store(move |s| s.claim_review(&claim_key, &claim_actor, Utc::now()))
        .await;
    let correlation = state.correlation_id(&headers);
    state
        .audit
        .emit(AuditEntry {
            actor: &actor,
            action: "review_claim",
            entity_key: Some(&key),
            business_reference: None,
            reason: None,
            outcome: if result.is_ok() { "claimed" } else { "rejected" },
            correlation_id: Some(&correlation),
        })
        .await;
    match result {
        Ok(row) => Json(evidence_json(&row)).into_response(),
        Err(e) => store_error_response(&e),
    }
}

pub(crate) async fn review_complete_handler(
    State(state): State<AppState>,
    Path(entity_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ReviewCompleteBody>,
) -> Response {
    if let Err(resp) = storage_guard(&state) {
        return resp;
    }
    let key = match parse_key(&entity_key) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    let actor = match required_actor(body.actor.as_deref()) {
        Ok(actor) => actor,
        Err(resp) => return resp,
    };
    let outcome = match body
        .outcome
        .as_deref()
        .map(ReviewOutcome::parse)
        .transpose()
    {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "missing_outcome",
                "Please provide 'outcome' from the review outcome list.",
            )
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_outcome", &e.0),
    };
    let notes = body.notes.as_deref().map(str::trim).unwrap_or_default();
    if notes.len() < 10 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_notes",
            "Review notes must be at least 10 characters.",
        );
    }
    let complete_key = key.clone();
    let complete_actor = actor.clone();
    let notes = notes.to_string();
    let result = state
        .with_store(move |s| {
            s.complete_review(&complete_key, &complete_actor, outcome, &notes, Utc::now())
        })
        .await;
    let correlation = state.correlation_id(&headers);
    state
        .audit
        .emit(AuditEntry {
            actor: &actor,
            action: "review_complete",
            entity_key: Some(&key),
            business_reference: None,
            reason: None,
            outcome: if result.is_ok() {
                outcome.label()
            } else {
                "rejected"
            },
            correlation_id: Some(&correlation),
        })
        .await;
    match result {
        Ok(row) => Json(evidence_json(&row)).into_response(),
        Err(e) => store_error_response(&e),
    }
}

pub(crate) async fn false_positive_handler(
    State(state): State<AppState>,
    Path(entity_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FalsePositiveBody>,
) -> Response {
    if let Err(resp) = storage_guard(&state) {
        return resp;
    }
    let key = match parse_key(&entity_key) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    let actor = match required_actor(body.actor.as_deref()) {
        Ok(actor) => actor,
        Err(resp) => return resp,
    };
    let reason = body.reason.as_deref().map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_reason",
            "Please provide 'reason' for the false-positive override.",
        );
    }
    let mark_key = key.clone();
    let mark_actor = actor.clone();
    let reason_owned = reason.to_string();
    let result = state
        .with_store(move |s| {
            s.mark_false_positive(&mark_key, &reason_owned, &mark_actor, Utc::now())
        })
        .await;
    let correlation = state.correlation_id(&headers);
    state
        .audit
        .emit(AuditEntry {
            actor: &actor,
            action: "false_positive_override",
            entity_key: Some(&key),
            business_reference: None,
            reason: Some(reason),
            outcome: if result.is_ok() { "marked" } else { "rejected" },
            correlation_id: Some(&correlation),
        })
        .await;
    match result {
        Ok(row) => Json(json!({ "status": "ok", "evidence": evidence_json(&row) })).into_response(),
        Err(e) => store_error_response(&e),
    }
}
