// SPDX-License-Identifier: Apache-2.0
//
// Background worker: claims one screening job at a time, re-checks the
// cache, runs the matcher, upserts evidence, and marks the job terminal.
// Run one or two instances; correctness does not depend on the count.

use crate::{run_matcher, AppState, AuditEntry, MatcherError};
use chrono::Utc;
use opscreen_model::Transition;
use opscreen_store::{ClaimedJob, ScreeningInputs, UpsertContext};
use tracing::{error, info, warn};

const WORKER_ACTOR: &str = "screening-worker";

/// Process at most one job. Returns whether a job was claimed, so the loop
/// can go straight back for more while the queue is non-empty.
pub async fn worker_tick(state: &AppState) -> bool {
    let claimed = match state.with_store(|s| s.claim_one(Utc::now())).await {
        Ok(Some(job)) => job,
        Ok(None) => return false,
        Err(e) => {
            error!("worker claim failed: {e}");
            return false;
        }
    };
    let job_id = claimed.job_id;
    if let Err(e) = process_claimed(state, claimed).await {
        // Job state is already terminal (or untouchable); log and move on.
        warn!(job_id = %job_id, "worker post-processing conflict: {e}");
    }
    true
}

async fn process_claimed(state: &AppState, job: ClaimedJob) -> Result<(), String> {
    let job_id = job.job_id;
    let correlation = job_id.to_string();
    let previous_status = {
        let key = job.entity_key.clone();
        state
            .with_store(move |s| s.get_evidence(&key))
            .await
            .map_err(|e| e.to_string())?
            .map(|row| row.status)
    };

    // Idempotency re-check: a valid row that appeared since enqueue wins,
    // unless this job explicitly forces a re-screen.
    if !job.force_rescreen {
        let key = job.entity_key.clone();
        let now = Utc::now();
        let valid = state
            .with_store(move |s| s.get_valid_evidence(&key, now))
            .await
            .map_err(|e| e.to_string())?;
        if let Some(existing) = valid {
            let existing_status = existing.report.status();
            let transition = Transition::between(previous_status, existing_status);
            state
                .with_store(move |s| {
                    s.complete_job(
                        job_id,
                        previous_status.map(|s| s.label()),
                        Some(existing_status.label()),
                        transition,
                        Utc::now(),
                    )
                })
                .await
                .map_err(|e| e.to_string())?;
            info!(job_id = %job_id, "job reused existing valid screening");
            state
                .audit
                .emit(AuditEntry {
                    actor: WORKER_ACTOR,
                    action: "job_complete",
                    entity_key: Some(&job.entity_key),
                    business_reference: Some(&job.business_reference),
                    reason: Some(job.reason.label()),
                    outcome: "reused_by_worker",
                    correlation_id: Some(&correlation),
                })
                .await;
            return Ok(());
        }
    }

    info!(job_id = %job_id, name = %truncate_name(&job.name), "job running check");
    let matched = run_matcher(
        state,
        None,
        job.name.clone(),
        job.date_of_birth.clone(),
        job.entity_type,
    )
    .await;
    let outcome = match matched {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = match err {
                MatcherError::UnknownBackend(b) => {
                    format!("watchlist backend {b:?} is not configured")
                }
                MatcherError::Unavailable(m) => m,
            };
            let fail_message = message.clone();
            state
                .with_store(move |s| s.fail_job(job_id, &fail_message, Utc::now()))
                .await
                .map_err(|e| e.to_string())?;
            error!(job_id = %job_id, "job failed: {message}");
            state
                .audit
                .emit(AuditEntry {
                    actor: WORKER_ACTOR,
                    action: "job_complete",
                    entity_key: Some(&job.entity_key),
                    business_reference: Some(&job.business_reference),
                    reason: Some(job.reason.label()),
                    outcome: "failed",
                    correlation_id: Some(&correlation),
                })
                .await;
            return Ok(());
        }
    };

    // Stamp which watchlist state this screening ran against.
    let run_context = {
        let refresh_run_id = job.refresh_run_id;
        state
            .with_store(move |s| match refresh_run_id {
                Some(id) => s.refresh_run_by_id(id),
                None => s.latest_refresh_run(),
            })
            .await
            .unwrap_or_default()
    };

    let result_status = outcome.report.status();
    let transition = Transition::between(previous_status, result_status);
    let validity_days = state.cfg.validity_days;
    let persist_job = job.clone();
    let report = outcome.report.clone();
    let matched_row_id = outcome.matched_row_id.clone();
    let persisted = state
        .with_store(move |s| {
            s.upsert_evidence(
                &persist_job.entity_key,
                &ScreeningInputs {
                    display_name: &persist_job.name,
                    date_of_birth: persist_job.date_of_birth.as_deref(),
                    entity_type: persist_job.entity_type,
                    requestor: &persist_job.requestor,
                },
                &report,
                &UpsertContext {
                    matched_row_id: matched_row_id.as_deref(),
                    force_rescreen: persist_job.force_rescreen,
                    screened_against_uk_hash: run_context.as_ref().map(|r| r.uk_hash.as_str()),
                    screened_against_refresh_run_id: run_context.as_ref().map(|r| r.run_id),
                },
                validity_days,
                Utc::now(),
            )?;
            s.complete_job(
                job_id,
                previous_status.map(|s| s.label()),
                Some(result_status.label()),
                transition,
                Utc::now(),
            )
        })
        .await;
    if let Err(e) = persisted {
        let message = e.to_string();
        let fail_message = message.clone();
        let _ = state
            .with_store(move |s| s.fail_job(job_id, &fail_message, Utc::now()))
            .await;
        error!(job_id = %job_id, "job persistence failed: {message}");
        return Err(message);
    }
    info!(
        job_id = %job_id,
        reason = job.reason.label(),
        transition = transition.label(),
        "job completed"
    );
    state
        .audit
        .emit(AuditEntry {
            actor: WORKER_ACTOR,
            action: "job_complete",
            entity_key: Some(&job.entity_key),
            business_reference: Some(&job.business_reference),
            reason: Some(job.reason.label()),
            outcome: transition.label(),
            correlation_id: Some(&correlation),
        })
        .await;
    Ok(())
}

fn truncate_name(name: &str) -> String {
    name.chars().take(50).collect()
}

/// Retention sweep; runs every `CleanupEveryNLoops` iterations.
pub async fn run_cleanup(state: &AppState) {
    let retention_days = state.cfg.job_retention_days;
    let purged = state
        .with_store(move |s| s.purge_terminal_jobs_older_than(retention_days, Utc::now()))
        .await;
    match purged {
        Ok(0) => {}
        Ok(n) => info!("queue cleanup deleted {n} old job(s)"),
        Err(e) => warn!("queue cleanup failed: {e}"),
    }
    if let Some(months) = state.cfg.evidence_retention_months {
        let purged = state
            .with_store(move |s| s.purge_evidence_older_than(months, Utc::now()))
            .await;
        match purged {
            Ok(0) => {}
            Ok(n) => info!("evidence retention deleted {n} old row(s)"),
            Err(e) => warn!("evidence retention failed: {e}"),
        }
    }
}

/// The worker loop proper: claim, process, sleep when idle, sweep
/// periodically. Safe to run in parallel at any instance count.
pub async fn run_worker_loop(state: AppState, worker_id: usize) {
    info!(
        worker_id,
        poll_seconds = state.cfg.worker_poll.as_secs(),
        retention_days = state.cfg.job_retention_days,
        cleanup_every = state.cfg.cleanup_every_n_loops,
        "worker started"
    );
    let mut loop_count: u64 = 0;
    loop {
        let worked = worker_tick(&state).await;
        if !worked {
            tokio::time::sleep(state.cfg.worker_poll).await;
        }
        loop_count += 1;
        if loop_count >= state.cfg.cleanup_every_n_loops {
            loop_count = 0;
            run_cleanup(&state).await;
        }
    }
}

/// Spawn the configured number of worker tasks alongside the server.
pub fn spawn_workers(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    if state.store.is_none() {
        return Vec::new();
    }
    (0..state.cfg.worker_count)
        .map(|worker_id| {
            let state = state.clone();
            tokio::spawn(run_worker_loop(state, worker_id))
        })
        .collect()
}
