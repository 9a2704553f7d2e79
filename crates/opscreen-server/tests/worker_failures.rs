// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use opscreen_model::{derive_entity_key, CheckReason, EntityKind};
use opscreen_server::{worker::worker_tick, AppState, ServiceConfig};
use opscreen_store::{EnqueueOutcome, JobState, NewJob, Store};
use std::sync::Arc;

#[tokio::test]
async fn matcher_unavailable_fails_the_job_instead_of_retrying() {
    // No watchlist snapshot configured anywhere: the matcher cannot open a
    // read handle, so the claimed job must land in `failed`.
    let cfg = ServiceConfig {
        token_signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
        ..ServiceConfig::default()
    };
    let state = AppState::with_config(cfg, Some(Arc::new(Store::open_in_memory().unwrap())));

    let key = derive_entity_key("Jane Doe", EntityKind::Person, None).unwrap();
    let enqueue_key = key.clone();
    let outcome = state
        .with_store(move |s| {
            s.enqueue_job(
                &NewJob {
                    entity_key: &enqueue_key,
                    name: "Jane Doe",
                    date_of_birth: None,
                    entity_type: EntityKind::Person,
                    requestor: "u1",
                    reason: CheckReason::ClientOnboarding,
                    business_reference: "CASE-1",
                    refresh_run_id: None,
                    force_rescreen: false,
                },
                Utc::now(),
            )
        })
        .await
        .unwrap();
    let EnqueueOutcome::Queued(job_id) = outcome else {
        panic!("expected Queued, got {outcome:?}");
    };

    assert!(worker_tick(&state).await, "the job must still be claimed");

    let status = state
        .with_store(move |s| s.job_status(job_id))
        .await
        .unwrap()
        .expect("job status");
    assert_eq!(status.state, JobState::Failed);
    let message = status.error_message.expect("failure message");
    assert!(message.contains("not configured"), "got: {message}");
    assert!(message.chars().count() <= 500);

    // The failure is terminal: nothing is silently retried.
    assert!(!worker_tick(&state).await);
    assert_eq!(
        state.with_store(|s| s.pending_running_count()).await.unwrap(),
        0
    );
}
