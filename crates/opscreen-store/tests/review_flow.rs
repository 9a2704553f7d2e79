// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use opscreen_model::{
    derive_entity_key, Confidence, EntityKey, EntityKind, ReviewOutcome, ReviewState, RiskLevel,
    ScreeningReport, ScreeningStatus,
};
use opscreen_store::{ScreeningInputs, Store, StoreError, UpsertContext};

fn key() -> EntityKey {
    derive_entity_key("Maria Santos", EntityKind::Person, None).unwrap()
}

fn inputs() -> ScreeningInputs<'static> {
    ScreeningInputs {
        display_name: "Maria Santos",
        date_of_birth: None,
        entity_type: EntityKind::Person,
        requestor: "u1",
    }
}

fn report(status: ScreeningStatus, regime: Option<&str>) -> ScreeningReport {
    let mut r = ScreeningReport::cleared(
        "Consolidated PEP list".to_string(),
        "2026-01-01 00:00:00".to_string(),
        Vec::new(),
    );
    r.check_summary.status = status;
    r.regime = regime.map(str::to_string);
    match status {
        ScreeningStatus::Cleared => {}
        ScreeningStatus::FailPep => {
            r.risk_level = RiskLevel::MediumRisk;
            r.confidence = Confidence::for_decision_score(85);
            r.is_pep = true;
            r.score = 85;
            r.match_found = true;
        }
        ScreeningStatus::FailSanction => {
            r.check_summary.source = "UN".to_string();
            r.risk_level = RiskLevel::HighRisk;
            r.confidence = Confidence::for_decision_score(92);
            r.is_sanctioned = true;
            r.score = 92;
            r.match_found = true;
        }
    }
    r
}

fn seeded(status: ScreeningStatus) -> (Store, EntityKey) {
    let store = Store::open_in_memory().unwrap();
    let k = key();
    store
        .upsert_evidence(&k, &inputs(), &report(status, None), &UpsertContext::default(), 365, Utc::now())
        .unwrap();
    (store, k)
}

#[test]
fn claim_then_complete_walks_the_state_machine() {
    let (store, k) = seeded(ScreeningStatus::FailPep);
    let now = Utc::now();

    let claimed = store.claim_review(&k, "analyst.a", now).unwrap();
    assert_eq!(claimed.review_state, ReviewState::InReview);
    assert_eq!(claimed.review_claimed_by.as_deref(), Some("analyst.a"));
    assert!(claimed.review_claimed_at.is_some());

    let done = store
        .complete_review(
            &k,
            "analyst.a",
            ReviewOutcome::FalsePositiveProceeded,
            "verified against passport",
            now,
        )
        .unwrap();
    assert_eq!(done.review_state, ReviewState::Completed);
    assert_eq!(done.review_outcome, Some(ReviewOutcome::FalsePositiveProceeded));
    assert_eq!(done.review_completed_by.as_deref(), Some("analyst.a"));
}

#[test]
fn transitions_reject_wrong_states() {
    let (store, k) = seeded(ScreeningStatus::FailPep);
    let now = Utc::now();

    // complete before claim
    let err = store
        .complete_review(&k, "a", ReviewOutcome::PendingExternalReview, "ten chars!!", now)
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    store.claim_review(&k, "a", now).unwrap();
    let err = store.claim_review(&k, "b", now).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "double claim must fail");

    store
        .complete_review(&k, "a", ReviewOutcome::ConfirmedMatchEscalated, "escalated to mlro", now)
        .unwrap();
    let err = store.claim_review(&k, "b", now).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "completed rows stay completed");

    assert!(matches!(
        store.claim_review(
            &derive_entity_key("Nobody Here", EntityKind::Person, None).unwrap(),
            "a",
            now
        ),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn short_notes_are_rejected() {
    let (store, k) = seeded(ScreeningStatus::FailPep);
    let now = Utc::now();
    store.claim_review(&k, "a", now).unwrap();

    let err = store
        .complete_review(&k, "a", ReviewOutcome::FalsePositiveProceeded, "short", now)
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));

    // Boundary: exactly ten characters passes.
    store
        .complete_review(&k, "a", ReviewOutcome::FalsePositiveProceeded, "0123456789", now)
        .unwrap();
}

#[test]
fn status_change_resets_review_state() {
    let (store, k) = seeded(ScreeningStatus::FailPep);
    let now = Utc::now();

    store.claim_review(&k, "a", now).unwrap();
    store
        .complete_review(&k, "a", ReviewOutcome::FalsePositiveProceeded, "checked thoroughly", now)
        .unwrap();

    // Re-screen flips the decision: review must reset.
    let rescreened = store
        .upsert_evidence(
            &k,
            &inputs(),
            &report(ScreeningStatus::FailSanction, Some("UN")),
            &UpsertContext::default(),
            365,
            now,
        )
        .unwrap();
    assert_eq!(rescreened.review_state, ReviewState::Unreviewed);
    assert!(rescreened.review_outcome.is_none());
    assert!(rescreened.review_claimed_by.is_none());
}

#[test]
fn routine_refresh_with_same_decision_preserves_review() {
    let (store, k) = seeded(ScreeningStatus::FailPep);
    let now = Utc::now();

    store.claim_review(&k, "a", now).unwrap();
    let refreshed = store
        .upsert_evidence(
            &k,
            &inputs(),
            &report(ScreeningStatus::FailPep, None),
            &UpsertContext::default(),
            365,
            now,
        )
        .unwrap();
    assert_eq!(refreshed.review_state, ReviewState::InReview);
    assert_eq!(refreshed.review_claimed_by.as_deref(), Some("a"));
}

#[test]
fn review_never_mutates_decision_fields() {
    let (store, k) = seeded(ScreeningStatus::FailSanction);
    let now = Utc::now();
    let before = store.get_evidence(&k).unwrap().unwrap();

    store.claim_review(&k, "a", now).unwrap();
    let after = store
        .complete_review(&k, "a", ReviewOutcome::ConfirmedMatchPaymentBlocked, "blocked the payment", now)
        .unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.risk_level, before.risk_level);
    assert_eq!(after.score, before.score);
    assert_eq!(after.report, before.report);
    assert_eq!(after.valid_until, before.valid_until);
}
