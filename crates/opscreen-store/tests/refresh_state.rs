use chrono::{Duration, Utc};
use opscreen_store::{RefreshRun, Store};
use std::collections::BTreeMap;
use uuid::Uuid;

fn run(uk_hash: &str, prev: Option<&str>, queued: u64) -> RefreshRun {
    RefreshRun {
        run_id: Uuid::new_v4(),
        ran_at: Utc::now(),
        uk_hash: uk_hash.to_string(),
        prev_uk_hash: prev.map(str::to_string),
        uk_row_count: 10,
        delta_added: 3,
        delta_removed: 1,
        delta_changed: 0,
        candidate_count: queued,
        queued_count: queued,
        reused_count: 0,
        already_pending_count: 0,
        failed_count: 0,
    }
}

#[test]
fn refresh_runs_round_trip_and_order_by_recency() {
    let store = Store::open_in_memory().unwrap();
    let mut first = run("hash-a", None, 2);
    first.ran_at = Utc::now() - Duration::minutes(5);
    let second = run("hash-b", Some("hash-a"), 0);

    store.insert_refresh_run(&first).unwrap();
    store.insert_refresh_run(&second).unwrap();

    let latest = store.latest_refresh_run().unwrap().expect("latest run");
    assert_eq!(latest.uk_hash, "hash-b");
    assert_eq!(latest.prev_uk_hash.as_deref(), Some("hash-a"));

    let by_id = store
        .refresh_run_by_id(first.run_id)
        .unwrap()
        .expect("run by id");
    assert_eq!(by_id.uk_hash, "hash-a");
    assert_eq!(by_id.queued_count, 2);
    assert!(store.refresh_run_by_id(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn uk_state_replacement_is_wholesale() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.load_uk_state().unwrap().is_empty());

    let mut state = BTreeMap::new();
    state.insert("r-a".to_string(), "hash-1".to_string());
    state.insert("r-b".to_string(), "hash-2".to_string());
    store.replace_uk_state(&state).unwrap();
    assert_eq!(store.load_uk_state().unwrap(), state);

    let mut next = BTreeMap::new();
    next.insert("r-b".to_string(), "hash-2-changed".to_string());
    store.replace_uk_state(&next).unwrap();
    let loaded = store.load_uk_state().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.get("r-b").map(String::as_str), Some("hash-2-changed"));
}
