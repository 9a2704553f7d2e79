// SPDX-License-Identifier: Apache-2.0

use crate::{format_ts, parse_ts, Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Operator-facing summary of one refresh/rescreen coordination run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRun {
    pub run_id: Uuid,
    pub ran_at: DateTime<Utc>,
    pub uk_hash: String,
    pub prev_uk_hash: Option<String>,
    pub uk_row_count: u64,
    pub delta_added: u64,
    pub delta_removed: u64,
    pub delta_changed: u64,
    pub candidate_count: u64,
    pub queued_count: u64,
    pub reused_count: u64,
    pub already_pending_count: u64,
    pub failed_count: u64,
}

fn read_run(r: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, RefreshRunRaw)> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        RefreshRunRaw {
            uk_hash: r.get(2)?,
            prev_uk_hash: r.get(3)?,
            uk_row_count: r.get(4)?,
            delta_added: r.get(5)?,
            delta_removed: r.get(6)?,
            delta_changed: r.get(7)?,
            candidate_count: r.get(8)?,
            queued_count: r.get(9)?,
            reused_count: r.get(10)?,
            already_pending_count: r.get(11)?,
            failed_count: r.get(12)?,
        },
    ))
}

struct RefreshRunRaw {
    uk_hash: String,
    prev_uk_hash: Option<String>,
    uk_row_count: i64,
    delta_added: i64,
    delta_removed: i64,
    delta_changed: i64,
    candidate_count: i64,
    queued_count: i64,
    reused_count: i64,
    already_pending_count: i64,
    failed_count: i64,
}

fn into_run(run_id: String, ran_at: String, raw: RefreshRunRaw) -> Result<RefreshRun, StoreError> {
    let unsigned = |n: i64| n.max(0) as u64;
    Ok(RefreshRun {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| StoreError::Unavailable(format!("corrupt run_id: {e}")))?,
        ran_at: parse_ts(&ran_at)?,
        uk_hash: raw.uk_hash,
        prev_uk_hash: raw.prev_uk_hash,
        uk_row_count: unsigned(raw.uk_row_count),
        delta_added: unsigned(raw.delta_added),
        delta_removed: unsigned(raw.delta_removed),
        delta_changed: unsigned(raw.delta_changed),
        candidate_count: unsigned(raw.candidate_count),
        queued_count: unsigned(raw.queued_count),
        reused_count: unsigned(raw.reused_count),
        already_pending_count: unsigned(raw.already_pending_count),
        failed_count: unsigned(raw.failed_count),
    })
}

const RUN_COLUMNS: &str = "run_id, ran_at, uk_hash, prev_uk_hash, uk_row_count, delta_added, \
     delta_removed, delta_changed, candidate_count, queued_count, reused_count, \
     already_pending_count, failed_count";

impl Store {
    pub fn insert_refresh_run(&self, run: &RefreshRun) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_runs (
                    run_id, ran_at, uk_hash, prev_uk_hash, uk_row_count,
                    delta_added, delta_removed, delta_changed,
                    candidate_count, queued_count, reused_count,
                    already_pending_count, failed_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run.run_id.to_string(),
                    format_ts(run.ran_at),
                    run.uk_hash,
                    run.prev_uk_hash,
                    run.uk_row_count as i64,
                    run.delta_added as i64,
                    run.delta_removed as i64,
                    run.delta_changed as i64,
                    run.candidate_count as i64,
                    run.queued_count as i64,
                    run.reused_count as i64,
                    run.already_pending_count as i64,
                    run.failed_count as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn latest_refresh_run(&self) -> Result<Option<RefreshRun>, StoreError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {RUN_COLUMNS} FROM refresh_runs ORDER BY ran_at DESC LIMIT 1"
                    ),
                    [],
                    read_run,
                )
                .optional()?;
            raw.map(|(id, at, r)| into_run(id, at, r)).transpose()
        })
    }

    pub fn refresh_run_by_id(&self, run_id: Uuid) -> Result<Option<RefreshRun>, StoreError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM refresh_runs WHERE run_id = ?1"),
                    params![run_id.to_string()],
                    read_run,
                )
                .optional()?;
            raw.map(|(id, at, r)| into_run(id, at, r)).transpose()
        })
    }

    /// Last persisted UK watchlist state: row id -> content hash.
    pub fn load_uk_state(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT row_id, row_hash FROM watchlist_uk_state")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(rows)
        })
    }

    /// Atomically replace the UK state with a new snapshot's view.
    pub fn replace_uk_state(&self, state: &BTreeMap<String, String>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM watchlist_uk_state", [])?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO watchlist_uk_state (row_id, row_hash) VALUES (?1, ?2)")?;
                for (row_id, row_hash) in state {
                    stmt.execute(params![row_id, row_hash])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}
