// SPDX-License-Identifier: Apache-2.0

use crate::StoreError;
use rusqlite::Connection;

/// Idempotent DDL; applied on every open.
pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS screened_entities (
            entity_key        TEXT PRIMARY KEY,
            display_name      TEXT NOT NULL,
            normalized_name   TEXT NOT NULL,
            date_of_birth     TEXT,
            entity_type       TEXT NOT NULL DEFAULT 'Person',
            last_screened_at      TEXT NOT NULL,
            screening_valid_until TEXT NOT NULL,
            status            TEXT NOT NULL,
            risk_level        TEXT NOT NULL,
            confidence        TEXT NOT NULL,
            score             REAL NOT NULL,
            uk_sanctions_flag INTEGER NOT NULL DEFAULT 0,
            pep_flag          INTEGER NOT NULL DEFAULT 0,
            result_json       TEXT NOT NULL,
            last_requestor    TEXT,
            updated_at        TEXT NOT NULL,
            matched_row_id    TEXT,
            screened_against_uk_hash        TEXT,
            screened_against_refresh_run_id TEXT,
            review_state      TEXT NOT NULL DEFAULT 'UNREVIEWED',
            review_claimed_by   TEXT,
            review_claimed_at   TEXT,
            review_completed_by TEXT,
            review_completed_at TEXT,
            review_outcome      TEXT,
            review_notes        TEXT,
            false_positive_override INTEGER NOT NULL DEFAULT 0,
            false_positive_reason   TEXT,
            false_positive_by       TEXT,
            false_positive_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_screened_entities_valid_until
            ON screened_entities (screening_valid_until);
        CREATE INDEX IF NOT EXISTS idx_screened_entities_normalized_name
            ON screened_entities (normalized_name);

        CREATE TABLE IF NOT EXISTS screening_jobs (
            job_id          TEXT PRIMARY KEY,
            entity_key      TEXT NOT NULL,
            name            TEXT NOT NULL,
            date_of_birth   TEXT,
            entity_type     TEXT NOT NULL DEFAULT 'Person',
            requestor       TEXT NOT NULL,
            reason          TEXT NOT NULL,
            business_reference TEXT NOT NULL DEFAULT '',
            refresh_run_id  TEXT,
            force_rescreen  INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            created_at      TEXT NOT NULL,
            started_at      TEXT,
            finished_at     TEXT,
            error_message   TEXT,
            previous_status TEXT,
            result_status   TEXT,
            transition      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_screening_jobs_status_created
            ON screening_jobs (status, created_at);
        CREATE INDEX IF NOT EXISTS idx_screening_jobs_active_key
            ON screening_jobs (entity_key) WHERE status IN ('pending', 'running');

        CREATE TABLE IF NOT EXISTS refresh_runs (
            run_id        TEXT PRIMARY KEY,
            ran_at        TEXT NOT NULL,
            uk_hash       TEXT NOT NULL,
            prev_uk_hash  TEXT,
            uk_row_count  INTEGER NOT NULL,
            delta_added   INTEGER NOT NULL,
            delta_removed INTEGER NOT NULL,
            delta_changed INTEGER NOT NULL,
            candidate_count       INTEGER NOT NULL,
            queued_count          INTEGER NOT NULL,
            reused_count          INTEGER NOT NULL,
            already_pending_count INTEGER NOT NULL,
            failed_count          INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refresh_runs_ran_at ON refresh_runs (ran_at);

        CREATE TABLE IF NOT EXISTS watchlist_uk_state (
            row_id   TEXT PRIMARY KEY,
            row_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_events (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            at                 TEXT NOT NULL,
            actor              TEXT NOT NULL,
            action             TEXT NOT NULL,
            entity_key         TEXT,
            business_reference TEXT,
            reason             TEXT,
            outcome            TEXT NOT NULL,
            correlation_id     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_events_at ON audit_events (at);
        ",
    )?;
    Ok(())
}
