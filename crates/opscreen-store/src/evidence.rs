// SPDX-License-Identifier: Apache-2.0

use crate::{format_ts, parse_ts, Store, StoreError};
use chrono::{DateTime, Duration, Months, Utc};
use opscreen_model::{
    normalize_dob, normalize_name, Confidence, EntityKey, EntityKind, ReviewOutcome, ReviewState,
    RiskLevel, ScreeningReport, ScreeningStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EvidenceRow {
    pub entity_key: EntityKey,
    pub display_name: String,
    pub normalized_name: String,
    pub date_of_birth: Option<String>,
    pub entity_type: EntityKind,
    pub last_screened_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: ScreeningStatus,
    pub risk_level: RiskLevel,
    pub confidence: Confidence,
    pub score: f64,
    pub uk_sanctions_flag: bool,
    pub pep_flag: bool,
    pub report: ScreeningReport,
    pub last_requestor: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub matched_row_id: Option<String>,
    pub screened_against_uk_hash: Option<String>,
    pub screened_against_refresh_run_id: Option<Uuid>,
    pub review_state: ReviewState,
    pub review_claimed_by: Option<String>,
    pub review_claimed_at: Option<DateTime<Utc>>,
    pub review_completed_by: Option<String>,
    pub review_completed_at: Option<DateTime<Utc>>,
    pub review_outcome: Option<ReviewOutcome>,
    pub review_notes: Option<String>,
    pub false_positive_override: bool,
    pub false_positive_reason: Option<String>,
    pub false_positive_by: Option<String>,
    pub false_positive_at: Option<DateTime<Utc>>,
}

/// Identity fields submitted with the screening request.
#[derive(Debug, Clone)]
pub struct ScreeningInputs<'a> {
    pub display_name: &'a str,
    pub date_of_birth: Option<&'a str>,
    pub entity_type: EntityKind,
    pub requestor: &'a str,
}

/// Worker-side context carried into the upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertContext<'a> {
    pub matched_row_id: Option<&'a str>,
    pub force_rescreen: bool,
    pub screened_against_uk_hash: Option<&'a str>,
    pub screened_against_refresh_run_id: Option<Uuid>,
}

const EVIDENCE_COLUMNS: &str = "entity_key, display_name, normalized_name, date_of_birth, \
     entity_type, last_screened_at, screening_valid_until, status, risk_level, confidence, \
     score, uk_sanctions_flag, pep_flag, result_json, last_requestor, updated_at, \
     matched_row_id, screened_against_uk_hash, screened_against_refresh_run_id, \
     review_state, review_claimed_by, review_claimed_at, review_completed_by, \
     review_completed_at, review_outcome, review_notes, false_positive_override, \
     false_positive_reason, false_positive_by, false_positive_at";

struct RawEvidence {
    entity_key: String,
    display_name: String,
    normalized_name: String,
    date_of_birth: Option<String>,
    entity_type: String,
    last_screened_at: String,
    valid_until: String,
    status: String,
    risk_level: String,
    confidence: String,
    score: f64,
    uk_sanctions_flag: bool,
    pep_flag: bool,
    result_json: String,
    last_requestor: Option<String>,
    updated_at: String,
    matched_row_id: Option<String>,
    screened_against_uk_hash: Option<String>,
    screened_against_refresh_run_id: Option<String>,
    review_state: String,
    review_claimed_by: Option<String>,
    review_claimed_at: Option<String>,
    review_completed_by: Option<String>,
    review_completed_at: Option<String>,
    review_outcome: Option<String>,
    review_notes: Option<String>,
    false_positive_override: bool,
    false_positive_reason: Option<String>,
    false_positive_by: Option<String>,
    false_positive_at: Option<String>,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvidence> {
    Ok(RawEvidence {
        entity_key: row.get(0)?,
        display_name: row.get(1)?,
        normalized_name: row.get(2)?,
        date_of_birth: row.get(3)?,
        entity_type: row.get(4)?,
        last_screened_at: row.get(5)?,
        valid_until: row.get(6)?,
        status: row.get(7)?,
        risk_level: row.get(8)?,
        confidence: row.get(9)?,
        score: row.get(10)?,
        uk_sanctions_flag: row.get(11)?,
        pep_flag: row.get(12)?,
        result_json: row.get(13)?,
        last_requestor: row.get(14)?,
        updated_at: row.get(15)?,
        matched_row_id: row.get(16)?,
        screened_against_uk_hash: row.get(17)?,
        screened_against_refresh_run_id: row.get(18)?,
        review_state: row.get(19)?,
        review_claimed_by: row.get(20)?,
        review_claimed_at: row.get(21)?,
        review_completed_by: row.get(22)?,
        review_completed_at: row.get(23)?,
        review_outcome: row.get(24)?,
        review_notes: row.get(25)?,
        false_positive_override: row.get(26)?,
        false_positive_reason: row.get(27)?,
        false_positive_by: row.get(28)?,
        false_positive_at: row.get(29)?,
    })
}

fn opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

impl RawEvidence {
    fn into_row(self) -> Result<EvidenceRow, StoreError> {
        let corrupt = |what: &str, e: String| {
            StoreError::Unavailable(format!("corrupt evidence column {what}: {e}"))
        };
        Ok(EvidenceRow {
            entity_key: EntityKey::parse(&self.entity_key)
                .map_err(|e| corrupt("entity_key", e.0))?,
            display_name: self.display_name,
            normalized_name: self.normalized_name,
            date_of_birth: self.date_of_birth,
            entity_type: EntityKind::parse(&self.entity_type)
                .map_err(|e| corrupt("entity_type", e.0))?,
            last_screened_at: parse_ts(&self.last_screened_at)?,
            valid_until: parse_ts(&self.valid_until)?,
            status: ScreeningStatus::parse(&self.status).map_err(|e| corrupt("status", e.0))?,
            risk_level: RiskLevel::parse(&self.risk_level).map_err(|e| corrupt("risk_level", e.0))?,
            confidence: Confidence::parse(&self.confidence)
                .map_err(|e| corrupt("confidence", e.0))?,
            score: self.score,
            uk_sanctions_flag: self.uk_sanctions_flag,
            pep_flag: self.pep_flag,
            report: serde_json::from_str(&self.result_json)
                .map_err(|e| corrupt("result_json", e.to_string()))?,
            last_requestor: self.last_requestor,
            updated_at: parse_ts(&self.updated_at)?,
            matched_row_id: self.matched_row_id,
            screened_against_uk_hash: self.screened_against_uk_hash,
            screened_against_refresh_run_id: self
                .screened_against_refresh_run_id
                .as_deref()
                .map(|s| Uuid::parse_str(s).map_err(|e| corrupt("refresh_run_id", e.to_string())))
                .transpose()?,
            review_state: ReviewState::parse(&self.review_state)
                .map_err(|e| corrupt("review_state", e.0))?,
            review_claimed_by: self.review_claimed_by,
            review_claimed_at: opt_ts(self.review_claimed_at)?,
            review_completed_by: self.review_completed_by,
            review_completed_at: opt_ts(self.review_completed_at)?,
            review_outcome: self
                .review_outcome
                .as_deref()
                .map(|s| ReviewOutcome::parse(s).map_err(|e| corrupt("review_outcome", e.0)))
                .transpose()?,
            review_notes: self.review_notes,
            false_positive_override: self.false_positive_override,
            false_positive_reason: self.false_positive_reason,
            false_positive_by: self.false_positive_by,
            false_positive_at: opt_ts(self.false_positive_at)?,
        })
    }
}

fn select_one(
    conn: &Connection,
    key: &EntityKey,
    extra_clause: &str,
    extra_params: &[&dyn rusqlite::ToSql],
) -> Result<Option<EvidenceRow>, StoreError> {
    let sql = format!(
        "SELECT {EVIDENCE_COLUMNS} FROM screened_entities WHERE entity_key = ?1 {extra_clause}"
    );
    let key_str = key.as_str();
    let mut all_params: Vec<&dyn rusqlite::ToSql> = vec![&key_str];
    all_params.extend_from_slice(extra_params);
    let raw = conn
        .query_row(&sql, all_params.as_slice(), read_raw)
        .optional()?;
    raw.map(RawEvidence::into_row).transpose()
}

impl Store {
    pub fn get_evidence(&self, key: &EntityKey) -> Result<Option<EvidenceRow>, StoreError> {
        self.with_conn(|conn| select_one(conn, key, "", &[]))
    }

    /// Returns the row only when it exists and is still inside its validity
    /// window. Read-only: never touches the timestamps.
    pub fn get_valid_evidence(
        &self,
        key: &EntityKey,
        now: DateTime<Utc>,
    ) -> Result<Option<EvidenceRow>, StoreError> {
        let now = format_ts(now);
        self.with_conn(|conn| {
            select_one(
                conn,
                key,
                "AND screening_valid_until > ?2",
                &[&now as &dyn rusqlite::ToSql],
            )
        })
    }

    /// Replace-in-place upsert. Review and override fields survive a routine
    /// refresh with an unchanged decision; they reset to UNREVIEWED when the
    /// status changes, and on a forced re-screen whose regime changed.
    pub fn upsert_evidence(
        &self,
        key: &EntityKey,
        inputs: &ScreeningInputs<'_>,
        report: &ScreeningReport,
        ctx: &UpsertContext<'_>,
        validity_days: i64,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRow, StoreError> {
        let result_json = serde_json::to_string(report)
            .map_err(|e| StoreError::Unavailable(format!("serialize result: {e}")))?;
        let dob_canonical = inputs
            .date_of_birth
            .and_then(normalize_dob)
            .map(|d| d.canonical());
        let now_str = format_ts(now);
        let valid_until = format_ts(now + Duration::days(validity_days));
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT status, result_json FROM screened_entities WHERE entity_key = ?1",
                    params![key.as_str()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let preserve_review = match &existing {
                None => false,
                Some((prev_status, prev_json)) => {
                    let status_changed = prev_status != report.status().label();
                    let prev_regime = serde_json::from_str::<serde_json::Value>(prev_json)
                        .ok()
                        .and_then(|v| v.get("Regime").and_then(|r| r.as_str().map(String::from)));
                    let regime_changed = prev_regime.as_deref() != report.regime.as_deref();
                    !(status_changed || (ctx.force_rescreen && regime_changed))
                }
            };
            let review_sql = if preserve_review {
                ""
            } else {
                ", review_state = 'UNREVIEWED', review_claimed_by = NULL, \
                 review_claimed_at = NULL, review_completed_by = NULL, \
                 review_completed_at = NULL, review_outcome = NULL, review_notes = NULL, \
                 false_positive_override = 0, false_positive_reason = NULL, \
                 false_positive_by = NULL, false_positive_at = NULL"
            };
            let sql = format!(
                "INSERT INTO screened_entities (
                    entity_key, display_name, normalized_name, date_of_birth, entity_type,
                    last_screened_at, screening_valid_until,
                    status, risk_level, confidence, score, uk_sanctions_flag, pep_flag,
                    result_json, last_requestor, updated_at,
                    matched_row_id, screened_against_uk_hash, screened_against_refresh_run_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                ON CONFLICT (entity_key) DO UPDATE SET
                    display_name = excluded.display_name,
                    normalized_name = excluded.normalized_name,
                    date_of_birth = excluded.date_of_birth,
                    entity_type = excluded.entity_type,
                    last_screened_at = excluded.last_screened_at,
                    screening_valid_until = excluded.screening_valid_until,
                    status = excluded.status,
                    risk_level = excluded.risk_level,
                    confidence = excluded.confidence,
                    score = excluded.score,
                    uk_sanctions_flag = excluded.uk_sanctions_flag,
                    pep_flag = excluded.pep_flag,
                    result_json = excluded.result_json,
                    last_requestor = excluded.last_requestor,
                    updated_at = excluded.updated_at,
                    matched_row_id = excluded.matched_row_id,
                    screened_against_uk_hash = excluded.screened_against_uk_hash,
                    screened_against_refresh_run_id = excluded.screened_against_refresh_run_id\
                    {review_sql}"
            );
            tx.execute(
                &sql,
                params![
                    key.as_str(),
                    inputs.display_name,
                    normalize_name(inputs.display_name),
                    dob_canonical,
                    inputs.entity_type.as_str(),
                    now_str,
                    valid_until,
                    report.status().label(),
                    report.risk_level.label(),
                    report.confidence.label(),
                    f64::from(report.score),
                    report.uk_sanctions_flag(),
                    report.is_pep,
                    result_json,
                    inputs.requestor,
                    now_str,
                    ctx.matched_row_id,
                    ctx.screened_against_uk_hash,
                    ctx.screened_against_refresh_run_id.map(|u| u.to_string()),
                ],
            )?;
            let row = select_one(&tx, key, "", &[])?.ok_or(StoreError::NotFound)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Bounded search over display and normalized names, newest first.
    pub fn search_evidence(
        &self,
        name: Option<&str>,
        key: Option<&EntityKey>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EvidenceRow>, StoreError> {
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        if name.is_none() && key.is_none() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, 100) as i64;
        let offset = offset as i64;
        self.with_conn(|conn| {
            let mut clauses = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(k) = key {
                clauses.push(format!("entity_key = ?{}", values.len() + 1));
                values.push(Box::new(k.as_str().to_string()));
            }
            if let Some(n) = name {
                let pattern = format!("%{n}%");
                clauses.push(format!(
                    "(display_name LIKE ?{idx} OR normalized_name LIKE ?{idx})",
                    idx = values.len() + 1
                ));
                values.push(Box::new(pattern));
            }
            let sql = format!(
                "SELECT {EVIDENCE_COLUMNS} FROM screened_entities WHERE {} \
                 ORDER BY last_screened_at DESC LIMIT ?{} OFFSET ?{}",
                clauses.join(" AND "),
                values.len() + 1,
                values.len() + 2
            );
            values.push(Box::new(limit));
            values.push(Box::new(offset));
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(values.iter().map(|b| b.as_ref()));
            let rows = stmt
                .query_map(params, read_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawEvidence::into_row).collect()
        })
    }

    /// Analyst override: flags the row as a false positive without touching
    /// the decision fields or extending validity.
    pub fn mark_false_positive(
        &self,
        key: &EntityKey,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRow, StoreError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(StoreError::Invalid(
                "false-positive reason must not be empty".to_string(),
            ));
        }
        let now_str = format_ts(now);
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE screened_entities SET false_positive_override = 1, \
                 false_positive_reason = ?2, false_positive_by = ?3, false_positive_at = ?4 \
                 WHERE entity_key = ?1",
                params![key.as_str(), reason, actor, now_str],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            select_one(conn, key, "", &[])?.ok_or(StoreError::NotFound)
        })
    }

    pub fn purge_evidence_older_than(
        &self,
        months: u32,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if months < 1 {
            return Ok(0);
        }
        let cutoff = now
            .checked_sub_months(Months::new(months))
            .ok_or_else(|| StoreError::Invalid("retention cutoff underflow".to_string()))?;
        let cutoff = format_ts(cutoff);
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM screened_entities WHERE last_screened_at < ?1",
                params![cutoff],
            )?)
        })
    }

    /// UNREVIEWED -> IN_REVIEW.
    pub fn claim_review(
        &self,
        key: &EntityKey,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRow, StoreError> {
        let now_str = format_ts(now);
        self.with_conn(|conn| {
            let state: Option<String> = conn
                .query_row(
                    "SELECT review_state FROM screened_entities WHERE entity_key = ?1",
                    params![key.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            match state.as_deref() {
                None => return Err(StoreError::NotFound),
                Some("UNREVIEWED") => {}
                Some(other) => {
                    return Err(StoreError::Conflict(format!(
                        "review claim requires UNREVIEWED, row is {other}"
                    )))
                }
            }
            conn.execute(
                "UPDATE screened_entities SET review_state = 'IN_REVIEW', \
                 review_claimed_by = ?2, review_claimed_at = ?3 WHERE entity_key = ?1",
                params![key.as_str(), actor, now_str],
            )?;
            select_one(conn, key, "", &[])?.ok_or(StoreError::NotFound)
        })
    }

    /// IN_REVIEW -> COMPLETED, with a mandatory structured outcome and notes.
    pub fn complete_review(
        &self,
        key: &EntityKey,
        actor: &str,
        outcome: ReviewOutcome,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRow, StoreError> {
        if notes.trim().len() < 10 {
            return Err(StoreError::Invalid(
                "review notes must be at least 10 characters".to_string(),
            ));
        }
        let now_str = format_ts(now);
        self.with_conn(|conn| {
            let state: Option<String> = conn
                .query_row(
                    "SELECT review_state FROM screened_entities WHERE entity_key = ?1",
                    params![key.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            match state.as_deref() {
                None => return Err(StoreError::NotFound),
                Some("IN_REVIEW") => {}
                Some(other) => {
                    return Err(StoreError::Conflict(format!(
                        "review completion requires IN_REVIEW, row is {other}"
                    )))
                }
            }
            conn.execute(
                "UPDATE screened_entities SET review_state = 'COMPLETED', \
                 review_completed_by = ?2, review_completed_at = ?3, \
                 review_outcome = ?4, review_notes = ?5 WHERE entity_key = ?1",
                params![key.as_str(), actor, now_str, outcome.label(), notes.trim()],
            )?;
            select_one(conn, key, "", &[])?.ok_or(StoreError::NotFound)
        })
    }

    /// Currently-valid rows, trimmed to the fields the refresh coordinator
    /// needs to pick re-screen candidates.
    pub fn rescreen_candidate_pool(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RescreenCandidate>, StoreError> {
        let now = format_ts(now);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_key, display_name, normalized_name, date_of_birth, entity_type, \
                 status, matched_row_id FROM screened_entities WHERE screening_valid_until > ?1",
            )?;
            let rows = stmt
                .query_map(params![now], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, Option<String>>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(key, name, norm, dob, kind, status, matched)| {
                    Ok(RescreenCandidate {
                        entity_key: EntityKey::parse(&key)
                            .map_err(|e| StoreError::Unavailable(e.0))?,
                        display_name: name,
                        normalized_name: norm,
                        date_of_birth: dob,
                        entity_type: EntityKind::parse(&kind)
                            .map_err(|e| StoreError::Unavailable(e.0))?,
                        status: ScreeningStatus::parse(&status)
                            .map_err(|e| StoreError::Unavailable(e.0))?,
                        matched_row_id: matched,
                    })
                })
                .collect()
        })
    }
}

#[derive(Debug, Clone)]
pub struct RescreenCandidate {
    pub entity_key: EntityKey,
    pub display_name: String,
    pub normalized_name: String,
    pub date_of_birth: Option<String>,
    pub entity_type: EntityKind,
    pub status: ScreeningStatus,
    pub matched_row_id: Option<String>,
}
