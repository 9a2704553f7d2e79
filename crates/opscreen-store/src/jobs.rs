// SPDX-License-Identifier: Apache-2.0

use crate::{format_ts, parse_ts, Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use opscreen_model::{CheckReason, EntityKey, EntityKind, ScreeningReport, Transition};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

const ERROR_MESSAGE_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(input: &str) -> Result<Self, StoreError> {
        match input {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Unavailable(format!(
                "corrupt job status {other:?}"
            ))),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Enqueue payload; one row per accepted enqueue.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub entity_key: &'a EntityKey,
    pub name: &'a str,
    pub date_of_birth: Option<&'a str>,
    pub entity_type: EntityKind,
    pub requestor: &'a str,
    pub reason: CheckReason,
    pub business_reference: &'a str,
    pub refresh_run_id: Option<Uuid>,
    pub force_rescreen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A valid evidence row already answers this fingerprint.
    Reused,
    /// Another job for this fingerprint is pending or running.
    AlreadyPending,
    Queued(Uuid),
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: Uuid,
    pub entity_key: EntityKey,
    pub name: String,
    pub date_of_birth: Option<String>,
    pub entity_type: EntityKind,
    pub requestor: String,
    pub reason: CheckReason,
    pub business_reference: String,
    pub refresh_run_id: Option<Uuid>,
    pub force_rescreen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub state: JobState,
    pub entity_key: EntityKey,
    pub error_message: Option<String>,
    pub result: Option<ScreeningReport>,
}

impl Store {
    /// Atomic check-then-insert. The reuse and in-flight checks run inside
    /// the same transaction as the insert, so at most one job per
    /// fingerprint is ever pending or running. A forced re-screen skips the
    /// reuse check; its whole point is to supersede a valid row.
    pub fn enqueue_job(
        &self,
        job: &NewJob<'_>,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let now_str = format_ts(now);
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !job.force_rescreen {
                let valid: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM screened_entities \
                         WHERE entity_key = ?1 AND screening_valid_until > ?2",
                        params![job.entity_key.as_str(), now_str],
                        |r| r.get(0),
                    )
                    .optional()?;
                if valid.is_some() {
                    return Ok(EnqueueOutcome::Reused);
                }
            }
            let inflight: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM screening_jobs \
                     WHERE entity_key = ?1 AND status IN ('pending', 'running') LIMIT 1",
                    params![job.entity_key.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            if inflight.is_some() {
                return Ok(EnqueueOutcome::AlreadyPending);
            }
            let job_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO screening_jobs (
                    job_id, entity_key, name, date_of_birth, entity_type, requestor,
                    reason, business_reference, refresh_run_id, force_rescreen,
                    status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11)",
                params![
                    job_id.to_string(),
                    job.entity_key.as_str(),
                    job.name,
                    job.date_of_birth,
                    job.entity_type.as_str(),
                    job.requestor,
                    job.reason.label(),
                    job.business_reference,
                    job.refresh_run_id.map(|u| u.to_string()),
                    job.force_rescreen,
                    now_str,
                ],
            )?;
            tx.commit()?;
            Ok(EnqueueOutcome::Queued(job_id))
        })
    }

    /// Queue pressure signal for the dispatcher's sync-or-enqueue choice.
    pub fn pending_running_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM screening_jobs WHERE status IN ('pending', 'running')",
                [],
                |r| r.get(0),
            )?;
            Ok(n.max(0) as u64)
        })
    }

    /// Claim the oldest pending job, transitioning it to running in one
    /// write transaction. Concurrent claimers serialize on the database
    /// writer lock, so no two ever observe the same job as pending.
    pub fn claim_one(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>, StoreError> {
        let now_str = format_ts(now);
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "UPDATE screening_jobs SET status = 'running', started_at = ?1
                     WHERE job_id = (
                         SELECT job_id FROM screening_jobs
                         WHERE status = 'pending'
                         ORDER BY created_at, job_id
                         LIMIT 1
                     )
                     RETURNING job_id, entity_key, name, date_of_birth, entity_type,
                               requestor, reason, business_reference, refresh_run_id,
                               force_rescreen, created_at",
                    params![now_str],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, Option<String>>(3)?,
                            r.get::<_, String>(4)?,
                            r.get::<_, String>(5)?,
                            r.get::<_, String>(6)?,
                            r.get::<_, String>(7)?,
                            r.get::<_, Option<String>>(8)?,
                            r.get::<_, bool>(9)?,
                            r.get::<_, String>(10)?,
                        ))
                    },
                )
                .optional()?;
            let Some((
                job_id,
                entity_key,
                name,
                date_of_birth,
                entity_type,
                requestor,
                reason,
                business_reference,
                refresh_run_id,
                force_rescreen,
                created_at,
            )) = raw
            else {
                return Ok(None);
            };
            let corrupt =
                |what: &str, e: String| StoreError::Unavailable(format!("corrupt job {what}: {e}"));
            Ok(Some(ClaimedJob {
                job_id: Uuid::parse_str(&job_id).map_err(|e| corrupt("job_id", e.to_string()))?,
                entity_key: EntityKey::parse(&entity_key).map_err(|e| corrupt("entity_key", e.0))?,
                name,
                date_of_birth,
                entity_type: EntityKind::parse(&entity_type)
                    .map_err(|e| corrupt("entity_type", e.0))?,
                requestor,
                reason: CheckReason::parse(&reason).map_err(|e| corrupt("reason", e.0))?,
                business_reference,
                refresh_run_id: refresh_run_id
                    .as_deref()
                    .map(|s| Uuid::parse_str(s).map_err(|e| corrupt("refresh_run_id", e.to_string())))
                    .transpose()?,
                force_rescreen,
                created_at: parse_ts(&created_at)?,
            }))
        })
    }

    /// running -> completed, recording the outcome transition.
    pub fn complete_job(
        &self,
        job_id: Uuid,
        previous_status: Option<&str>,
        result_status: Option<&str>,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now_str = format_ts(now);
        self.terminal_transition(job_id, move |conn| {
            conn.execute(
                "UPDATE screening_jobs SET status = 'completed', finished_at = ?2, \
                 previous_status = ?3, result_status = ?4, transition = ?5 \
                 WHERE job_id = ?1 AND status = 'running'",
                params![
                    job_id.to_string(),
                    now_str,
                    previous_status,
                    result_status,
                    transition.label(),
                ],
            )
        })
    }

    /// running -> failed; the error message is truncated to 500 characters.
    pub fn fail_job(
        &self,
        job_id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now_str = format_ts(now);
        let truncated: String = error_message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect();
        self.terminal_transition(job_id, move |conn| {
            conn.execute(
                "UPDATE screening_jobs SET status = 'failed', finished_at = ?2, \
                 error_message = ?3 WHERE job_id = ?1 AND status = 'running'",
                params![job_id.to_string(), now_str, truncated],
            )
        })
    }

    fn terminal_transition(
        &self,
        job_id: Uuid,
        update: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<usize>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = update(conn)?;
            if changed == 1 {
                return Ok(());
            }
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM screening_jobs WHERE job_id = ?1",
                    params![job_id.to_string()],
                    |r| r.get(0),
                )
                .optional()?;
            match current {
                None => Err(StoreError::NotFound),
                Some(state) => Err(StoreError::Conflict(format!(
                    "job {job_id} is {state}, not running"
                ))),
            }
        })
    }

    /// Job state for the polling endpoint; completed jobs carry the evidence
    /// result joined by fingerprint.
    pub fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatusView>, StoreError> {
        self.with_conn(|conn| {
            let raw: Option<(String, String, Option<String>)> = conn
                .query_row(
                    "SELECT status, entity_key, error_message \
                     FROM screening_jobs WHERE job_id = ?1",
                    params![job_id.to_string()],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;
            let Some((status, entity_key, error_message)) = raw else {
                return Ok(None);
            };
            let state = JobState::parse(&status)?;
            let entity_key = EntityKey::parse(&entity_key)
                .map_err(|e| StoreError::Unavailable(format!("corrupt job entity_key: {}", e.0)))?;
            let result = if state == JobState::Completed {
                let json: Option<String> = conn
                    .query_row(
                        "SELECT result_json FROM screened_entities WHERE entity_key = ?1",
                        params![entity_key.as_str()],
                        |r| r.get(0),
                    )
                    .optional()?;
                json.as_deref()
                    .map(|j| {
                        serde_json::from_str(j).map_err(|e| {
                            StoreError::Unavailable(format!("corrupt result_json: {e}"))
                        })
                    })
                    .transpose()?
            } else {
                None
            };
            Ok(Some(JobStatusView {
                job_id,
                state,
                entity_key,
                error_message,
                result,
            }))
        })
    }

    /// Retention sweep for terminal jobs. A completed job is only removed
    /// while its evidence row still exists, keeping the completed-implies-
    /// evidence round trip intact for anything the sweep leaves behind.
    pub fn purge_terminal_jobs_older_than(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if days < 1 {
            return Ok(0);
        }
        let cutoff = format_ts(now - Duration::days(days));
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM screening_jobs
                 WHERE status IN ('completed', 'failed')
                   AND finished_at IS NOT NULL
                   AND finished_at < ?1
                   AND (status = 'failed' OR EXISTS (
                        SELECT 1 FROM screened_entities
                        WHERE screened_entities.entity_key = screening_jobs.entity_key))",
                params![cutoff],
            )?)
        })
    }
}
