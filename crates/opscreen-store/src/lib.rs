#![forbid(unsafe_code)]
//! Durable state for the screening engine: the evidence store, the job
//! queue, refresh-run records, the UK watchlist state, and the audit trail.
//!
//! All operations are synchronous; async callers run them on a blocking
//! task. Every mutating operation is a single transaction, so no partial
//! update is ever visible. Callers pass `now` explicitly: reads never
//! touch validity timestamps and tests control the clock.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Mutex;

mod audit;
mod evidence;
mod jobs;
mod refresh;
mod schema;

pub use audit::AuditRecord;
pub use evidence::{EvidenceRow, RescreenCandidate, ScreeningInputs, UpsertContext};
pub use jobs::{ClaimedJob, EnqueueOutcome, JobState, JobStatusView, NewJob};
pub use refresh::RefreshRun;

pub const CRATE_NAME: &str = "opscreen-store";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage-layer failure; maps to 503 at the boundary.
    Unavailable(String),
    /// Caller-visible input rejection.
    Invalid(String),
    /// Illegal state transition; internal-only, logged and skipped.
    Conflict(String),
    NotFound,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid input: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database behind a storage URL. Accepts a plain
    /// path or a `sqlite://` prefixed one.
    pub fn open(storage_url: &str) -> Result<Self, StoreError> {
        let path = storage_url
            .strip_prefix("sqlite://")
            .or_else(|| storage_url.strip_prefix("sqlite:"))
            .unwrap_or(storage_url);
        let conn = Connection::open(Path::new(path))
            .map_err(|e| StoreError::Unavailable(format!("open {path}: {e}")))?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        let _ = conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        );
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))?;
        f(&mut guard)
    }
}

/// Fixed-width RFC 3339 UTC rendering; lexicographic order equals
/// chronological order, which the validity and retention queries rely on.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Unavailable(format!("bad stored timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    #[test]
    fn timestamps_round_trip_and_sort_lexicographically() {
        let early = Utc::now();
        let late = early + chrono::Duration::microseconds(1500);
        let (a, b) = (format_ts(early), format_ts(late));
        assert!(a < b);
        assert_eq!(parse_ts(&a).unwrap(), early.trunc_subsecs(6));
    }

    #[test]
    fn open_accepts_sqlite_url_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("state.db").display());
        Store::open(&url).unwrap();
    }
}
