use crate::{format_ts, Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::params;

/// One append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub entity_key: Option<String>,
    pub business_reference: Option<String>,
    pub reason: Option<String>,
    pub outcome: String,
    pub correlation_id: Option<String>,
}

impl Store {
    pub fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_events (
                    at, actor, action, entity_key, business_reference,
                    reason, outcome, correlation_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format_ts(record.at),
                    record.actor,
                    record.action,
                    record.entity_key,
                    record.business_reference,
                    record.reason,
                    record.outcome,
                    record.correlation_id,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest-first slice of the trail, for operator inspection and tests.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let limit = limit.clamp(1, 500) as i64;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT at, actor, action, entity_key, business_reference, reason, outcome, \
                 correlation_id FROM audit_events ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, Option<String>>(5)?,
                        r.get::<_, String>(6)?,
                        r.get::<_, Option<String>>(7)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(at, actor, action, key, bref, reason, outcome, corr)| {
                    Ok(AuditRecord {
                        at: crate::parse_ts(&at)?,
                        actor,
                        action,
                        entity_key: key,
                        business_reference: bref,
                        reason,
                        outcome,
                        correlation_id: corr,
                    })
                })
                .collect()
        })
    }
}
