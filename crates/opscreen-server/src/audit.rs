use chrono::Utc;
use opscreen_model::EntityKey;
use opscreen_store::{AuditRecord, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// One structured audit emission.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub actor: &'a str,
    pub action: &'a str,
    pub entity_key: Option<&'a EntityKey>,
    pub business_reference: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub outcome: &'a str,
    pub correlation_id: Option<&'a str>,
}

/// Append-only audit sink: a structured log line always, a durable row when
/// storage is configured. Persistence is best-effort; a failed write is
/// logged and never fails the caller.
pub struct AuditSink {
    store: Option<Arc<Store>>,
    log_enabled: bool,
}

impl AuditSink {
    #[must_use]
    pub fn new(store: Option<Arc<Store>>, log_enabled: bool) -> Self {
        Self { store, log_enabled }
    }

    pub async fn emit(&self, entry: AuditEntry<'_>) {
        if self.log_enabled {
            info!(
                target: "opscreen_audit",
                actor = entry.actor,
                action = entry.action,
                entity_key = entry.entity_key.map(EntityKey::short),
                business_reference = entry.business_reference,
                reason = entry.reason,
                outcome = entry.outcome,
                correlation_id = entry.correlation_id,
                "audit"
            );
        }
        let Some(store) = &self.store else {
            return;
        };
        let record = AuditRecord {
            at: Utc::now(),
            actor: entry.actor.to_string(),
            action: entry.action.to_string(),
            entity_key: entry.entity_key.map(|k| k.as_str().to_string()),
            business_reference: entry.business_reference.map(str::to_string),
            reason: entry.reason.map(str::to_string),
            outcome: entry.outcome.to_string(),
            correlation_id: entry.correlation_id.map(str::to_string),
        };
        let store = Arc::clone(store);
        let result = tokio::task::spawn_blocking(move || store.append_audit(&record)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("audit event lost: {e}"),
            Err(e) => warn!("audit event lost: {e}"),
        }
    }
}
