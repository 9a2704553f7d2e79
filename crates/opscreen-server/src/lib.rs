#![forbid(unsafe_code)]

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use opscreen_match::{run_screening, MatchOutcome, MatchSettings, ScreenInput};
use opscreen_model::EntityKind;
use opscreen_store::{Store, StoreError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod audit;
pub mod config;
mod dispatch;
mod internal;
pub mod rate_limiter;
mod redis_backend;
pub mod refresh;
mod review;
mod snapshots;
pub mod worker;

pub use audit::{AuditEntry, AuditSink};
pub use config::{effective_config_payload, validate_startup_config_contract, ServiceConfig};
pub use dispatch::ScreenOutcome;
pub use rate_limiter::{login_backoff_seconds, LoginBackoff, RateLimitConfig, RateLimiter};
pub use snapshots::{SnapshotLookupError, SnapshotRegistry};

pub const CRATE_NAME: &str = "opscreen-server";

const MAX_BODY_BYTES: usize = 512 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ServiceConfig>,
    pub store: Option<Arc<Store>>,
    pub snapshots: Arc<SnapshotRegistry>,
    pub ip_limiter: Arc<RateLimiter>,
    pub login_backoff: Arc<LoginBackoff>,
    pub audit: Arc<AuditSink>,
    /// Advisory lock serializing refresh-coordinator runs.
    pub refresh_lock: Arc<tokio::sync::Mutex<()>>,
    request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn with_config(cfg: ServiceConfig, store: Option<Arc<Store>>) -> Self {
        let shared = cfg.rate_limit_storage_url.as_deref().and_then(|url| {
            redis_backend::RedisBackend::new(
                url,
                &cfg.redis_prefix,
                redis_backend::RedisPolicy::default(),
            )
            .ok()
        });
        let audit = Arc::new(AuditSink::new(store.clone(), cfg.enable_audit_log));
        let snapshots = Arc::new(SnapshotRegistry::new(cfg.watchlist_path.clone()));
        Self {
            ip_limiter: Arc::new(RateLimiter::new(shared, "ip")),
            login_backoff: Arc::new(LoginBackoff::default()),
            audit,
            snapshots,
            store,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
            request_id_seed: Arc::new(AtomicU64::new(1)),
            cfg: Arc::new(cfg),
        }
    }

    #[must_use]
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            match_threshold: self.cfg.match_threshold,
            suggestion_threshold: self.cfg.suggestion_threshold,
        }
    }

    /// Run a synchronous store operation on a blocking task.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return Err(StoreError::Unavailable("storage not configured".to_string()));
        };
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }

    /// Correlation id: the caller's `x-request-id` when sane, else a fresh
    /// process-local one.
    pub(crate) fn correlation_id(&self, headers: &HeaderMap) -> String {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!("req-{}", self.request_id_seed.fetch_add(1, Ordering::Relaxed))
            })
    }
}

fn normalized_forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() || first.len() > 64 {
        return None;
    }
    if first
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b':' || b == b'-')
    {
        Some(first.to_string())
    } else {
        None
    }
}

/// Rate-limit key for a request. The forwarded-for header is only honored
/// when the direct peer is one of the configured trusted proxies.
pub(crate) fn client_ip(headers: &HeaderMap, peer: SocketAddr, cfg: &ServiceConfig) -> String {
    if cfg.trusted_proxy_ips.contains(&peer.ip()) {
        if let Some(forwarded) = normalized_forwarded_for(headers) {
            return forwarded;
        }
    }
    peer.ip().to_string()
}

pub(crate) enum MatcherError {
    UnknownBackend(String),
    Unavailable(String),
}

/// Execute the matcher on a blocking task under the configured deadline.
/// The dispatch path never blocks the runtime on a fuzzy scan.
pub(crate) async fn run_matcher(
    state: &AppState,
    backend: Option<&str>,
    name: String,
    dob: Option<String>,
    entity_type: EntityKind,
) -> Result<MatchOutcome, MatcherError> {
    let snapshot = state
        .snapshots
        .handle(backend, true)
        .await
        .map_err(|e| match e {
            SnapshotLookupError::UnknownBackend(b) => MatcherError::UnknownBackend(b),
            SnapshotLookupError::Unavailable(msg) => MatcherError::Unavailable(msg),
        })?;
    let settings = state.match_settings();
    let deadline = state.cfg.matcher_deadline;
    let task = tokio::task::spawn_blocking(move || {
        let input = ScreenInput {
            name: &name,
            dob: dob.as_deref(),
            entity_type,
        };
        run_screening(&input, &snapshot, &settings)
    });
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(join)) => Err(MatcherError::Unavailable(format!("matcher task failed: {join}"))),
        Err(_) => Err(MatcherError::Unavailable(format!(
            "matcher deadline of {}s exceeded",
            deadline.as_secs()
        ))),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/opcheck", post(dispatch::opcheck_handler))
        .route("/opcheck/jobs/:job_id", get(dispatch::job_status_handler))
        .route("/opcheck/search", get(dispatch::search_handler))
        .route(
            "/opcheck/:entity_key/review/claim",
            post(review::review_claim_handler),
        )
        .route(
            "/opcheck/:entity_key/review/complete",
            post(review::review_complete_handler),
        )
        .route(
            "/opcheck/:entity_key/false-positive",
            post(review::false_positive_handler),
        )
        .route(
            "/internal/screening/jobs",
            post(internal::internal_jobs_handler),
        )
        .route(
            "/internal/screening/jobs/bulk",
            post(internal::internal_jobs_bulk_handler),
        )
        .route("/refresh_opensanctions", post(refresh::refresh_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
