// SPDX-License-Identifier: Apache-2.0

use crate::rate_limiter::RateLimitConfig;
use serde_json::json;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_SEARCH_BACKEND: &str = "opensanctions";

const MIN_TOKEN_SECRET_LEN: usize = 32;
const MIN_WORKER_POLL_SECONDS: u64 = 2;

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// Unset means inline-only mode: no cache, no queue, no persistence.
    pub storage_url: Option<String>,
    pub token_signing_secret: Option<String>,
    pub trusted_proxy_ips: Vec<IpAddr>,
    pub rate_limit_storage_url: Option<String>,
    pub redis_prefix: String,
    pub rate_limit_per_ip: RateLimitConfig,
    pub sync_enabled: bool,
    pub sync_threshold: u64,
    pub worker_count: usize,
    pub worker_poll: Duration,
    pub cleanup_every_n_loops: u64,
    pub job_retention_days: i64,
    pub evidence_retention_months: Option<u32>,
    pub match_threshold: u8,
    pub suggestion_threshold: u8,
    pub matcher_deadline: Duration,
    pub validity_days: i64,
    pub internal_api_key: Option<String>,
    pub internal_ip_allowlist: Vec<String>,
    pub watchlist_path: Option<PathBuf>,
    pub refresh_include_peps_default: bool,
    pub enable_audit_log: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            storage_url: None,
            token_signing_secret: None,
            trusted_proxy_ips: Vec::new(),
            rate_limit_storage_url: None,
            redis_prefix: "opscreen".to_string(),
            rate_limit_per_ip: RateLimitConfig::default(),
            sync_enabled: true,
            sync_threshold: 5,
            worker_count: 1,
            worker_poll: Duration::from_secs(5),
            cleanup_every_n_loops: 50,
            job_retention_days: 7,
            evidence_retention_months: None,
            match_threshold: 75,
            suggestion_threshold: 60,
            matcher_deadline: Duration::from_secs(30),
            validity_days: 365,
            internal_api_key: None,
            internal_ip_allowlist: Vec::new(),
            watchlist_path: None,
            refresh_include_peps_default: true,
            enable_audit_log: true,
        }
    }
}

impl ServiceConfig {
    /// Environment resolution; loaded once at process start and passed by
    /// value to components.
    #[must_use]
    pub fn from_env() -> Self {
        let worker_poll_secs =
            env_u64("OPSCREEN_WORKER_POLL_SECONDS", 5).max(MIN_WORKER_POLL_SECONDS);
        Self {
            bind_addr: env_opt("OPSCREEN_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            storage_url: env_opt("OPSCREEN_STORAGE_URL"),
            token_signing_secret: env_opt("OPSCREEN_TOKEN_SIGNING_SECRET"),
            trusted_proxy_ips: env_list("OPSCREEN_TRUSTED_PROXY_IPS")
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            rate_limit_storage_url: env_opt("OPSCREEN_RATE_LIMIT_STORAGE_URL"),
            redis_prefix: env_opt("OPSCREEN_REDIS_PREFIX")
                .unwrap_or_else(|| "opscreen".to_string()),
            rate_limit_per_ip: RateLimitConfig {
                capacity: env_f64("OPSCREEN_RATE_LIMIT_CAPACITY", 30.0),
                refill_per_sec: env_f64("OPSCREEN_RATE_LIMIT_REFILL_PER_SEC", 10.0),
            },
            sync_enabled: env_bool("OPSCREEN_SYNC_ENABLED", true),
            sync_threshold: env_u64("OPSCREEN_SYNC_THRESHOLD", 5),
            worker_count: env_usize("OPSCREEN_WORKER_COUNT", 1).clamp(0, 16),
            worker_poll: Duration::from_secs(worker_poll_secs),
            cleanup_every_n_loops: env_u64("OPSCREEN_CLEANUP_EVERY_N_LOOPS", 50).max(1),
            job_retention_days: env_u64("OPSCREEN_JOB_RETENTION_DAYS", 7).max(1) as i64,
            evidence_retention_months: env::var("OPSCREEN_EVIDENCE_RETENTION_MONTHS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|m| *m >= 1),
            match_threshold: env_u64("OPSCREEN_MATCH_THRESHOLD", 75).min(100) as u8,
            suggestion_threshold: env_u64("OPSCREEN_SUGGESTION_THRESHOLD", 60).min(100) as u8,
            matcher_deadline: Duration::from_secs(
                env_u64("OPSCREEN_MATCHER_DEADLINE_SECONDS", 30).max(1),
            ),
            validity_days: env_u64("OPSCREEN_VALIDITY_DAYS", 365).max(1) as i64,
            internal_api_key: env_opt("OPSCREEN_INTERNAL_API_KEY"),
            internal_ip_allowlist: env_list("OPSCREEN_INTERNAL_IP_ALLOWLIST"),
            watchlist_path: env_opt("OPSCREEN_WATCHLIST_PATH").map(PathBuf::from),
            refresh_include_peps_default: env_bool("OPSCREEN_REFRESH_INCLUDE_PEPS", true),
            enable_audit_log: env_bool("OPSCREEN_ENABLE_AUDIT_LOG", true),
        }
    }
}

pub fn validate_startup_config_contract(cfg: &ServiceConfig) -> Result<(), String> {
    if cfg.bind_addr.trim().is_empty() {
        return Err("bind address must not be empty".to_string());
    }
    if cfg.storage_url.is_some() {
        match &cfg.token_signing_secret {
            None => {
                return Err(
                    "OPSCREEN_TOKEN_SIGNING_SECRET is required when storage is configured"
                        .to_string(),
                )
            }
            Some(secret) if secret.len() < MIN_TOKEN_SECRET_LEN => {
                return Err(format!(
                    "OPSCREEN_TOKEN_SIGNING_SECRET must be at least {MIN_TOKEN_SECRET_LEN} characters"
                ))
            }
            Some(_) => {}
        }
    }
    if cfg.suggestion_threshold >= cfg.match_threshold {
        return Err("suggestion threshold must sit below the match threshold".to_string());
    }
    if cfg.match_threshold == 0 || cfg.match_threshold > 100 {
        return Err("match threshold must be in 1..=100".to_string());
    }
    if cfg.worker_poll < Duration::from_secs(MIN_WORKER_POLL_SECONDS) {
        return Err(format!(
            "worker poll interval must be at least {MIN_WORKER_POLL_SECONDS}s"
        ));
    }
    if cfg.validity_days < 1 {
        return Err("validity window must be at least one day".to_string());
    }
    if cfg.rate_limit_per_ip.capacity <= 0.0 || cfg.rate_limit_per_ip.refill_per_sec <= 0.0 {
        return Err("rate limit capacity and refill must be positive".to_string());
    }
    Ok(())
}

/// Operator-visible resolved configuration; secrets redacted.
#[must_use]
pub fn effective_config_payload(cfg: &ServiceConfig) -> serde_json::Value {
    json!({
        "schema_version": 1,
        "kind": "opscreen_effective_config_v1",
        "bind_addr": &cfg.bind_addr,
        "storage_url": cfg.storage_url.as_ref().map(|_| "<redacted>"),
        "token_signing_secret": cfg.token_signing_secret.as_ref().map(|_| "<redacted>"),
        "trusted_proxy_ips": cfg.trusted_proxy_ips.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "rate_limit_storage_url": cfg.rate_limit_storage_url.as_ref().map(|_| "<redacted>"),
        "rate_limit_per_ip": &cfg.rate_limit_per_ip,
        "sync_enabled": cfg.sync_enabled,
        "sync_threshold": cfg.sync_threshold,
        "worker_count": cfg.worker_count,
        "worker_poll_seconds": cfg.worker_poll.as_secs(),
        "cleanup_every_n_loops": cfg.cleanup_every_n_loops,
        "job_retention_days": cfg.job_retention_days,
        "evidence_retention_months": cfg.evidence_retention_months,
        "match_threshold": cfg.match_threshold,
        "suggestion_threshold": cfg.suggestion_threshold,
        "matcher_deadline_seconds": cfg.matcher_deadline.as_secs(),
        "validity_days": cfg.validity_days,
        "internal_api_key": cfg.internal_api_key.as_ref().map(|_| "<redacted>"),
        "internal_ip_allowlist": &cfg.internal_ip_allowlist,
        "watchlist_path": cfg.watchlist_path.as_ref().map(|p| p.display().to_string()),
        "refresh_include_peps_default": cfg.refresh_include_peps_default,
        "enable_audit_log": cfg.enable_audit_log,
    })
}
