use crate::redis_backend::RedisBackend;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30.0,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token buckets with an optional shared backend. When the shared
/// backend errors or is absent the process-local buckets decide.
pub struct RateLimiter {
    scope: String,
    buckets: Mutex<HashMap<String, Bucket>>,
    shared: Option<RedisBackend>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(shared: Option<RedisBackend>, scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            buckets: Mutex::new(HashMap::new()),
            shared,
        }
    }

    pub async fn allow(&self, key: &str, cfg: &RateLimitConfig) -> bool {
        if let Some(shared) = &self.shared {
            match shared.rate_limit_allow(&self.scope, key, cfg).await {
                Ok(decision) => return decision,
                Err(e) => {
                    warn!(scope = %self.scope, "shared rate limit backend unavailable, using local buckets: {e}");
                }
            }
        }
        let now = Instant::now();
        let mut lock = self.buckets.lock().await;
        let bucket = lock.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: cfg.capacity,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + (elapsed * cfg.refill_per_sec)).min(cfg.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds a rejected caller should wait before retrying.
    #[must_use]
    pub fn retry_after_hint(cfg: &RateLimitConfig) -> u64 {
        (1.0 / cfg.refill_per_sec.max(0.001)).ceil() as u64
    }
}

const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Soft backoff policy for repeated failed logins; no hard lockout.
#[must_use]
pub fn login_backoff_seconds(failed_count: usize) -> u64 {
    if failed_count >= 10 {
        600
    } else if failed_count >= 8 {
        120
    } else if failed_count >= 5 {
        30
    } else {
        0
    }
}

/// Per-account failed-login tracking over a sliding 15-minute window. The
/// login endpoint itself lives with the auth collaborator; this is the
/// policy state it consults.
#[derive(Default)]
pub struct LoginBackoff {
    failures: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LoginBackoff {
    pub async fn record_failure(&self, account: &str) {
        let mut lock = self.failures.lock().await;
        let entry = lock.entry(account.to_ascii_lowercase()).or_default();
        let now = Instant::now();
        entry.retain(|at| now.duration_since(*at) < LOGIN_WINDOW);
        entry.push(now);
    }

    pub async fn record_success(&self, account: &str) {
        self.failures.lock().await.remove(&account.to_ascii_lowercase());
    }

    /// Remaining delay before the account may attempt another login.
    pub async fn remaining_delay(&self, account: &str) -> Duration {
        let mut lock = self.failures.lock().await;
        let Some(entry) = lock.get_mut(&account.to_ascii_lowercase()) else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        entry.retain(|at| now.duration_since(*at) < LOGIN_WINDOW);
        let delay = login_backoff_seconds(entry.len());
        if delay == 0 {
            return Duration::ZERO;
        }
        let last = match entry.last() {
            Some(at) => *at,
            None => return Duration::ZERO,
        };
        let release = last + Duration::from_secs(delay);
        release.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buckets_refill_over_time() {
        let limiter = RateLimiter::new(None, "test");
        let cfg = RateLimitConfig {
            capacity: 2.0,
            refill_per_sec: 1000.0,
        };
        assert!(limiter.allow("1.2.3.4", &cfg).await);
        assert!(limiter.allow("1.2.3.4", &cfg).await);
        assert!(!limiter.allow("1.2.3.4", &cfg).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(limiter.allow("1.2.3.4", &cfg).await, "bucket must refill");
    }

    #[tokio::test]
    async fn buckets_are_partitioned_by_key() {
        let limiter = RateLimiter::new(None, "test");
        let cfg = RateLimitConfig {
            capacity: 1.0,
            refill_per_sec: 0.001,
        };
        assert!(limiter.allow("1.1.1.1", &cfg).await);
        assert!(!limiter.allow("1.1.1.1", &cfg).await);
        assert!(limiter.allow("2.2.2.2", &cfg).await);
    }

    #[test]
    fn backoff_policy_steps() {
        assert_eq!(login_backoff_seconds(4), 0);
        assert_eq!(login_backoff_seconds(5), 30);
        assert_eq!(login_backoff_seconds(8), 120);
        assert_eq!(login_backoff_seconds(10), 600);
        assert_eq!(login_backoff_seconds(25), 600);
    }

    #[tokio::test]
    async fn login_backoff_engages_after_five_failures() {
        let backoff = LoginBackoff::default();
        for _ in 0..4 {
            backoff.record_failure("user@example.test").await;
        }
        assert_eq!(
            backoff.remaining_delay("user@example.test").await,
            Duration::ZERO
        );
        backoff.record_failure("user@example.test").await;
        let delay = backoff.remaining_delay("USER@example.test").await;
        assert!(delay > Duration::from_secs(25) && delay <= Duration::from_secs(30));

        backoff.record_success("user@example.test").await;
        assert_eq!(
            backoff.remaining_delay("user@example.test").await,
            Duration::ZERO
        );
    }
}
