use crate::rate_limiter::RateLimitConfig;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Clone, Debug)]
pub(crate) struct RedisPolicy {
    pub timeout: Duration,
    pub retry_attempts: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_open_duration: Duration,
}

impl Default for RedisPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            retry_attempts: 2,
            breaker_failure_threshold: 8,
            breaker_open_duration: Duration::from_millis(3000),
        }
    }
}

#[derive(Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// Shared rate-limit backend: one-second INCR windows with a TTL, behind a
/// timeout, bounded retries, and a circuit breaker. Callers fall back to
/// process-local buckets on any error.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    prefix: String,
    policy: RedisPolicy,
    breaker: Arc<Mutex<BreakerState>>,
}

impl RedisBackend {
    pub(crate) fn new(url: &str, prefix: &str, policy: RedisPolicy) -> Result<Self, String> {
        let client = redis::Client::open(url).map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            policy,
            breaker: Arc::new(Mutex::new(BreakerState::default())),
        })
    }

    async fn breaker_check(&self) -> Result<(), String> {
        let lock = self.breaker.lock().await;
        if let Some(until) = lock.open_until {
            if Instant::now() < until {
                return Err("rate limit backend breaker open".to_string());
            }
        }
        Ok(())
    }

    async fn record_failure(&self, msg: String) -> String {
        let mut lock = self.breaker.lock().await;
        lock.failure_count += 1;
        if lock.failure_count >= self.policy.breaker_failure_threshold {
            lock.open_until = Some(Instant::now() + self.policy.breaker_open_duration);
        }
        msg
    }

    async fn record_success(&self) {
        let mut lock = self.breaker.lock().await;
        lock.failure_count = 0;
        lock.open_until = None;
    }

    async fn with_retry<T, Fut, F>(&self, mut op: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let attempts = self.policy.retry_attempts.max(1);
        let mut last = None;
        for i in 0..attempts {
            match timeout(self.policy.timeout, op()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => last = Some(e),
                Err(_) => last = Some("rate limit backend timeout".to_string()),
            }
            if i + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        Err(last.unwrap_or_else(|| "rate limit backend failure".to_string()))
    }

    /// Atomic increment-and-read over the current one-second window.
    pub(crate) async fn rate_limit_allow(
        &self,
        scope: &str,
        key: &str,
        cfg: &RateLimitConfig,
    ) -> Result<bool, String> {
        self.breaker_check().await?;
        let sec = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| e.to_string())?
            .as_secs();
        let window_key = format!("{}:rl:{scope}:{key}:{sec}", self.prefix);
        let cap = cfg.refill_per_sec.ceil().max(1.0) as i64;
        let this = self.clone();
        let result = self
            .with_retry(move || {
                let this = this.clone();
                let window_key = window_key.clone();
                async move {
                    let mut conn = this
                        .client
                        .get_multiplexed_async_connection()
                        .await
                        .map_err(|e| e.to_string())?;
                    let count: i64 = conn
                        .incr(&window_key, 1_i64)
                        .await
                        .map_err(|e| e.to_string())?;
                    let _: bool = conn
                        .expire(&window_key, 2_i64)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(count <= cap)
                }
            })
            .await;
        match result {
            Ok(decision) => {
                self.record_success().await;
                Ok(decision)
            }
            Err(e) => Err(self.record_failure(e).await),
        }
    }
}
