//! Per-client admission control for the read path.
//!
//! Uses the generic cell rate algorithm (GCRA): each key stores a single
//! "theoretical arrival time" (TAT). A request is admitted when the TAT,
//! advanced by one emission interval, stays within `burst` intervals of now.
//! Check and consume are one atomic step against the store, so concurrent
//! callers cannot overdraw the budget.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config_loader::RateLimitConfig;
use crate::errors::{LoggerError, LoggerResult};

/// Prepended to the client IP to form the store key.
pub const KEY_PREFIX: &str = "rate_limit:";

/// `rate` permits per `period`, with up to `burst` in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub rate: u32,
    pub burst: u32,
    pub period: Duration,
}

impl Limit {
    pub fn per_minute(rate: u32, burst: u32) -> Self {
        Self {
            rate,
            burst,
            period: Duration::from_secs(60),
        }
    }

    /// Time one permit takes to replenish.
    pub fn emission_interval(&self) -> Duration {
        self.period / self.rate.max(1)
    }
}

impl From<&RateLimitConfig> for Limit {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            rate: config.rate,
            burst: config.burst,
            period: Duration::from_secs(config.period_secs),
        }
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Set when rejected: how long until one permit is available.
    pub retry_after: Option<Duration>,
    /// How long until the budget is fully replenished.
    pub reset_after: Duration,
}

impl RateDecision {
    /// Retry-after rounded up to whole seconds, as sent to clients.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }
}

fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

fn from_micros(us: i64) -> Duration {
    Duration::from_micros(u64::try_from(us).unwrap_or(0))
}

/// One GCRA step. Times are microseconds on any monotonic scale. Returns the
/// decision and, when admitted, the TAT to store.
pub fn evaluate(now: i64, stored_tat: Option<i64>, limit: &Limit) -> (RateDecision, Option<i64>) {
    let interval = micros(limit.emission_interval()).max(1);
    let tolerance = interval.saturating_mul(i64::from(limit.burst));

    let tat = stored_tat.unwrap_or(now).max(now);
    let new_tat = tat + interval;
    let allow_at = new_tat - tolerance;
    let diff = now - allow_at;

    if diff < 0 {
        let decision = RateDecision {
            allowed: false,
            remaining: 0,
            retry_after: Some(from_micros(-diff)),
            reset_after: from_micros(tat - now),
        };
        return (decision, None);
    }

    let decision = RateDecision {
        allowed: true,
        remaining: u32::try_from(diff / interval).unwrap_or(u32::MAX),
        retry_after: None,
        reset_after: from_micros(new_tat - now),
    };
    (decision, Some(new_tat))
}

/// Shared counting store. `allow` must check and consume atomically.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn allow(&self, key: &str, limit: &Limit) -> LoggerResult<RateDecision>;

    /// Forget keys whose budget is fully replenished, returning how many were
    /// dropped. Redis expires its keys itself.
    async fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Single-instance store keeping TATs in memory.
pub struct MemoryRateLimitStore {
    base: Instant,
    tats: RwLock<HashMap<String, i64>>,
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            tats: RwLock::new(HashMap::new()),
        }
    }

    /// Keys currently held.
    pub async fn tracked_keys(&self) -> usize {
        self.tats.read().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn allow(&self, key: &str, limit: &Limit) -> LoggerResult<RateDecision> {
        let mut tats = self.tats.write().await;
        let now = micros(self.base.elapsed());

        let (decision, new_tat) = evaluate(now, tats.get(key).copied(), limit);
        if let Some(tat) = new_tat {
            tats.insert(key.to_string(), tat);
        }
        Ok(decision)
    }

    async fn cleanup_expired(&self) -> usize {
        let now = micros(self.base.elapsed());
        let mut tats = self.tats.write().await;
        let before = tats.len();
        tats.retain(|_, tat| *tat > now);
        before - tats.len()
    }
}

// Same algorithm as `evaluate`, in milliseconds of server time. Values are
// formatted with %d so large timestamps are stored without exponent notation.
const GCRA_SCRIPT: &str = r#"
redis.replicate_commands()

local key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])

local interval = math.max(math.floor(period / rate), 1)
local tolerance = interval * burst

local time = redis.call("TIME")
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local tat = tonumber(redis.call("GET", key) or now)
if tat < now then
  tat = now
end

local new_tat = tat + interval
local diff = now - (new_tat - tolerance)

if diff < 0 then
  return {0, 0, -diff, tat - now}
end

local reset_after = new_tat - now
redis.call("SET", key, string.format("%d", new_tat), "PX", math.max(reset_after, 1))
return {1, math.floor(diff / interval), -1, reset_after}
"#;

/// Redis-backed store shared by every service instance.
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(GCRA_SCRIPT),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn allow(&self, key: &str, limit: &Limit) -> LoggerResult<RateDecision> {
        let mut conn = self.conn.clone();
        let period_ms = u64::try_from(limit.period.as_millis()).unwrap_or(u64::MAX);

        let (allowed, remaining, retry_ms, reset_ms): (i64, i64, i64, i64) = self
            .script
            .key(key)
            .arg(limit.burst)
            .arg(limit.rate.max(1))
            .arg(period_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LoggerError::cache("rate limit check", e))?;

        let to_duration = |ms: i64| Duration::from_millis(u64::try_from(ms).unwrap_or(0));
        Ok(RateDecision {
            allowed: allowed == 1,
            remaining: u32::try_from(remaining).unwrap_or(0),
            retry_after: (allowed != 1).then(|| to_duration(retry_ms)),
            reset_after: to_duration(reset_ms),
        })
    }
}

/// Per-client admission control for the read endpoint.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limit: Limit,
}

impl RateLimiter {
    /// Limiter applying `limit` to every client through `store`.
    pub fn new(store: Arc<dyn RateLimitStore>, limit: Limit) -> Self {
        Self { store, limit }
    }

    /// The limit applied to each client.
    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Check and consume one permit for `client_ip`.
    pub async fn check(&self, client_ip: &str) -> LoggerResult<RateDecision> {
        let key = format!("{KEY_PREFIX}{client_ip}");
        self.store.allow(&key, &self.limit).await
    }
}

/// Caller identity: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// transport peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn small_limit() -> Limit {
        Limit {
            rate: 3,
            burst: 3,
            period: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), small_limit());

        let remaining: Vec<u32> = [
            limiter.check("10.0.0.1").await.unwrap(),
            limiter.check("10.0.0.1").await.unwrap(),
            limiter.check("10.0.0.1").await.unwrap(),
        ]
        .iter()
        .map(|d| {
            assert!(d.allowed);
            d.remaining
        })
        .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check("10.0.0.1").await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());
        assert_eq!(denied.retry_after_secs(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window_rolls_over() {
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), small_limit());
        for _ in 0..3 {
            assert!(limiter.check("client1").await.unwrap().allowed);
        }
        assert!(!limiter.check("client1").await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(1)).await;
        let decision = limiter.check("client1").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_keys_are_independent() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = RateLimiter::new(store.clone(), small_limit());
        for _ in 0..3 {
            limiter.check("client1").await.unwrap();
        }
        assert!(!limiter.check("client1").await.unwrap().allowed);
        assert!(limiter.check("client2").await.unwrap().allowed);
        assert_eq!(store.tracked_keys().await, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.cleanup_expired().await, 2);
        assert_eq!(store.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn concurrent_checks_never_overdraw() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryRateLimitStore::new()),
            Limit::per_minute(10, 10),
        ));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check("burst").await.unwrap().allowed
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn gcra_retry_after_is_one_interval_when_exhausted() {
        let limit = Limit {
            rate: 10,
            burst: 1,
            period: Duration::from_secs(1),
        };
        let (first, tat) = evaluate(0, None, &limit);
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let (second, none) = evaluate(0, tat, &limit);
        assert!(!second.allowed);
        assert!(none.is_none());
        assert_eq!(second.retry_after, Some(Duration::from_millis(100)));

        let (third, _) = evaluate(100_000, tat, &limit);
        assert!(third.allowed);
    }

    #[test]
    fn client_ip_prefers_forwarding_headers() {
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "192.168.1.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "10.1.1.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.2"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.5");
    }
}
