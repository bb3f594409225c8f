//! Rate limit store on Redis sorted sets.
//!
//! Each `(kind, path, ip)` gets a sorted set scored by millisecond timestamp.
//! Members carry a random suffix so two hits in the same millisecond both
//! count. Keys expire one window after their last write, so idle clients
//! leave nothing behind.

use super::{RateLimitStore, StoreResult};
use crate::models::rate_limit::RateLimitKey;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Prune, count and conditionally append in one server-side step.
///
/// KEYS[1] = request log
/// ARGV[1] = timestamp (ms)
/// ARGV[2] = window start (ms); entries at or before it do not count
/// ARGV[3] = limit
/// ARGV[4] = member
/// ARGV[5] = ttl (ms)
///
/// Returns 1 when the request was recorded, 0 when over the limit.
const ADMIT_SCRIPT: &str = r#"
    local log_key = KEYS[1]
    local window_start = ARGV[2]

    redis.call('ZREMRANGEBYSCORE', log_key, '-inf', '(' .. window_start)
    local count = redis.call('ZCOUNT', log_key, '(' .. window_start, '+inf')
    if count >= tonumber(ARGV[3]) then
        return 0
    end

    redis.call('ZADD', log_key, ARGV[1], ARGV[4])
    redis.call('PEXPIRE', log_key, ARGV[5])
    return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> StoreResult<Self> {
        info!(url = %mask_redis_url(url), "Connecting to Redis rate limit store");
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn requests_key(&self, key: &RateLimitKey) -> String {
        log_key(&self.key_prefix, "requests", key)
    }

    fn violations_key(&self, key: &RateLimitKey) -> String {
        log_key(&self.key_prefix, "blacklist", key)
    }

    async fn count_after(&self, set: &str, since_ms: i64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        // `(` makes the lower bound exclusive.
        let count: u64 = conn.zcount(set, format!("({}", since_ms), "+inf").await?;
        Ok(count)
    }

    async fn append(&self, set: &str, at_ms: i64, window: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let member = log_member(at_ms);
        let ttl_ms = ttl_millis(window);
        let _: () = redis::pipe()
            .atomic()
            .zadd(set, member, at_ms)
            .ignore()
            .pexpire(set, ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

fn log_member(at_ms: i64) -> String {
    format!("{}-{}", at_ms, Uuid::new_v4().simple())
}

fn ttl_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn log_key(prefix: &str, kind: &str, key: &RateLimitKey) -> String {
    format!("{}{}:{}:{}", prefix, kind, key.path, key.ip)
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn count_requests(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        self.count_after(&self.requests_key(key), since_ms).await
    }

    async fn admit_request(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window_start_ms: i64,
        limit: u64,
        window: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let admitted: i64 = redis::Script::new(ADMIT_SCRIPT)
            .key(self.requests_key(key))
            .arg(at_ms)
            .arg(window_start_ms)
            .arg(limit)
            .arg(log_member(at_ms))
            .arg(ttl_millis(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }

    async fn count_violations(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        self.count_after(&self.violations_key(key), since_ms).await
    }

    async fn record_violation(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window: Duration,
    ) -> StoreResult<()> {
        self.append(&self.violations_key(key), at_ms, window).await
    }
}
