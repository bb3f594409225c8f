//! Sliding-window rate limiter with blacklist escalation.
//!
//! The decision algorithm lives in [`RateLimiter::check_at`] and is shared by
//! every backend. Backends store and count timestamped entries, and admit
//! requests with one atomic count-and-append so concurrent callers cannot
//! overshoot a limit:
//!
//! - [`memory::MemoryStore`]: process-local maps, single instance only
//! - [`sqlite::SqliteStore`]: `request_log` / `blacklist_log` tables
//! - [`redis::RedisStore`]: one sorted set per identity, path and log kind
//!
//! Store failures never block traffic: the limiter logs them and lets the
//! request through.

pub mod memory;
pub mod redis;
pub mod sqlite;

use crate::models::rate_limit::{RateLimitDecision, RateLimitKey, RateLimitPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),
}

pub type StoreResult<T> = Result<T, RateLimitStoreError>;

/// Storage primitives for the request and violation logs.
///
/// Timestamps are Unix milliseconds. Counts include only entries strictly
/// newer than `since_ms`.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn count_requests(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64>;

    /// Atomically drop request entries older than `window_start_ms`, count
    /// those strictly newer, and append `at_ms` only while that count is below
    /// `limit`. Returns whether the request was recorded. Concurrent callers
    /// on the same key must never be admitted past `limit`.
    async fn admit_request(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window_start_ms: i64,
        limit: u64,
        window: Duration,
    ) -> StoreResult<bool>;

    async fn count_violations(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64>;

    /// Append a violation. `window` bounds how long the entry matters.
    async fn record_violation(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window: Duration,
    ) -> StoreResult<()>;
}

/// Route-aware limiter shared by every request.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    routes: Arc<HashMap<String, RateLimitPolicy>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, routes: HashMap<String, RateLimitPolicy>) -> Self {
        Self {
            store,
            routes: Arc::new(routes),
        }
    }

    /// Policy for `path`, if the route is limited at all.
    pub fn policy(&self, path: &str) -> Option<&RateLimitPolicy> {
        self.routes.get(path)
    }

    pub async fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        self.check_at(key, Utc::now()).await
    }

    /// Decide whether the request identified by `key` may proceed at `now`.
    pub async fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> RateLimitDecision {
        let Some(policy) = self.policy(&key.path).copied() else {
            return RateLimitDecision::Allowed;
        };

        match self.evaluate(key, &policy, now.timestamp_millis()).await {
            Ok(decision) => {
                if !decision.is_allowed() {
                    warn!(ip = %key.ip, path = %key.path, ?decision, "request rejected by rate limiter");
                }
                decision
            }
            Err(err) => {
                error!(ip = %key.ip, path = %key.path, error = %err, "rate limit store unavailable, failing open");
                RateLimitDecision::Allowed
            }
        }
    }

    async fn evaluate(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_ms: i64,
    ) -> StoreResult<RateLimitDecision> {
        let window_start = now_ms - millis(policy.window());
        let blacklist_start = now_ms - millis(policy.blacklist_window());

        let violations = self.store.count_violations(key, blacklist_start).await?;
        if violations >= policy.blacklist_threshold {
            return Ok(RateLimitDecision::Blacklisted);
        }

        let admitted = self
            .store
            .admit_request(key, now_ms, window_start, policy.limit, policy.window())
            .await?;
        if !admitted {
            self.store
                .record_violation(key, now_ms, policy.blacklist_window())
                .await?;
            return Ok(RateLimitDecision::Limited {
                retry_after_secs: policy.window_secs,
            });
        }

        Ok(RateLimitDecision::Allowed)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
