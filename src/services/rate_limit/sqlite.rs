//! Rate limit store backed by the `request_log` and `blacklist_log` tables.

use super::{RateLimitStore, StoreResult};
use crate::models::rate_limit::RateLimitKey;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<SqlitePool>,
}

impl SqliteStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn count_requests(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM request_log WHERE ip = ? AND path = ? AND timestamp > ?",
        )
        .bind(&key.ip)
        .bind(&key.path)
        .bind(since_ms)
        .fetch_one(&*self.db)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Runs in one `BEGIN IMMEDIATE` transaction: the write lock is taken
    /// before counting, so concurrent admissions on any connection queue
    /// behind it instead of reading the same count.
    ///
    /// Pruning covers the whole route, not just this identity: every caller
    /// of the route shares the same window length.
    async fn admit_request(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window_start_ms: i64,
        limit: u64,
        _window: Duration,
    ) -> StoreResult<bool> {
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;

        sqlx::query("DELETE FROM request_log WHERE path = ? AND timestamp < ?")
            .bind(&key.path)
            .bind(window_start_ms)
            .execute(&mut *tx)
            .await?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM request_log WHERE ip = ? AND path = ? AND timestamp > ?",
        )
        .bind(&key.ip)
        .bind(&key.path)
        .bind(window_start_ms)
        .fetch_one(&mut *tx)
        .await?;

        let admitted = (count.max(0) as u64) < limit;
        if admitted {
            sqlx::query("INSERT INTO request_log (ip, path, timestamp) VALUES (?, ?, ?)")
                .bind(&key.ip)
                .bind(&key.path)
                .bind(at_ms)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(admitted)
    }

    async fn count_violations(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM blacklist_log WHERE ip = ? AND path = ? AND timestamp > ?",
        )
        .bind(&key.ip)
        .bind(&key.path)
        .bind(since_ms)
        .fetch_one(&*self.db)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn record_violation(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        _window: Duration,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO blacklist_log (ip, path, timestamp) VALUES (?, ?, ?)")
            .bind(&key.ip)
            .bind(&key.path)
            .bind(at_ms)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}
