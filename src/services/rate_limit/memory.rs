//! In-memory rate limit store.
//!
//! Counters live in this process only, so two instances behind a load
//! balancer each see half the traffic. Use it for tests and single-node runs.
//!
//! Both logs sit behind one mutex, which makes every operation atomic. Keys
//! whose newest entry has aged out are purged at most once per
//! [`PURGE_INTERVAL_MS`], so identities that stop sending cost nothing.

use super::{RateLimitStore, StoreResult};
use crate::models::rate_limit::RateLimitKey;
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

/// Minimum spacing between sweeps of expired keys.
pub const PURGE_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Default)]
struct Entries {
    stamps: VecDeque<i64>,
    /// After this instant no entry can be counted again.
    expires_at_ms: i64,
}

impl Entries {
    fn count_after(&self, since_ms: i64) -> u64 {
        self.stamps.iter().filter(|&&ts| ts > since_ms).count() as u64
    }

    fn push(&mut self, at_ms: i64, window: Duration) {
        self.stamps.push_back(at_ms);
        self.expires_at_ms = self.expires_at_ms.max(at_ms.saturating_add(millis(window)));
    }
}

#[derive(Debug, Default)]
struct Logs {
    requests: HashMap<RateLimitKey, Entries>,
    violations: HashMap<RateLimitKey, Entries>,
    next_purge_ms: i64,
}

impl Logs {
    fn purge_expired(&mut self, now_ms: i64) {
        if now_ms < self.next_purge_ms {
            return;
        }
        self.requests.retain(|_, e| e.expires_at_ms > now_ms);
        self.violations.retain(|_, e| e.expires_at_ms > now_ms);
        self.next_purge_ms = now_ms.saturating_add(PURGE_INTERVAL_MS);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    logs: Arc<Mutex<Logs>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities currently tracked across both logs.
    pub async fn tracked_keys(&self) -> usize {
        let logs = self.logs.lock().await;
        logs.requests.len() + logs.violations.len()
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn count_requests(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        let logs = self.logs.lock().await;
        Ok(logs.requests.get(key).map_or(0, |e| e.count_after(since_ms)))
    }

    async fn admit_request(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window_start_ms: i64,
        limit: u64,
        window: Duration,
    ) -> StoreResult<bool> {
        let mut logs = self.logs.lock().await;
        logs.purge_expired(at_ms);

        let entries = logs.requests.entry(key.clone()).or_default();
        entries.stamps.retain(|&ts| ts >= window_start_ms);
        let admitted = entries.count_after(window_start_ms) < limit;
        if admitted {
            entries.push(at_ms, window);
        } else if entries.stamps.is_empty() {
            logs.requests.remove(key);
        }
        Ok(admitted)
    }

    async fn count_violations(&self, key: &RateLimitKey, since_ms: i64) -> StoreResult<u64> {
        let logs = self.logs.lock().await;
        Ok(logs.violations.get(key).map_or(0, |e| e.count_after(since_ms)))
    }

    async fn record_violation(
        &self,
        key: &RateLimitKey,
        at_ms: i64,
        window: Duration,
    ) -> StoreResult<()> {
        let mut logs = self.logs.lock().await;
        logs.purge_expired(at_ms);

        let entries = logs.violations.entry(key.clone()).or_default();
        let horizon = at_ms.saturating_sub(millis(window));
        entries.stamps.retain(|&ts| ts > horizon);
        entries.push(at_ms, window);
        Ok(())
    }
}
