//! Rate limit policies, keys and decisions.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Sliding-window limit for one route, with blacklist escalation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// Accepted requests allowed per `window_secs`.
    pub limit: u64,
    pub window_secs: u64,
    /// Violations within `blacklist_window_secs` that trigger a hard block.
    pub blacklist_threshold: u64,
    pub blacklist_window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(
        limit: u64,
        window_secs: u64,
        blacklist_threshold: u64,
        blacklist_window_secs: u64,
    ) -> Self {
        Self {
            limit,
            window_secs,
            blacklist_threshold,
            blacklist_window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn blacklist_window(&self) -> Duration {
        Duration::from_secs(self.blacklist_window_secs)
    }

    /// The route table shipped by default. Paths not listed are never limited.
    pub fn default_routes() -> HashMap<String, RateLimitPolicy> {
        let upload = RateLimitPolicy::new(5, 60, 3, 3600);
        HashMap::from([
            ("/api/upload".to_string(), upload),
            ("/api/upload-init".to_string(), upload),
            ("/api/chat".to_string(), RateLimitPolicy::new(5, 60, 3, 3600)),
            ("/api/shorten".to_string(), RateLimitPolicy::new(10, 60, 5, 3600)),
            ("/api/pastes".to_string(), RateLimitPolicy::new(10, 60, 5, 3600)),
        ])
    }
}

/// Identity + route pair every log entry is recorded under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Client address taken from `X-Forwarded-For`; untrusted.
    pub ip: String,
    pub path: String,
}

impl RateLimitKey {
    pub fn new(ip: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            path: path.into(),
        }
    }
}

/// Outcome of a limiter check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Over the window limit (429); carries the window for `Retry-After`.
    Limited { retry_after_secs: u64 },
    /// Too many violations (403).
    Blacklisted,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
