//! Sliding one-hour admission window for a single device

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::clock::{Clock, SystemClock};

/// Length of the admission window in seconds
pub const WINDOW_SECS: i64 = 3600;

/// Length of the admission window
#[must_use]
pub fn window() -> Duration {
    Duration::seconds(WINDOW_SECS)
}

/// Quota left in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
    /// Rate limiting is disabled for the device
    Unlimited,
    /// Requests still admissible in the trailing hour
    Remaining(u32),
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Remaining(n) => write!(f, "{n}"),
        }
    }
}

/// Point-in-time view of a limiter, computed from a single clock sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStatus {
    /// Device the limiter belongs to
    pub device_id: String,
    /// Configured requests per hour
    pub limit: u32,
    /// Whether limiting is active
    pub enabled: bool,
    /// Quota left in the window
    pub remaining: Quota,
    /// When the oldest retained request leaves the window
    pub reset_at: Option<DateTime<Utc>>,
    /// Seconds until the next request would be admitted
    pub wait_seconds: f64,
}

/// Per-device rate limiter
///
/// Keeps the timestamps of admitted requests from the trailing hour. Entries
/// are pruned against a single clock sample before any read or write.
#[derive(Debug)]
pub struct RateLimiter {
    device_id: String,
    limit: u32,
    enabled: bool,
    history: VecDeque<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter driven by the system clock
    #[must_use]
    pub fn new(device_id: impl Into<String>, limit: u32, enabled: bool) -> Self {
        Self::with_clock(device_id, limit, enabled, Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock
    #[must_use]
    pub fn with_clock(
        device_id: impl Into<String>,
        limit: u32,
        enabled: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            limit,
            enabled,
            history: VecDeque::new(),
            clock,
        }
    }

    /// Device this limiter belongs to
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Configured requests per hour
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether limiting is active
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Change the hourly limit; history is kept
    pub const fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }

    /// Turn limiting on or off; history is kept
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether a request may be sent now
    ///
    /// This is a query only: the caller must [`record`](Self::record) once
    /// the request has durably succeeded.
    pub fn admit(&mut self) -> bool {
        let now = self.clock.now();
        self.admit_at(now)
    }

    /// Record an admitted request at the current instant
    pub fn record(&mut self) {
        let now = self.clock.now();
        self.prune(now);
        self.history.push_back(now);
    }

    /// Requests still admissible in the trailing hour
    pub fn remaining_quota(&mut self) -> Quota {
        let now = self.clock.now();
        self.remaining_at(now)
    }

    /// Instant at which the oldest retained request leaves the window
    pub fn reset_deadline(&mut self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.reset_deadline_at(now)
    }

    /// Seconds to wait before the next request would be admitted
    pub fn wait_seconds(&mut self) -> f64 {
        let now = self.clock.now();
        self.wait_seconds_at(now)
    }

    /// Snapshot of the limiter from one clock sample
    pub fn status(&mut self) -> LimiterStatus {
        let now = self.clock.now();
        LimiterStatus {
            device_id: self.device_id.clone(),
            limit: self.limit,
            enabled: self.enabled,
            remaining: self.remaining_at(now),
            reset_at: self.reset_deadline_at(now),
            wait_seconds: self.wait_seconds_at(now),
        }
    }

    /// Log the remaining quota at debug level
    pub fn log_status(&mut self) {
        if !self.enabled {
            tracing::debug!(device_id = %self.device_id, "rate limiting disabled");
            return;
        }

        let remaining = self.remaining_quota();
        tracing::debug!(
            device_id = %self.device_id,
            remaining = %remaining,
            limit = self.limit,
            "requests remaining in current hour"
        );
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - window();
        // History is chronological, so expired entries are all at the front
        while self.history.front().is_some_and(|t| *t <= cutoff) {
            self.history.pop_front();
        }
    }

    fn admit_at(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        !self.enabled || self.history.len() < self.limit as usize
    }

    fn remaining_at(&mut self, now: DateTime<Utc>) -> Quota {
        self.prune(now);
        if !self.enabled {
            return Quota::Unlimited;
        }
        let used = u32::try_from(self.history.len()).unwrap_or(u32::MAX);
        Quota::Remaining(self.limit.saturating_sub(used))
    }

    fn reset_deadline_at(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.prune(now);
        self.history.front().map(|oldest| *oldest + window())
    }

    fn wait_seconds_at(&mut self, now: DateTime<Utc>) -> f64 {
        if self.admit_at(now) {
            return 0.0;
        }

        // A negative span (clock skew) floors to zero
        self.reset_deadline_at(now)
            .and_then(|reset| (reset - now).to_std().ok())
            .map_or(0.0, |wait| wait.as_secs_f64())
    }
}
