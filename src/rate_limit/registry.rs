//! Process-wide mapping from device id to its rate limiter

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use super::clock::{Clock, SystemClock};
use super::limiter::RateLimiter;

/// Shared handle to one device's limiter
///
/// The async mutex lets a caller hold the limiter across the remote call so
/// that admission and recording happen as one step for that device.
pub type SharedLimiter = Arc<AsyncMutex<RateLimiter>>;

/// Registry of per-device rate limiters
///
/// The map itself sits behind a short-lived lock; each limiter has its own
/// lock, so unrelated devices never contend.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, SharedLimiter>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiterRegistry {
    /// Create a registry whose limiters use the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a registry whose limiters use the given clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Get the limiter for a device, creating it with the given defaults
    ///
    /// Defaults only apply on creation; an existing limiter is returned as is.
    pub fn get(&self, device_id: &str, default_limit: u32, default_enabled: bool) -> SharedLimiter {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(limiter) = limiters.get(device_id) {
            return Arc::clone(limiter);
        }

        tracing::debug!(
            device_id,
            limit = default_limit,
            enabled = default_enabled,
            "creating rate limiter"
        );
        let limiter = Arc::new(AsyncMutex::new(RateLimiter::with_clock(
            device_id,
            default_limit,
            default_enabled,
            Arc::clone(&self.clock),
        )));
        limiters.insert(device_id.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Look up a limiter without creating one
    pub fn find(&self, device_id: &str) -> Option<SharedLimiter> {
        let limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters.get(device_id).cloned()
    }

    /// Update an existing limiter's settings in place
    ///
    /// Does nothing if the device has no limiter yet; one is created lazily on
    /// first use with whatever settings are current then.
    pub async fn update(&self, device_id: &str, limit: Option<u32>, enabled: Option<bool>) {
        let Some(limiter) = self.find(device_id) else {
            tracing::debug!(device_id, "no limiter to update");
            return;
        };

        let mut limiter = limiter.lock().await;
        if let Some(limit) = limit {
            limiter.set_limit(limit);
        }
        if let Some(enabled) = enabled {
            limiter.set_enabled(enabled);
        }
        tracing::debug!(
            device_id,
            limit = limiter.limit(),
            enabled = limiter.enabled(),
            "rate limiter updated"
        );
    }

    /// Number of devices with a limiter
    pub fn len(&self) -> usize {
        self.limiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no limiter has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
