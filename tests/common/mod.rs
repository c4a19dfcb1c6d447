//! Shared test utilities

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use trmnl_bridge::rate_limit::{ManualClock, RateLimiterRegistry};
use trmnl_bridge::{ClientFactory, DeviceConfig, Dispatcher, RateLimitSettings};

/// Dispatcher whose limiters run on a manual clock
#[must_use]
pub fn dispatcher_with_clock() -> (Dispatcher, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let registry = RateLimiterRegistry::with_clock(Arc::new(clock.clone()));
    let dispatcher =
        Dispatcher::with_registry(ClientFactory::new(Duration::from_secs(5)), registry);
    (dispatcher, clock)
}

/// Self-hosted device pointing at a mock server
#[must_use]
pub fn byos_device(device_id: &str, endpoint: &str) -> DeviceConfig {
    DeviceConfig::new(device_id, "generic_byos", endpoint).with_credential("token-1")
}

/// Limiter settings with the given hourly limit
#[must_use]
pub const fn limit(rate_limit_per_hour: u32) -> RateLimitSettings {
    RateLimitSettings {
        rate_limit_per_hour,
        enabled: true,
    }
}
