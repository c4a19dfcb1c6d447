//! Per-device request admission
//!
//! Each device gets a sliding one-hour window of admitted requests. The
//! registry hands out shared limiter handles and applies settings changes.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            RateLimiterRegistry               │
//! │   device id ──► Arc<Mutex<RateLimiter>>      │
//! ├──────────────────────────────────────────────┤
//! │  RateLimiter: history of admitted requests   │
//! │  pruned to the trailing hour on every query  │
//! └──────────────────────────────────────────────┘
//! ```

mod clock;
mod limiter;
mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{LimiterStatus, Quota, RateLimiter, WINDOW_SECS, window};
pub use registry::{RateLimiterRegistry, SharedLimiter};
