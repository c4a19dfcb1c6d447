//! TRMNL Bridge - Rate-limited content pushes to TRMNL e-ink displays
//!
//! This library provides:
//! - Per-device sliding-window admission control
//! - Clients for the hosted TRMNL service and self-hosted (BYOS) servers
//! - A dispatcher that ties both together behind one entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Callers                           │
//! │        CLI  │  stdin command loop  │  ...            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Dispatcher                          │
//! │  Device table │ Rate limiter registry │ Factory      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Device clients                        │
//! │   Hosted (usetrmnl.com) │ Terminus │ Generic BYOS   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod rate_limit;

pub use clients::{
    ClientFactory, ConnectionState, DeviceClient, DeviceStatus, Failure, FailureKind,
    ImplementationType, MergeStrategy, OperationResult, Payload,
};
pub use config::{Config, DeviceConfig, RateLimitSettings};
pub use dispatcher::{Dispatcher, Operation};
pub use error::{Error, ErrorKind, Result};
pub use rate_limit::{LimiterStatus, Quota, RateLimiter, RateLimiterRegistry};
