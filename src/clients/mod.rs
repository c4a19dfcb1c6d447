//! Device API clients
//!
//! Each protocol flavor implements the `DeviceClient` trait so the dispatcher
//! can drive hosted and self-hosted displays the same way.

mod byos;
mod factory;
mod hosted;
mod http;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use byos::{ByosClient, TerminusClient};
pub use factory::ClientFactory;
pub use hosted::HostedClient;
pub use http::Session;

use crate::Error;

/// Implementation types a device can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplementationType {
    /// Hosted TRMNL service (usetrmnl.com)
    Standard,
    /// Terminus self-hosted server
    Terminus,
    /// Any other BYOS server
    GenericByos,
}

impl ImplementationType {
    /// Configuration tag for this type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Terminus => "terminus",
            Self::GenericByos => "generic_byos",
        }
    }
}

impl FromStr for ImplementationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "terminus" => Ok(Self::Terminus),
            "generic_byos" => Ok(Self::GenericByos),
            other => Err(Error::Config(format!("unknown implementation type: {other}"))),
        }
    }
}

impl fmt::Display for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How pushed variables combine with what the device already has
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Recursively merge into existing variables
    #[default]
    DeepMerge,
    /// Append to a stream of values
    Stream,
}

impl MergeStrategy {
    /// Wire name of the strategy
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeepMerge => "deep_merge",
            Self::Stream => "stream",
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deep_merge" => Ok(Self::DeepMerge),
            "stream" => Ok(Self::Stream),
            other => Err(Error::Config(format!("unknown merge strategy: {other}"))),
        }
    }
}

/// Reachability reported by a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Device API answered
    Online,
    /// Device API answered with an error status
    Offline,
    /// Device API could not be reached
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a device is currently showing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    /// Reachability
    pub state: ConnectionState,
    /// Device the status belongs to
    pub device_id: String,
    /// Image currently on screen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Refresh rate in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<u64>,
    /// Rendered file name (hosted service only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Payload of a successful operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Image or variables accepted by the device API
    Pushed {
        /// Human-readable summary
        message: String,
        /// Image that was pushed, for image pushes
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        /// Response body; empty when the API returned no JSON
        response: Value,
    },
    /// Current device status
    Status(DeviceStatus),
    /// Connection test passed
    Connected,
}

/// Why an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Client-side precondition not met; no request was sent
    Precondition,
    /// Device API answered with a non-success status
    Remote {
        /// HTTP status code
        status: u16,
    },
    /// Request could not complete or the body could not be decoded
    Transport,
}

/// A failed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure classification
    pub kind: FailureKind,
    /// Error detail
    pub message: String,
}

impl Failure {
    /// Precondition failure
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Precondition,
            message: message.into(),
        }
    }

    /// Non-success HTTP status
    #[must_use]
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Remote { status },
            message: message.into(),
        }
    }

    /// Network or decoding fault
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }

    /// Reachability implied by this failure
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        match self.kind {
            FailureKind::Remote { .. } => ConnectionState::Offline,
            FailureKind::Precondition | FailureKind::Transport => ConnectionState::Error,
        }
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure.kind {
            FailureKind::Precondition => Self::Precondition(failure.message),
            FailureKind::Remote { status } => Self::Remote {
                status,
                message: failure.message,
            },
            FailureKind::Transport => Self::Transport(failure.message),
        }
    }
}

/// Outcome of a device operation
///
/// Remote-side problems are reported here rather than as errors, so every
/// client call completes with a value.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Operation succeeded
    Success(Payload),
    /// Operation failed
    Failure(Failure),
}

impl OperationResult {
    /// Whether the operation succeeded
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert into a `Result`, mapping failures onto [`Error`]
    ///
    /// # Errors
    ///
    /// Returns the failure as an [`Error`]
    pub fn into_result(self) -> crate::Result<Payload> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Failure(failure) => Err(failure.into()),
        }
    }
}

impl From<Failure> for OperationResult {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

/// Trait for device API clients
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Client flavor name
    fn name(&self) -> &'static str;

    /// Device this client talks to
    fn device_id(&self) -> &str;

    /// Show an image on the device
    async fn push_image(&self, image_url: &str, refresh_rate: Option<u32>) -> OperationResult;

    /// Push template merge variables
    async fn push_variables(
        &self,
        variables: &Map<String, Value>,
        merge_strategy: MergeStrategy,
    ) -> OperationResult;

    /// Query what the device is showing
    async fn get_status(&self) -> OperationResult;

    /// Check that the device API is reachable and accepts our credentials
    async fn test_connection(&self) -> bool;

    /// Release the underlying HTTP session
    ///
    /// Safe to call more than once; a later request opens a new session.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implementation_type_round_trips_tags() {
        for ty in [
            ImplementationType::Standard,
            ImplementationType::Terminus,
            ImplementationType::GenericByos,
        ] {
            assert_eq!(ty.as_str().parse::<ImplementationType>().unwrap(), ty);
        }
        assert!("byos".parse::<ImplementationType>().is_err());
    }

    #[test]
    fn merge_strategy_parses_wire_names() {
        assert_eq!("deep_merge".parse::<MergeStrategy>().unwrap(), MergeStrategy::DeepMerge);
        assert_eq!("stream".parse::<MergeStrategy>().unwrap(), MergeStrategy::Stream);
        assert!("replace".parse::<MergeStrategy>().is_err());
        assert_eq!(MergeStrategy::default(), MergeStrategy::DeepMerge);
    }

    #[test]
    fn failures_map_to_errors_and_states() {
        let remote = Failure::remote(500, "boom");
        assert_eq!(remote.connection_state(), ConnectionState::Offline);
        assert!(matches!(
            Error::from(remote),
            Error::Remote { status: 500, .. }
        ));

        let transport = Failure::transport("refused");
        assert_eq!(transport.connection_state(), ConnectionState::Error);
        assert!(matches!(Error::from(transport), Error::Transport(_)));

        let pre = Failure::precondition("no plugin");
        assert_eq!(
            Error::from(pre).kind(),
            crate::error::ErrorKind::Configuration
        );
    }

    #[test]
    fn operation_result_into_result() {
        let ok = OperationResult::Success(Payload::Connected);
        assert!(ok.success());
        assert_eq!(ok.into_result().unwrap(), Payload::Connected);

        let failed = OperationResult::from(Failure::transport("timed out"));
        assert!(!failed.success());
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = Payload::Status(DeviceStatus {
            state: ConnectionState::Online,
            device_id: "dev-1".to_string(),
            image_url: Some("https://example.com/a.png".to_string()),
            refresh_rate: Some(900),
            filename: None,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "status");
        assert_eq!(json["state"], "online");
        assert_eq!(json["refresh_rate"], 900);
        assert!(json.get("filename").is_none());
    }
}
