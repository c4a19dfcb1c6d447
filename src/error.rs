//! Error types for the TRMNL bridge

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::clients::ConnectionState;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], as seen by callers of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request refused by the device's rate limiter; retry later
    AdmissionRefused,
    /// Unknown device or implementation type, or a missing plugin UUID
    Configuration,
    /// Non-2xx response or transport fault talking to the device API
    Remote,
    /// Local fault outside the request path (I/O, config parsing)
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdmissionRefused => "admission_refused",
            Self::Configuration => "configuration",
            Self::Remote => "remote",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the TRMNL bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Device is not configured, or the configured id does not match
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device has exhausted its hourly quota
    #[error("rate limit exceeded for {device_id}, retry in {retry_after_secs:.0} seconds")]
    RateLimited {
        /// Device that was refused
        device_id: String,
        /// Seconds until the oldest admitted request leaves the window
        retry_after_secs: f64,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Client-side precondition not met (e.g. no plugin UUID for a hosted push)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Device API answered with a non-success status
    #[error("remote error (HTTP {status}): {message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Error detail from the response body
        message: String,
    },

    /// Network, timeout or body decoding fault
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Classify this error for callers
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::AdmissionRefused,
            Self::DeviceNotFound(_) | Self::Config(_) | Self::Precondition(_) => {
                ErrorKind::Configuration
            }
            Self::Remote { .. } | Self::Transport(_) | Self::Http(_) => ErrorKind::Remote,
            Self::Io(_) | Self::Serialization(_) | Self::Toml(_) => ErrorKind::Internal,
        }
    }

    /// How long the caller should wait before retrying, if this is an admission refusal
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs_f64(retry_after_secs.max(0.0))),
            _ => None,
        }
    }

    /// Device reachability implied by a failed remote call
    ///
    /// An error status means the device API is offline; a transport fault is
    /// reported as `error`. Other errors never reached the device.
    #[must_use]
    pub const fn connection_state(&self) -> Option<ConnectionState> {
        match self {
            Self::Remote { .. } => Some(ConnectionState::Offline),
            Self::Transport(_) | Self::Http(_) => Some(ConnectionState::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_admission_refusal_with_retry_after() {
        let err = Error::RateLimited {
            device_id: "abc".to_string(),
            retry_after_secs: 90.4,
        };

        assert_eq!(err.kind(), ErrorKind::AdmissionRefused);
        assert_eq!(err.retry_after(), Some(Duration::from_secs_f64(90.4)));
        assert_eq!(
            err.to_string(),
            "rate limit exceeded for abc, retry in 90 seconds"
        );
    }

    #[test]
    fn configuration_errors_have_no_retry_after() {
        for err in [
            Error::DeviceNotFound("abc".to_string()),
            Error::Config("unknown implementation type".to_string()),
            Error::Precondition("plugin UUID not configured".to_string()),
        ] {
            assert_eq!(err.kind(), ErrorKind::Configuration);
            assert!(err.retry_after().is_none());
        }
    }

    #[test]
    fn remote_and_transport_are_remote_kind() {
        let remote = Error::Remote {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(remote.kind(), ErrorKind::Remote);
        assert_eq!(remote.to_string(), "remote error (HTTP 500): boom");

        assert_eq!(
            Error::Transport("timed out".to_string()).kind(),
            ErrorKind::Remote
        );
    }

    #[test]
    fn connection_state_follows_failure_kind() {
        let remote = Error::Remote {
            status: 401,
            message: "HTTP 401".to_string(),
        };
        assert_eq!(remote.connection_state(), Some(ConnectionState::Offline));
        assert_eq!(
            Error::Transport("refused".to_string()).connection_state(),
            Some(ConnectionState::Error)
        );
        assert!(Error::Config("bad".to_string()).connection_state().is_none());
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::AdmissionRefused.to_string(), "admission_refused");
        assert_eq!(ErrorKind::Configuration.to_string(), "configuration");
    }
}
