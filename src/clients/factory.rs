//! Maps implementation-type tags to client implementations

use std::sync::Arc;
use std::time::Duration;

use super::{ByosClient, DeviceClient, HostedClient, ImplementationType, TerminusClient};
use crate::config::{DEFAULT_REQUEST_TIMEOUT, DeviceConfig};

/// Builds device clients
///
/// Construction never touches the network; sessions open on first request.
#[derive(Debug, Clone, Copy)]
pub struct ClientFactory {
    timeout: Duration,
}

impl ClientFactory {
    /// Create a factory whose clients use the given request timeout
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Request timeout handed to new clients
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create the client for a declared implementation type
    ///
    /// Returns `None` for an unrecognized tag; callers treat that as a
    /// configuration error.
    #[must_use]
    pub fn create(
        &self,
        implementation_type: &str,
        config: Arc<DeviceConfig>,
    ) -> Option<Box<dyn DeviceClient>> {
        let Ok(kind) = implementation_type.parse::<ImplementationType>() else {
            tracing::error!(implementation_type, "unknown implementation type");
            return None;
        };

        tracing::debug!(device_id = %config.device_id, client = %kind, "creating client");
        let client: Box<dyn DeviceClient> = match kind {
            ImplementationType::Standard => Box::new(HostedClient::new(config, self.timeout)),
            ImplementationType::Terminus => Box::new(TerminusClient::new(config, self.timeout)),
            ImplementationType::GenericByos => Box::new(ByosClient::new(config, self.timeout)),
        };
        Some(client)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}
