//! Request dispatch: device lookup, admission, client selection and recording
//!
//! Every invocation walks the same steps and stops at the first decisive one:
//!
//! 1. resolve the device config
//! 2. admit pushes against the device's rate limiter
//! 3. build the client for the device's implementation type
//! 4. run the operation with the client's session released on every path
//! 5. record a push only if it succeeded

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::clients::{ClientFactory, DeviceClient, Failure, MergeStrategy, OperationResult, Payload};
use crate::config::{DeviceConfig, RateLimitSettings};
use crate::rate_limit::{LimiterStatus, RateLimiterRegistry};
use crate::{Error, Result};

/// An operation a caller can request against a device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    /// Show an image
    PushImage {
        /// Image to display
        image_url: String,
        /// Refresh rate in seconds
        #[serde(default)]
        refresh_rate: Option<u32>,
    },
    /// Push template merge variables
    PushVariables {
        /// Variables to merge
        variables: Map<String, Value>,
        /// How to merge them
        #[serde(default)]
        merge_strategy: MergeStrategy,
    },
    /// Read device status
    GetStatus,
    /// Check connectivity
    TestConnection,
}

impl Operation {
    /// Short name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PushImage { .. } => "push_image",
            Self::PushVariables { .. } => "push_variables",
            Self::GetStatus => "get_status",
            Self::TestConnection => "test_connection",
        }
    }

    /// Whether a successful run counts against the device's hourly quota
    ///
    /// Only pushes do; status reads and connection tests are free.
    #[must_use]
    pub const fn consumes_quota(&self) -> bool {
        matches!(self, Self::PushImage { .. } | Self::PushVariables { .. })
    }

    async fn run(self, client: &dyn DeviceClient) -> OperationResult {
        match self {
            Self::PushImage {
                image_url,
                refresh_rate,
            } => client.push_image(&image_url, refresh_rate).await,
            Self::PushVariables {
                variables,
                merge_strategy,
            } => client.push_variables(&variables, merge_strategy).await,
            Self::GetStatus => client.get_status().await,
            Self::TestConnection => {
                if client.test_connection().await {
                    OperationResult::Success(Payload::Connected)
                } else {
                    Failure::transport("connection test failed").into()
                }
            }
        }
    }
}

/// Closes a client's session when dropped
///
/// Covers success, failure, and a cancelled invocation future alike.
struct ReleaseOnDrop<'a>(&'a dyn DeviceClient);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Entry point for device operations
///
/// Owns the device table and the limiter registry for its whole lifetime.
#[derive(Debug)]
pub struct Dispatcher {
    devices: RwLock<HashMap<String, Arc<DeviceConfig>>>,
    limiters: RateLimiterRegistry,
    factory: ClientFactory,
}

impl Dispatcher {
    /// Create a dispatcher with an empty device table
    #[must_use]
    pub fn new(factory: ClientFactory) -> Self {
        Self::with_registry(factory, RateLimiterRegistry::new())
    }

    /// Create a dispatcher using an existing limiter registry
    #[must_use]
    pub fn with_registry(factory: ClientFactory, limiters: RateLimiterRegistry) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            limiters,
            factory,
        }
    }

    /// Add or replace a device; returns the config it replaced
    pub fn register(&self, device: DeviceConfig) -> Option<Arc<DeviceConfig>> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(
            device_id = %device.device_id,
            implementation_type = %device.implementation_type,
            "registering device"
        );
        devices.insert(device.device_id.clone(), Arc::new(device))
    }

    /// Remove a device; its limiter is kept for the life of the process
    pub fn unregister(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.remove(device_id).is_some()
    }

    /// Look up a registered device
    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceConfig>> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(device_id).cloned()
    }

    /// Ids of all registered devices, sorted
    pub fn device_ids(&self) -> Vec<String> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The limiter registry
    #[must_use]
    pub const fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    /// Apply changed rate limit settings to a device's limiter
    pub async fn update_rate_limit(&self, device_id: &str, settings: RateLimitSettings) {
        self.limiters
            .update(
                device_id,
                Some(settings.rate_limit_per_hour),
                Some(settings.enabled),
            )
            .await;
    }

    /// Current limiter state for a device, if it has been used yet
    pub async fn limiter_status(&self, device_id: &str) -> Option<LimiterStatus> {
        let limiter = self.limiters.find(device_id)?;
        let mut limiter = limiter.lock().await;
        Some(limiter.status())
    }

    /// Run an operation against a device
    ///
    /// Pushes are admitted against the device's limiter, which is held until
    /// the outcome is recorded, so concurrent calls for one device cannot both
    /// take the last slot. Reads skip the limiter. Calls for different devices
    /// do not wait on each other.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] if the device is not registered
    /// - [`Error::RateLimited`] if the hourly quota is used up
    /// - [`Error::Config`] if the implementation type is unknown
    /// - [`Error::Precondition`], [`Error::Remote`] or [`Error::Transport`]
    ///   if the operation itself failed
    pub async fn invoke(
        &self,
        device_id: &str,
        operation: Operation,
        settings: RateLimitSettings,
    ) -> Result<Payload> {
        let device = self
            .device(device_id)
            .filter(|device| device.device_id == device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;

        if !operation.consumes_quota() {
            return self.execute(&device, operation).await;
        }

        let limiter = self.limiters.get(
            device_id,
            settings.rate_limit_per_hour,
            settings.enabled,
        );
        let mut limiter = limiter.lock().await;

        if !limiter.admit() {
            let retry_after_secs = limiter.wait_seconds();
            tracing::warn!(
                device_id,
                operation = operation.name(),
                retry_after_secs,
                "rate limit exceeded"
            );
            return Err(Error::RateLimited {
                device_id: device_id.to_string(),
                retry_after_secs,
            });
        }

        let payload = self.execute(&device, operation).await?;
        limiter.record();
        limiter.log_status();
        Ok(payload)
    }

    /// Build the device's client and run one operation with it
    async fn execute(&self, device: &Arc<DeviceConfig>, operation: Operation) -> Result<Payload> {
        let client = self
            .factory
            .create(&device.implementation_type, Arc::clone(device))
            .ok_or_else(|| {
                Error::Config(format!(
                    "could not create client for device {}: unknown implementation type {}",
                    device.device_id, device.implementation_type
                ))
            })?;

        let operation_name = operation.name();
        let payload = run_released(client.as_ref(), operation).await.into_result()?;
        tracing::debug!(
            device_id = %device.device_id,
            client = client.name(),
            operation = operation_name,
            "operation succeeded"
        );
        Ok(payload)
    }
}

/// Run an operation and close the client's session however the call ends
async fn run_released(client: &dyn DeviceClient, operation: Operation) -> OperationResult {
    let _release = ReleaseOnDrop(client);
    operation.run(client).await
}
