//! Configuration management for the TRMNL bridge

pub mod file;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use self::file::{DeviceFileConfig, TrmnlConfigFile};
use crate::clients::ImplementationType;
use crate::{Error, Result};

/// Base URL of the hosted TRMNL service
pub const DEFAULT_API_ENDPOINT: &str = "https://usetrmnl.com";

/// Hourly request limit on the standard plan
pub const DEFAULT_RATE_LIMIT: u32 = 12;

/// Hourly request limit on the premium plan
pub const PREMIUM_RATE_LIMIT: u32 = 30;

/// Per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection details for one display
///
/// Immutable once built; clients share it behind an `Arc`.
#[derive(Debug)]
pub struct DeviceConfig {
    /// Device identifier, sent in the `ID` header
    pub device_id: String,

    /// Declared implementation type tag, interpreted by the client factory
    pub implementation_type: String,

    /// API key (hosted) or bearer token (self-hosted)
    pub credential: Option<SecretString>,

    /// Base URL of the device API, without trailing slash
    pub endpoint_base_url: String,

    /// Private plugin UUID, required for hosted pushes
    pub plugin_handle: Option<String>,
}

impl DeviceConfig {
    /// Create a device config with no credential or plugin handle
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        implementation_type: impl Into<String>,
        endpoint_base_url: impl Into<String>,
    ) -> Self {
        let endpoint: String = endpoint_base_url.into();
        Self {
            device_id: device_id.into(),
            implementation_type: implementation_type.into(),
            credential: None,
            endpoint_base_url: endpoint.trim_end_matches('/').to_string(),
            plugin_handle: None,
        }
    }

    /// Attach a credential; empty strings mean "no credential"
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        let credential: String = credential.into();
        self.credential = (!credential.is_empty()).then(|| SecretString::from(credential));
        self
    }

    /// Attach a plugin handle
    #[must_use]
    pub fn with_plugin_handle(mut self, plugin_handle: impl Into<String>) -> Self {
        self.plugin_handle = Some(plugin_handle.into());
        self
    }

    /// Build a full URL for an API path such as `/api/display`
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint_base_url)
    }
}

/// Runtime-tunable limiter settings for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Requests admitted per rolling hour
    pub rate_limit_per_hour: u32,

    /// Whether limiting is enforced
    pub enabled: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: DEFAULT_RATE_LIMIT,
            enabled: true,
        }
    }
}

/// A configured device with its limiter settings
#[derive(Debug)]
pub struct DeviceProfile {
    /// Connection details
    pub device: DeviceConfig,

    /// Limiter settings after applying defaults
    pub rate_limit: RateLimitSettings,
}

/// Bridge configuration
#[derive(Debug)]
pub struct Config {
    /// Configured devices, in file order
    pub devices: Vec<DeviceProfile>,

    /// Timeout applied to every device API request
    pub request_timeout: Duration,

    /// Limiter settings for devices without overrides
    pub default_rate_limit: RateLimitSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the given file, or the standard location
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or describes an
    /// invalid device
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(path)?;
        Self::from_file(file)
    }

    /// Build configuration from a parsed file
    ///
    /// # Errors
    ///
    /// Returns error on empty or duplicate device ids, an endpoint that is not
    /// a valid URL, or a zero request timeout
    pub fn from_file(file: TrmnlConfigFile) -> Result<Self> {
        let default_rate_limit = RateLimitSettings {
            rate_limit_per_hour: file
                .defaults
                .rate_limit_per_hour
                .unwrap_or(DEFAULT_RATE_LIMIT),
            enabled: file.defaults.rate_limiting_enabled.unwrap_or(true),
        };
        let request_timeout = match file.defaults.request_timeout_secs {
            Some(0) => {
                return Err(Error::Config(
                    "request_timeout_secs must be greater than zero".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(file.devices.len());
        for entry in file.devices {
            if !seen.insert(entry.device_id.clone()) {
                return Err(Error::Config(format!(
                    "duplicate device id: {}",
                    entry.device_id
                )));
            }
            devices.push(device_profile(entry, default_rate_limit)?);
        }

        Ok(Self {
            devices,
            request_timeout,
            default_rate_limit,
        })
    }

    /// Look up a configured device
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|p| p.device.device_id == device_id)
    }
}

fn device_profile(entry: DeviceFileConfig, defaults: RateLimitSettings) -> Result<DeviceProfile> {
    if entry.device_id.trim().is_empty() {
        return Err(Error::Config("device_id must not be empty".to_string()));
    }

    let implementation_type = entry
        .implementation_type
        .unwrap_or_else(|| ImplementationType::Standard.as_str().to_string());

    let endpoint = match (entry.api_endpoint, implementation_type.parse()) {
        (Some(endpoint), _) => endpoint,
        (None, Ok(ImplementationType::Standard)) => DEFAULT_API_ENDPOINT.to_string(),
        (None, _) => {
            return Err(Error::Config(format!(
                "device {} needs an api_endpoint",
                entry.device_id
            )));
        }
    };
    url::Url::parse(&endpoint).map_err(|e| {
        Error::Config(format!(
            "invalid api_endpoint for {}: {endpoint}: {e}",
            entry.device_id
        ))
    })?;

    if implementation_type.parse::<ImplementationType>().is_err() {
        tracing::warn!(
            device_id = %entry.device_id,
            implementation_type = %implementation_type,
            "unknown implementation type, requests to this device will fail"
        );
    }

    let mut device = DeviceConfig::new(entry.device_id, implementation_type, endpoint)
        .with_credential(entry.api_key.unwrap_or_default());
    if let Some(plugin_uuid) = entry.plugin_uuid {
        device = device.with_plugin_handle(plugin_uuid);
    }

    Ok(DeviceProfile {
        device,
        rate_limit: RateLimitSettings {
            rate_limit_per_hour: entry
                .rate_limit_per_hour
                .unwrap_or(defaults.rate_limit_per_hour),
            enabled: entry.rate_limiting_enabled.unwrap_or(defaults.enabled),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn parse(toml: &str) -> Result<Config> {
        Config::from_file(toml::from_str(toml).unwrap())
    }

    #[test]
    fn defaults_without_file() {
        let config = parse("").unwrap();
        assert!(config.devices.is_empty());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.default_rate_limit.rate_limit_per_hour, 12);
        assert!(config.default_rate_limit.enabled);
    }

    #[test]
    fn standard_device_gets_hosted_endpoint() {
        let config = parse(
            r#"
            [[devices]]
            device_id = "dev-1"
            api_key = "key"
            plugin_uuid = "uuid-1"
            "#,
        )
        .unwrap();

        let profile = config.device("dev-1").unwrap();
        assert_eq!(profile.device.implementation_type, "standard");
        assert_eq!(profile.device.endpoint_base_url, DEFAULT_API_ENDPOINT);
        assert_eq!(profile.device.plugin_handle.as_deref(), Some("uuid-1"));
        assert_eq!(
            profile.device.credential.as_ref().unwrap().expose_secret(),
            "key"
        );
    }

    #[test]
    fn device_overrides_fall_back_to_defaults() {
        let config = parse(
            r#"
            [defaults]
            rate_limit_per_hour = 30
            rate_limiting_enabled = false

            [[devices]]
            device_id = "a"

            [[devices]]
            device_id = "b"
            rate_limit_per_hour = 5
            rate_limiting_enabled = true
            "#,
        )
        .unwrap();

        let a = config.device("a").unwrap().rate_limit;
        assert_eq!(a.rate_limit_per_hour, 30);
        assert!(!a.enabled);

        let b = config.device("b").unwrap().rate_limit;
        assert_eq!(b.rate_limit_per_hour, 5);
        assert!(b.enabled);
    }

    #[test]
    fn byos_device_requires_endpoint() {
        let err = parse(
            r#"
            [[devices]]
            device_id = "dev-1"
            implementation_type = "generic_byos"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let err = parse(
            r#"
            [[devices]]
            device_id = "dev-1"
            implementation_type = "terminus"
            api_endpoint = "not a url"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid api_endpoint"));
    }

    #[test]
    fn rejects_zero_request_timeout() {
        let err = parse(
            r#"
            [defaults]
            request_timeout_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("request_timeout_secs"));

        let config = parse("[defaults]\nrequest_timeout_secs = 5").unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_duplicate_device_ids() {
        let err = parse(
            r#"
            [[devices]]
            device_id = "dev-1"

            [[devices]]
            device_id = "dev-1"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate device id"));
    }

    #[test]
    fn unknown_implementation_type_is_kept_for_the_factory() {
        let config = parse(
            r#"
            [[devices]]
            device_id = "dev-1"
            implementation_type = "carrier_pigeon"
            api_endpoint = "http://localhost:1234"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.device("dev-1").unwrap().device.implementation_type,
            "carrier_pigeon"
        );
    }

    #[test]
    fn empty_credential_means_none_and_url_is_joined() {
        let device = DeviceConfig::new("dev-1", "terminus", "http://host:2300/").with_credential("");
        assert!(device.credential.is_none());
        assert_eq!(device.url("/api/display"), "http://host:2300/api/display");
    }
}
