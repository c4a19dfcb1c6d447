//! TOML configuration file loading
//!
//! Supports `~/.config/trmnl/config.toml` as the persistent config source.
//! Everything except the device list is optional and falls back to defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TrmnlConfigFile {
    /// Defaults applied to every device
    #[serde(default)]
    pub defaults: DefaultsFileConfig,

    /// Configured displays
    #[serde(default)]
    pub devices: Vec<DeviceFileConfig>,
}

/// Defaults shared by all devices
#[derive(Debug, Default, Deserialize)]
pub struct DefaultsFileConfig {
    /// Requests per rolling hour
    pub rate_limit_per_hour: Option<u32>,

    /// Whether rate limiting is enforced
    pub rate_limiting_enabled: Option<bool>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// One `[[devices]]` entry
#[derive(Debug, Default, Deserialize)]
pub struct DeviceFileConfig {
    /// Device identifier (MAC address or friendly id)
    pub device_id: String,

    /// "standard", "terminus" or "`generic_byos`"
    pub implementation_type: Option<String>,

    /// API key or access token
    pub api_key: Option<String>,

    /// Base URL of the device API
    pub api_endpoint: Option<String>,

    /// Private plugin UUID (hosted service only)
    pub plugin_uuid: Option<String>,

    /// Per-device override of `defaults.rate_limit_per_hour`
    pub rate_limit_per_hour: Option<u32>,

    /// Per-device override of `defaults.rate_limiting_enabled`
    pub rate_limiting_enabled: Option<bool>,
}

/// Load the TOML config file
///
/// With no explicit path the standard location is used, and a missing file
/// yields `TrmnlConfigFile::default()`. An explicit path must exist.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file(path: Option<&Path>) -> Result<TrmnlConfigFile> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("no config file found, using defaults");
                return Ok(TrmnlConfigFile::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config: TrmnlConfigFile = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        devices = config.devices.len(),
        "loaded config file"
    );
    Ok(config)
}

/// Return the config file path: `~/.config/trmnl/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("trmnl").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_file() {
        let toml = r#"
            [defaults]
            rate_limit_per_hour = 30
            rate_limiting_enabled = false
            request_timeout_secs = 10

            [[devices]]
            device_id = "AA:BB:CC"
            implementation_type = "standard"
            api_key = "secret"
            plugin_uuid = "1234-abcd"

            [[devices]]
            device_id = "kitchen"
            implementation_type = "terminus"
            api_endpoint = "http://terminus.local:2300"
            rate_limit_per_hour = 60
        "#;

        let file: TrmnlConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.defaults.rate_limit_per_hour, Some(30));
        assert_eq!(file.defaults.rate_limiting_enabled, Some(false));
        assert_eq!(file.defaults.request_timeout_secs, Some(10));
        assert_eq!(file.devices.len(), 2);
        assert_eq!(file.devices[0].plugin_uuid.as_deref(), Some("1234-abcd"));
        assert_eq!(file.devices[1].rate_limit_per_hour, Some(60));
        assert!(file.devices[1].api_key.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let file: TrmnlConfigFile = toml::from_str("").unwrap();
        assert!(file.devices.is_empty());
        assert!(file.defaults.rate_limit_per_hour.is_none());
    }

    #[test]
    fn loads_explicit_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[[devices]]\ndevice_id = \"dev-1\"").unwrap();

        let file = load_config_file(Some(tmp.path())).unwrap();
        assert_eq!(file.devices.len(), 1);
        assert_eq!(file.devices[0].device_id, "dev-1");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        let err = load_config_file(Some(&missing)).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "devices = 12").unwrap();

        let err = load_config_file(Some(tmp.path())).unwrap_err();
        assert!(matches!(err, crate::Error::Toml(_)));
    }
}
