//! Runtime Settings
//!
//! Loaded from an optional TOML file, overridden by `OBD_LINK__*`
//! environment variables (e.g. `OBD_LINK__DEVICE__PATH=/dev/ttyUSB1`).

use crate::protocol::ObdProtocol;
use config::{Config, Environment, File, FileFormat};
use obd_broker::{ConfigurationError, ConnectOptions, SerialOptions};
use serde::Deserialize;
use thiserror::Error;

/// File read when no path is given
pub const DEFAULT_SETTINGS_FILE: &str = "obd-link.toml";

/// Prefix of environment overrides
const ENV_PREFIX: &str = "OBD_LINK";

/// Default timeout for a single adapter command
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Errors while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File or environment could not be read or deserialized
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    /// Values were read but are unusable
    #[error("Invalid settings: {0}")]
    Invalid(#[from] ConfigurationError),
}

/// Top-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Serial device
    pub device: DeviceSettings,
    /// Adapter bring-up
    #[serde(default)]
    pub adapter: AdapterSettings,
    /// Raw request polling
    #[serde(default)]
    pub poll: PollSettings,
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Use the simulated adapter instead of the serial port
    #[serde(default)]
    pub mock: bool,
}

/// Serial device settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub path: String,
    /// Line settings
    #[serde(default)]
    pub serial: SerialOptions,
}

/// ELM327 bring-up settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// Bus protocol to select
    pub protocol: ObdProtocol,
    /// Timeout for each init command
    pub command_timeout_ms: u64,
    /// Send ATZ before configuring
    pub reset_on_connect: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            protocol: ObdProtocol::Auto,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            reset_on_connect: true,
        }
    }
}

/// Raw polling settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Requests sent each round, e.g. "010C"
    pub requests: Vec<String>,
    /// Time between rounds
    pub interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            requests: vec!["010C".to_string(), "010D".to_string()],
            interval_ms: 1000,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from `path` (or [`DEFAULT_SETTINGS_FILE`] if it exists) plus
    /// environment overrides
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        let file = File::with_name(path.unwrap_or(DEFAULT_SETTINGS_FILE)).required(path.is_some());
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("poll.requests"),
            )
            .build()?
            .try_deserialize()?;
        settings.connect_options()?;
        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.connect_options()?;
        Ok(settings)
    }

    /// Validated broker options for the configured device
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigurationError> {
        let options = ConnectOptions::new(self.device.path.clone())
            .with_serial_opts(self.device.serial.clone());
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_settings_use_defaults() {
        let settings = Settings::from_toml("[device]\npath = \"/dev/ttyUSB0\"\n").unwrap();
        assert_eq!(settings.device.path, "/dev/ttyUSB0");
        assert_eq!(settings.device.serial, SerialOptions::default());
        assert_eq!(settings.adapter.protocol, ObdProtocol::Auto);
        assert_eq!(settings.adapter.command_timeout_ms, DEFAULT_COMMAND_TIMEOUT_MS);
        assert_eq!(settings.poll.requests, vec!["010C", "010D"]);
        assert_eq!(settings.log_level, "info");
        assert!(!settings.mock);
    }

    #[test]
    fn test_full_settings() {
        let settings = Settings::from_toml(
            r#"
            log_level = "debug"
            mock = true

            [device]
            path = "/dev/rfcomm0"

            [device.serial]
            baud_rate = 115200
            parity = "even"

            [adapter]
            protocol = "can11bit500"
            reset_on_connect = false

            [poll]
            requests = ["0105"]
            interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(settings.device.serial.baud_rate, 115200);
        assert_eq!(settings.device.serial.parity, obd_broker::Parity::Even);
        assert_eq!(settings.adapter.protocol, ObdProtocol::Can11bit500);
        assert!(!settings.adapter.reset_on_connect);
        assert_eq!(settings.poll.requests, vec!["0105"]);
        assert_eq!(settings.poll.interval_ms, 250);
        assert!(settings.mock);

        let options = settings.connect_options().unwrap();
        assert_eq!(options.serial_path, "/dev/rfcomm0");
        assert_eq!(options.serial_opts.baud_rate, 115200);
    }

    #[test]
    fn test_missing_device_rejected() {
        let err = Settings::from_toml("log_level = \"warn\"\n").unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    #[test]
    fn test_invalid_serial_rejected() {
        let err = Settings::from_toml("[device]\npath = \"/dev/ttyUSB0\"\n[device.serial]\nbaud_rate = 0\n")
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = Settings::from_toml("[device]\npath = \"\"\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }
}
