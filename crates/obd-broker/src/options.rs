//! Connection Options
//!
//! Serial line settings plus the validation performed before a connector
//! is handed out.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Baud rate ELM327 adapters ship with
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Default read timeout for the serial line
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Parity setting for the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control setting for the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Transport-specific options for the serial line
///
/// Keys are camelCase like the surrounding options; snake_case spellings
/// are accepted for settings files. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SerialOptions {
    /// Baud rate (default: 38400)
    #[serde(alias = "baud_rate")]
    pub baud_rate: u32,
    /// Data bits per character, 5 to 8
    #[serde(alias = "data_bits")]
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits, 1 or 2
    #[serde(alias = "stop_bits")]
    pub stop_bits: u8,
    /// Flow control
    #[serde(alias = "flow_control")]
    pub flow_control: FlowControl,
    /// Read timeout in milliseconds
    #[serde(alias = "timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SerialOptions {
    /// Check every field is in a range a serial port accepts
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.baud_rate == 0 {
            return Err(invalid("serialOpts.baudRate", "must be greater than zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(invalid(
                "serialOpts.dataBits",
                format!("{} is not between 5 and 8", self.data_bits),
            ));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(invalid(
                "serialOpts.stopBits",
                format!("{} is not 1 or 2", self.stop_bits),
            ));
        }
        Ok(())
    }
}

/// Validated options a connector closes over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Transport address, e.g. "/dev/ttyUSB0"
    pub serial_path: String,
    /// Transport-specific options
    pub serial_opts: SerialOptions,
}

impl ConnectOptions {
    /// Create options for a device path with default serial settings
    pub fn new(serial_path: impl Into<String>) -> Self {
        Self {
            serial_path: serial_path.into(),
            serial_opts: SerialOptions::default(),
        }
    }

    /// Replace the serial settings
    pub fn with_serial_opts(mut self, serial_opts: SerialOptions) -> Self {
        self.serial_opts = serial_opts;
        self
    }

    /// Check the options are usable without touching the device
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.serial_path.trim().is_empty() {
            return Err(invalid("serialPath", "must not be empty"));
        }
        self.serial_opts.validate()
    }

    /// Build options from an untyped value of the shape
    /// `{"serialPath": "...", "serialOpts": {...}}`
    pub fn from_value(opts: &Value) -> Result<Self, ConfigurationError> {
        let map = opts.as_object().ok_or(ConfigurationError::NotAnObject)?;

        let serial_path = match map.get("serialPath") {
            None | Some(Value::Null) => return Err(ConfigurationError::MissingField("serialPath")),
            Some(Value::String(path)) => path.clone(),
            Some(other) => {
                return Err(invalid("serialPath", format!("expected a string, got {}", other)))
            }
        };

        let serial_opts = match map.get("serialOpts") {
            None | Some(Value::Null) => return Err(ConfigurationError::MissingField("serialOpts")),
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
                .map_err(|e| invalid("serialOpts", e.to_string()))?,
            Some(other) => {
                return Err(invalid("serialOpts", format!("expected an object, got {}", other)))
            }
        };

        let options = Self {
            serial_path,
            serial_opts,
        };
        options.validate()?;
        Ok(options)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_empty_serial_opts() {
        let opts = ConnectOptions::from_value(&json!({"serialPath": "dev/x", "serialOpts": {}})).unwrap();
        assert_eq!(opts.serial_path, "dev/x");
        assert_eq!(opts.serial_opts, SerialOptions::default());
    }

    #[test]
    fn test_from_value_reads_serial_opts() {
        let opts = ConnectOptions::from_value(&json!({
            "serialPath": "/dev/ttyUSB0",
            "serialOpts": {"baudRate": 115200, "parity": "even"}
        }))
        .unwrap();
        assert_eq!(opts.serial_opts.baud_rate, 115200);
        assert_eq!(opts.serial_opts.parity, Parity::Even);
        assert_eq!(opts.serial_opts.data_bits, 8);
    }

    #[test]
    fn test_from_value_accepts_snake_case_keys() {
        let opts = ConnectOptions::from_value(&json!({
            "serialPath": "dev/x",
            "serialOpts": {"baud_rate": 9600, "stop_bits": 2}
        }))
        .unwrap();
        assert_eq!(opts.serial_opts.baud_rate, 9600);
        assert_eq!(opts.serial_opts.stop_bits, 2);
    }

    #[test]
    fn test_unknown_serial_opts_key_rejected() {
        for key in ["baudrate", "baud", "speed"] {
            let err = ConnectOptions::from_value(&json!({
                "serialPath": "dev/x",
                "serialOpts": {key: 9600}
            }))
            .unwrap_err();
            assert!(
                matches!(err, ConfigurationError::InvalidField { field: "serialOpts", ref reason } if reason.contains(key)),
                "{} accepted: {:?}",
                key,
                err
            );
        }
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert_eq!(
            ConnectOptions::from_value(&json!("dev/x")),
            Err(ConfigurationError::NotAnObject)
        );
    }

    #[test]
    fn test_missing_serial_path() {
        let err = ConnectOptions::from_value(&json!({"serialOpts": {}})).unwrap_err();
        assert_eq!(err, ConfigurationError::MissingField("serialPath"));
        assert!(err.to_string().contains("serialPath"));
    }

    #[test]
    fn test_serial_path_must_be_string() {
        let err = ConnectOptions::from_value(&json!({"serialPath": 3, "serialOpts": {}})).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidField { field: "serialPath", .. }));
    }

    #[test]
    fn test_missing_serial_opts() {
        let err = ConnectOptions::from_value(&json!({"serialPath": "dev/x"})).unwrap_err();
        assert_eq!(err, ConfigurationError::MissingField("serialOpts"));
        assert!(err.to_string().contains("serialOpts"));
    }

    #[test]
    fn test_serial_opts_must_be_object() {
        let err = ConnectOptions::from_value(&json!({"serialPath": "dev/x", "serialOpts": "fast"}))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidField { field: "serialOpts", .. }));
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = ConnectOptions::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidField { field: "serialPath", .. }));
    }

    proptest! {
        #[test]
        fn data_bits_range(bits in 0u8..=16) {
            let opts = SerialOptions { data_bits: bits, ..Default::default() };
            prop_assert_eq!(opts.validate().is_ok(), (5..=8).contains(&bits));
        }

        #[test]
        fn stop_bits_range(bits in 0u8..=4) {
            let opts = SerialOptions { stop_bits: bits, ..Default::default() };
            prop_assert_eq!(opts.validate().is_ok(), bits == 1 || bits == 2);
        }

        #[test]
        fn any_nonzero_baud_accepted(baud in 1u32..=4_000_000) {
            let opts = SerialOptions { baud_rate: baud, ..Default::default() };
            prop_assert!(opts.validate().is_ok());
        }
    }
}
