use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Error returned when loading the demo configuration
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization { source: toml::de::Error },
    #[snafu(display("{field} is out of range"))]
    OutOfRange { field: &'static str },
}

/// Settings of the simulated node
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    /// Address of the TCP endpoint standing in for the serial line
    #[serde(default = "default_line")]
    pub line: String,
    /// File backing the persistent store
    #[serde(default = "default_eeprom")]
    pub eeprom: PathBuf,
    /// Start with the address-program jumper fitted
    #[serde(default)]
    pub program_mode: bool,
    #[serde(default)]
    pub monitor: MonitorInputs,
}

/// The physical quantities the simulated power monitor measures
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MonitorInputs {
    pub bus_volts: f64,
    pub shunt_millivolts: f64,
}

impl Default for MonitorInputs {
    fn default() -> Self {
        Self {
            bus_volts: 12.6,
            shunt_millivolts: 5.0,
        }
    }
}

impl MonitorInputs {
    /// Bus voltage register value, 1.25 mV per bit
    pub fn bus_register(&self) -> Result<u16, ConfigError> {
        to_register(self.bus_volts / 1.25e-3, "monitor.bus_volts")
    }

    /// Shunt voltage register value, 2.5 uV per bit
    pub fn shunt_register(&self) -> Result<u16, ConfigError> {
        to_register(self.shunt_millivolts / 2.5e-3, "monitor.shunt_millivolts")
    }
}

fn to_register(value: f64, field: &'static str) -> Result<u16, ConfigError> {
    let value = value.round();
    if (0.0..=u16::MAX as f64).contains(&value) {
        Ok(value as u16)
    } else {
        OutOfRangeSnafu { field }.fail()
    }
}

fn default_line() -> String {
    "127.0.0.1:7485".into()
}

fn default_eeprom() -> PathBuf {
    "hanbus_node.eeprom".into()
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            line: default_line(),
            eeprom: default_eeprom(),
            program_mode: false,
            monitor: MonitorInputs::default(),
        }
    }
}

impl DemoConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a TOML string
    pub fn load_from_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).context(TomlDeserializationSnafu)?;
        config.monitor.bus_register()?;
        config.monitor.shunt_register()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(DemoConfig::load_from_str("").unwrap(), DemoConfig::default());
    }

    #[test]
    fn test_monitor_inputs() {
        let config = DemoConfig::load_from_str(
            r#"
            line = "10.0.0.2:9000"
            program_mode = true

            [monitor]
            bus_volts = 12.0
            shunt_millivolts = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(config.line, "10.0.0.2:9000");
        assert!(config.program_mode);
        assert_eq!(config.monitor.bus_register().unwrap(), 9600);
        assert_eq!(config.monitor.shunt_register().unwrap(), 10000);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            DemoConfig::load_from_str("baud = 9600"),
            Err(ConfigError::TomlDeserialization { .. })
        ));
        assert!(matches!(
            DemoConfig::load_from_str("[monitor]\nbus_volts = 100.0\nshunt_millivolts = 0.0"),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
