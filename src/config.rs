//! Configuration for the link gateway application
//!
//! Loads configuration from a TOML file: one serial device link, one UDP
//! ground-station link, and logging.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub ground: GroundConfig,
    pub logging: LoggingConfig,
}

/// Serial link to the remote device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Serial port carrying the device telemetry link
    pub port: String,
    pub baud_rate: u32,
}

/// UDP link to the ground station
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroundConfig {
    /// Local UDP bind address
    ///
    /// Examples:
    /// - `0.0.0.0:9000` - All interfaces on port 9000
    /// - `127.0.0.1:9000` - Localhost only
    pub bind_address: String,
    /// Ground station address datagrams are sent to
    pub peer_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 57600,
            },
            ground: GroundConfig {
                bind_address: "0.0.0.0:9000".to_string(),
                peer_address: "127.0.0.1:9001".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device.port, "/dev/ttyUSB0");
        assert_eq!(config.device.baud_rate, 57600);
        assert_eq!(config.ground.bind_address, "0.0.0.0:9000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[device]"));
        assert!(toml_string.contains("[ground]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("baud_rate = 57600"));
        assert!(toml_string.contains("port = \"/dev/ttyUSB0\""));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[device]
port = "/dev/ttyS1"
baud_rate = 115200

[ground]
bind_address = "0.0.0.0:9100"
peer_address = "192.168.1.50:9101"

[logging]
level = "debug"
output = "stdout"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.port, "/dev/ttyS1");
        assert_eq!(config.device.baud_rate, 115200);
        assert_eq!(config.ground.peer_address, "192.168.1.50:9101");
        assert_eq!(config.logging.level, "debug");
    }
}
