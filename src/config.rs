//! Monitor configuration loaded from YAML

use crate::connector::{DEFAULT_BAUD_RATE, DEFAULT_RFCOMM_CHANNEL};
use anyhow::{anyhow, bail, Context, Result};
use bluer::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Serial device addressed by path
    Serial,
    /// Bluetooth RFCOMM device addressed by MAC address
    Bluetooth,
    /// Generated readings, no hardware needed
    Simulated,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Serial => write!(f, "serial"),
            ConnectionKind::Bluetooth => write!(f, "bluetooth"),
            ConnectionKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Application configuration
///
/// Keys this program does not know are ignored, so config files written
/// for other tools in the same deployment still load.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite file holding readings
    pub database_location: PathBuf,
    /// Recreate the database on startup
    pub overwrite: bool,
    /// Read timeout in seconds
    pub timeout: f64,
    pub connection_type: ConnectionKind,
    /// Candidate device paths (serial) or MAC addresses (bluetooth)
    pub connection_list: Vec<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_bluetooth_channel")]
    pub bluetooth_channel: u8,
    /// Idle wait between ticks in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    /// Rows logged as a summary on shutdown
    #[serde(default = "default_summary_rows")]
    pub summary_rows: usize,
    #[serde(default = "default_max_lines_per_tick")]
    pub max_lines_per_tick: usize,
    /// Optional log file in addition to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_bluetooth_channel() -> u8 {
    DEFAULT_RFCOMM_CHANNEL
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_summary_rows() -> usize {
    5
}

fn default_max_lines_per_tick() -> usize {
    32
}

impl AppConfig {
    /// Read and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.timeout > 0.0 && Duration::try_from_secs_f64(self.timeout).is_ok()) {
            bail!("timeout must be a positive number of seconds, got {}", self.timeout);
        }
        if Duration::try_from_secs_f64(self.poll_interval).is_err() {
            bail!(
                "poll_interval must be a non-negative number of seconds, got {}",
                self.poll_interval
            );
        }
        if self.max_lines_per_tick == 0 {
            bail!("max_lines_per_tick must be at least 1");
        }
        if self.connection_type == ConnectionKind::Bluetooth {
            self.bluetooth_addresses()?;
        }
        Ok(())
    }

    /// Read timeout; the value is range-checked by `validate`
    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval).unwrap_or(Duration::MAX)
    }

    /// Parse `connection_list` as Bluetooth addresses
    pub fn bluetooth_addresses(&self) -> Result<Vec<Address>> {
        if self.connection_list.is_empty() {
            bail!("connection_list must name at least one Bluetooth address");
        }
        self.connection_list
            .iter()
            .map(|raw| {
                raw.parse::<Address>()
                    .map_err(|e| anyhow!("Invalid Bluetooth address '{}': {}", raw, e))
            })
            .collect()
    }
}

/// Pick the first candidate path that exists on this host
pub fn choose_serial_connection(candidates: &[String]) -> Option<&str> {
    candidates
        .iter()
        .map(String::as_str)
        .find(|candidate| Path::new(candidate).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIAL_CONFIG: &str = "
database_location: test.db
overwrite: false
timeout: 1.0
connection_type: serial
connection_list:
  - /dev/tty.wchusbserial1410
  - /dev/tty.wchusbserial1420
";

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_yaml(SERIAL_CONFIG).unwrap();
        assert_eq!(config.database_location, PathBuf::from("test.db"));
        assert!(!config.overwrite);
        assert_eq!(config.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.connection_type, ConnectionKind::Serial);
        assert_eq!(config.connection_list.len(), 2);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.bluetooth_channel, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.summary_rows, 5);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_each_required_parameter() {
        for key in [
            "database_location",
            "overwrite",
            "timeout",
            "connection_type",
            "connection_list",
        ] {
            let yaml: String = SERIAL_CONFIG
                .lines()
                .filter(|line| !line.starts_with(key) && !(key == "connection_list" && line.starts_with("  -")))
                .collect::<Vec<_>>()
                .join("\n");
            assert!(AppConfig::from_yaml(&yaml).is_err(), "missing {key} accepted");
        }
    }

    #[test]
    fn test_ignores_unknown_keys() {
        let yaml = format!("{SERIAL_CONFIG}web_port: 5000\n");
        assert!(AppConfig::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn test_rejects_invalid_connection_type() {
        let yaml = SERIAL_CONFIG.replace("connection_type: serial", "connection_type: invalid type");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_accepts_all_connection_types() {
        let simulated = SERIAL_CONFIG.replace("connection_type: serial", "connection_type: simulated");
        assert_eq!(
            AppConfig::from_yaml(&simulated).unwrap().connection_type,
            ConnectionKind::Simulated
        );

        let bluetooth = SERIAL_CONFIG
            .replace("connection_type: serial", "connection_type: bluetooth")
            .replace("/dev/tty.wchusbserial1410", "98:D3:31:FC:20:34")
            .replace("  - /dev/tty.wchusbserial1420\n", "");
        let config = AppConfig::from_yaml(&bluetooth).unwrap();
        assert_eq!(config.connection_type, ConnectionKind::Bluetooth);
        assert_eq!(
            config.bluetooth_addresses().unwrap(),
            vec![Address::new([0x98, 0xD3, 0x31, 0xFC, 0x20, 0x34])]
        );
    }

    #[test]
    fn test_bluetooth_requires_valid_address() {
        let yaml = SERIAL_CONFIG.replace("connection_type: serial", "connection_type: bluetooth");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_rejects_non_positive_timeout() {
        let yaml = SERIAL_CONFIG.replace("timeout: 1.0", "timeout: 0");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        for (from, to) in [
            ("timeout: 1.0", "timeout: 1.0e30"),
            ("timeout: 1.0", "timeout: .nan"),
            ("timeout: 1.0", "timeout: 1.0\npoll_interval: 1.0e30"),
            ("timeout: 1.0", "timeout: 1.0\npoll_interval: -1"),
        ] {
            let yaml = SERIAL_CONFIG.replace(from, to);
            assert!(AppConfig::from_yaml(&yaml).is_err(), "accepted {to:?}");
        }
    }

    #[test]
    fn test_choose_serial_connection() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("ttyFAKE0");
        std::fs::write(&present, b"").unwrap();

        let candidates = vec![
            "/dev/does-not-exist-iow".to_string(),
            present.to_string_lossy().into_owned(),
        ];
        assert_eq!(
            choose_serial_connection(&candidates),
            Some(candidates[1].as_str())
        );
        assert_eq!(choose_serial_connection(&candidates[..1]), None);
    }
}
