//! Configuration file.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::roi::{DEFAULT_REGIONS, RegionConfig};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML deserialization error: {source}")]
    TomlDeError {
        #[from]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, Error>;

/// The default value for [RotationConfig::interval_msec].
pub const DEFAULT_ROTATION_INTERVAL_MSEC: u64 = 2000;
/// The default value for [AcquisitionConfig::timeout_msec].
pub const DEFAULT_ACQUIRE_TIMEOUT_MSEC: u64 = 2000;
/// The default value for [ModbusConfig::host].
pub const DEFAULT_MODBUS_HOST: &str = "127.0.0.1";

fn default_regions() -> Vec<RegionConfig> {
    DEFAULT_REGIONS.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_rotation_interval_msec() -> u64 {
    DEFAULT_ROTATION_INTERVAL_MSEC
}

fn default_acquire_timeout_msec() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MSEC
}

fn default_modbus_host() -> String {
    DEFAULT_MODBUS_HOST.to_string()
}

fn default_modbus_port() -> u16 {
    register_comms::DEFAULT_PORT
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout_msec() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Serial number of the camera to open. The first camera found if unset.
    #[serde(default)]
    pub camera_serial: Option<String>,
    /// Index into `roi` applied before acquisition starts.
    #[serde(default)]
    pub initial_roi: usize,
    /// Regions of interest, in rotation order.
    #[serde(default = "default_regions", rename = "roi")]
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_serial: None,
            initial_roi: 0,
            regions: default_regions(),
            rotation: RotationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            modbus: ModbusConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(Error::Invalid("at least one [[roi]] is required".into()));
        }
        if self.initial_roi >= self.regions.len() {
            return Err(Error::Invalid(format!(
                "initial_roi {} out of range, {} regions configured",
                self.initial_roi,
                self.regions.len()
            )));
        }
        if let Some(i) = self
            .regions
            .iter()
            .position(|r| r.width == 0 || r.height == 0)
        {
            return Err(Error::Invalid(format!(
                "region {} has zero width or height",
                i + 1
            )));
        }
        if self.rotation.interval_msec == 0 {
            return Err(Error::Invalid("rotation interval must be positive".into()));
        }
        if self.acquisition.timeout_msec == 0 {
            return Err(Error::Invalid(
                "acquisition timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rotation_interval_msec")]
    pub interval_msec: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_msec: DEFAULT_ROTATION_INTERVAL_MSEC,
        }
    }
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_msec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquisitionConfig {
    /// How long to wait for each frame.
    #[serde(default = "default_acquire_timeout_msec")]
    pub timeout_msec: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            timeout_msec: DEFAULT_ACQUIRE_TIMEOUT_MSEC,
        }
    }
}

impl AcquisitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_msec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModbusConfig {
    #[serde(default = "default_modbus_host")]
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// First register written.
    #[serde(default)]
    pub base_address: u16,
    #[serde(default = "default_connect_timeout_msec")]
    pub connect_timeout_msec: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: default_modbus_host(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            base_address: 0,
            connect_timeout_msec: default_connect_timeout_msec(),
        }
    }
}

impl ModbusConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_msec)
    }
}

/// Parse a `.toml` file and return a validated [Config].
pub fn parse_config_file<P: AsRef<std::path::Path>>(fname: P) -> Result<Config> {
    let contents = std::fs::read_to_string(fname.as_ref())?;
    let cfg: Config = toml::from_str(&contents)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_file_gives_defaults() {
        let f = write_tmp("");
        let cfg = parse_config_file(f.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.regions.len(), 3);
        assert_eq!(cfg.rotation.interval(), Duration::from_secs(2));
        assert_eq!(cfg.modbus.port, 502);
        assert_eq!(cfg.modbus.host, "127.0.0.1");
    }

    #[test]
    fn full_file() {
        let f = write_tmp(
            r#"
camera_serial = "ABC123"
initial_roi = 1

[[roi]]
width = 100
height = 50
offset_x = 2
offset_y = 4

[[roi]]
width = 640
height = 480
offset_x = 0
offset_y = 0

[rotation]
enabled = false
interval_msec = 500

[modbus]
host = "10.0.0.5"
base_address = 100
"#,
        );
        let cfg = parse_config_file(f.path()).unwrap();
        assert_eq!(cfg.camera_serial.as_deref(), Some("ABC123"));
        assert_eq!(cfg.initial_roi, 1);
        assert_eq!(cfg.regions[0], RegionConfig::new(100, 50, 2, 4));
        assert!(!cfg.rotation.enabled);
        assert_eq!(cfg.rotation.interval_msec, 500);
        assert_eq!(cfg.modbus.host, "10.0.0.5");
        assert_eq!(cfg.modbus.port, 502);
        assert_eq!(cfg.modbus.base_address, 100);
        assert_eq!(cfg.acquisition, AcquisitionConfig::default());
    }

    #[test]
    fn unknown_field_rejected() {
        let f = write_tmp("[rotation]\nperiod = 3\n");
        assert!(matches!(
            parse_config_file(f.path()),
            Err(Error::TomlDeError { .. })
        ));
    }

    #[test]
    fn validation() {
        let f = write_tmp("initial_roi = 3\n");
        assert!(matches!(parse_config_file(f.path()), Err(Error::Invalid(_))));

        let f = write_tmp("[[roi]]\nwidth = 0\nheight = 5\noffset_x = 0\noffset_y = 0\n");
        assert!(matches!(parse_config_file(f.path()), Err(Error::Invalid(_))));

        let f = write_tmp("[rotation]\ninterval_msec = 0\n");
        assert!(matches!(parse_config_file(f.path()), Err(Error::Invalid(_))));

        let mut cfg = Config::default();
        cfg.regions.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            parse_config_file("/nonexistent/roi-monitor.toml"),
            Err(Error::IoError { .. })
        ));
    }
}
