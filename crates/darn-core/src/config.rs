//! # Driver Options
//!
//! YAML configuration for the USRP driver: which devices to open, how they
//! are clocked and mapped, what rates to request, and which GPIO lines carry
//! the antenna control and status signals.
//!
//! ## Configuration Search Path
//!
//! Options are loaded from the first file found:
//! 1. Path in the `DARN_CONFIG` environment variable
//! 2. `./darn.yaml`
//! 3. The user config directory (`~/.config/darn/config.yaml` on Linux)
//! 4. `/etc/darn/config.yaml`
//!
//! ## Example
//!
//! ```yaml
//! device:
//!   args: "addr0=192.168.10.100,addr1=192.168.10.101"
//!   clock_source: external
//!   time_source: external
//!   main_antenna_count: 2
//!   interferometer_antenna_count: 1
//!
//! rates:
//!   tx_sample_rate: 5.0e6
//!   rx_sample_rate: 5.0e6
//!
//! gpio:
//!   bank_high: RXA
//!   bank_low: TXA
//!   scope_sync_mask: 0x01
//!   attenuator_mask: 0x02
//!   tr_mask: 0x04
//! ```

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit options file.
pub const CONFIG_ENV: &str = "DARN_CONFIG";

/// Error type for option loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse options: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid options: {0}")]
    Validation(String),
}

/// Device, clocking and subdevice mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// SDK device arguments (one `addrN=` per motherboard)
    pub args: String,
    /// Reference clock source (internal, external, gpsdo)
    pub clock_source: String,
    /// PPS/time source (internal, external, gpsdo)
    pub time_source: String,
    /// Address of the GPS-disciplined distribution clock, if any
    pub clock_addr: String,
    /// TX subdevice spec, e.g. `"A:A"`
    pub tx_subdev: String,
    /// Main array RX subdevice spec
    pub main_rx_subdev: String,
    /// Interferometer array RX subdevice spec
    pub interferometer_rx_subdev: String,
    /// Number of main array antennas (one per motherboard)
    pub main_antenna_count: usize,
    /// Number of interferometer antennas (on the first boards)
    pub interferometer_antenna_count: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            args: String::new(),
            clock_source: "internal".to_string(),
            time_source: "internal".to_string(),
            clock_addr: String::new(),
            tx_subdev: "A:A".to_string(),
            main_rx_subdev: "A:A".to_string(),
            interferometer_rx_subdev: "A:B".to_string(),
            main_antenna_count: 1,
            interferometer_antenna_count: 0,
        }
    }
}

/// Requested sample rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateOptions {
    /// TX sample rate in Hz
    pub tx_sample_rate: f64,
    /// RX sample rate in Hz
    pub rx_sample_rate: f64,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            tx_sample_rate: 5_000_000.0,
            rx_sample_rate: 5_000_000.0,
        }
    }
}

/// Sample format pair for the streaming path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Host format
    pub cpu_format: String,
    /// Wire format
    pub wire_format: String,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            cpu_format: "fc32".to_string(),
            wire_format: "sc16".to_string(),
        }
    }
}

/// GPIO bank assignment and line masks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioOptions {
    /// Bank carrying active-high signals
    pub bank_high: String,
    /// Bank carrying active-low signals
    pub bank_low: String,
    /// Oscilloscope sync line
    pub scope_sync_mask: u32,
    /// Attenuator enable line
    pub attenuator_mask: u32,
    /// Transmit/receive switch line
    pub tr_mask: u32,
    /// AGC status input line
    pub agc_status_mask: u32,
    /// Low-power status input line
    pub low_power_mask: u32,
    /// Test-mode output line
    pub test_mode_mask: u32,
}

impl Default for GpioOptions {
    fn default() -> Self {
        Self {
            bank_high: "RXA".to_string(),
            bank_low: "TXA".to_string(),
            scope_sync_mask: 0b0000_0001,
            attenuator_mask: 0b0000_0010,
            tr_mask: 0b0000_0100,
            agc_status_mask: 0b0000_1000,
            low_power_mask: 0b0001_0000,
            test_mode_mask: 0b0010_0000,
        }
    }
}

impl GpioOptions {
    /// Lines used as outputs (role lines plus test mode).
    pub fn output_lines(&self) -> u32 {
        self.scope_sync_mask | self.attenuator_mask | self.tr_mask | self.test_mode_mask
    }

    /// Lines used as status inputs.
    pub fn input_lines(&self) -> u32 {
        self.agc_status_mask | self.low_power_mask
    }

    /// Check that every mask is set and no two masks share a line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("scope_sync_mask", self.scope_sync_mask),
            ("attenuator_mask", self.attenuator_mask),
            ("tr_mask", self.tr_mask),
            ("agc_status_mask", self.agc_status_mask),
            ("low_power_mask", self.low_power_mask),
            ("test_mode_mask", self.test_mode_mask),
        ];

        for (name, mask) in &named {
            if *mask == 0 {
                return Err(ConfigError::Validation(format!("{} must not be zero", name)));
            }
        }

        for (i, (a_name, a)) in named.iter().enumerate() {
            for (b_name, b) in &named[i + 1..] {
                if a & b != 0 {
                    return Err(ConfigError::Validation(format!(
                        "{} and {} share GPIO lines {:#x}",
                        a_name,
                        b_name,
                        a & b
                    )));
                }
            }
        }

        if self.bank_high.is_empty() || self.bank_low.is_empty() {
            return Err(ConfigError::Validation("GPIO bank names must be set".to_string()));
        }
        if self.bank_high == self.bank_low {
            return Err(ConfigError::Validation(format!(
                "high and low banks are both {}",
                self.bank_high
            )));
        }
        Ok(())
    }
}

/// Timing budgets for tuning, scheduling and lock checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOptions {
    /// Delay applied to multi-channel retunes, in microseconds
    pub tune_delay_us: u64,
    /// Lead time between reading device time and the first pulse, in microseconds
    pub scheduling_delay_us: u64,
    /// Number of reference-lock polls before giving up
    pub lock_retries: u32,
    /// Pause between reference-lock polls, in milliseconds
    pub lock_poll_interval_ms: u64,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            tune_delay_us: 100_000,
            scheduling_delay_us: 50_000,
            lock_retries: 10,
            lock_poll_interval_ms: 100,
        }
    }
}

impl TimingOptions {
    pub fn tune_delay(&self) -> Duration {
        Duration::from_micros(self.tune_delay_us)
    }

    pub fn scheduling_delay(&self) -> Duration {
        Duration::from_micros(self.scheduling_delay_us)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Complete driver options.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    pub device: DeviceOptions,
    pub rates: RateOptions,
    pub streams: StreamOptions,
    pub gpio: GpioOptions,
    pub timing: TimingOptions,
    pub logging: LogConfig,
}

impl DriverOptions {
    /// Load options from the default search path, or defaults if none exist.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load_from(&path);
            }
            tracing::warn!(path = %path.display(), "{} points at a missing file", CONFIG_ENV);
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load options from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let options = Self::parse(&content)?;
        options.validate()?;
        tracing::info!(path = %path.display(), "loaded driver options");
        Ok(options)
    }

    /// Parse options from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize options to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Candidate option file locations, in search order.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./darn.yaml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "darn") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/darn/config.yaml"));
        paths
    }

    /// Validate rates, antenna counts and GPIO masks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rates.tx_sample_rate > 0.0) || !(self.rates.rx_sample_rate > 0.0) {
            return Err(ConfigError::Validation(
                "sample rates must be positive".to_string(),
            ));
        }
        if self.device.main_antenna_count == 0 {
            return Err(ConfigError::Validation(
                "main_antenna_count must be > 0".to_string(),
            ));
        }
        if self.device.interferometer_antenna_count > self.device.main_antenna_count {
            return Err(ConfigError::Validation(format!(
                "interferometer_antenna_count {} exceeds main_antenna_count {}",
                self.device.interferometer_antenna_count, self.device.main_antenna_count
            )));
        }
        if self.timing.lock_retries == 0 {
            return Err(ConfigError::Validation(
                "lock_retries must be > 0".to_string(),
            ));
        }
        self.gpio.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options_validate() {
        let options = DriverOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.streams.cpu_format, "fc32");
        assert_eq!(options.gpio.bank_high, "RXA");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
device:
  args: "addr0=192.168.10.100,addr1=192.168.10.101"
  clock_source: external
  main_antenna_count: 2
  interferometer_antenna_count: 1

rates:
  tx_sample_rate: 10.0e6

gpio:
  bank_high: RXA
  bank_low: TXA
  tr_mask: 0x40

timing:
  tune_delay_us: 20000
"#;
        let options = DriverOptions::parse(yaml).unwrap();
        assert_eq!(options.device.clock_source, "external");
        assert_eq!(options.device.main_antenna_count, 2);
        assert_eq!(options.rates.tx_sample_rate, 10_000_000.0);
        assert_eq!(options.rates.rx_sample_rate, 5_000_000.0);
        assert_eq!(options.gpio.tr_mask, 0x40);
        assert_eq!(options.timing.tune_delay(), Duration::from_millis(20));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_overlapping_masks_rejected() {
        let mut options = DriverOptions::default();
        options.gpio.attenuator_mask = options.gpio.tr_mask | 0x80;
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("attenuator_mask and tr_mask"));
    }

    #[test]
    fn test_zero_mask_rejected() {
        let mut options = DriverOptions::default();
        options.gpio.scope_sync_mask = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_same_bank_rejected() {
        let mut options = DriverOptions::default();
        options.gpio.bank_low = options.gpio.bank_high.clone();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_antenna_counts() {
        let mut options = DriverOptions::default();
        options.device.interferometer_antenna_count = 2;
        assert!(options.validate().is_err());

        options.device.main_antenna_count = 0;
        options.device.interferometer_antenna_count = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("darn.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "rates:\n  rx_sample_rate: 2.5e6").unwrap();

        let options = DriverOptions::load_from(&path).unwrap();
        assert_eq!(options.rates.rx_sample_rate, 2_500_000.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DriverOptions::load_from(Path::new("/nonexistent/darn.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_yaml_round_trip() {
        let options = DriverOptions::default();
        let yaml = options.to_yaml().unwrap();
        assert!(yaml.contains("gpio:"));
        assert_eq!(DriverOptions::parse(&yaml).unwrap(), options);
    }

    #[test]
    fn test_search_paths() {
        let paths = DriverOptions::config_search_paths();
        assert!(paths[0].ends_with("darn.yaml"));
        assert!(paths.last().unwrap().starts_with("/etc/darn"));
    }
}
