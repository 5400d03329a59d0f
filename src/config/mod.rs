use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// WCH UART-to-KB/MS bridge used by the UT61E+ / UT161E USB cable
pub const WCH_VENDOR_ID: u16 = 0x1a86;
pub const UT161E_PRODUCT_ID: u16 = 0xe429;

const CONFIG_FILE: &str = "ut61e.yaml";
const CONFIG_ENV: &str = "UT61E_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("unable to parse config {path}: {message}")]
    Parse { path: String, message: String },
}

fn connection_vendor_id_default() -> u16 { return WCH_VENDOR_ID }
fn connection_product_id_default() -> u16 { return UT161E_PRODUCT_ID }
fn connection_timeout_ms_default() -> u64 { return 5000 }
fn connection_payload_offsets_default() -> Vec<usize> { return vec![0, 1, 2, 5] }

/// Identity and transport settings of one meter session.
///
/// `payload_offsets` lists where the 14 byte frame may start inside a HID
/// report. The default set was found on the stock WCH cable only, other
/// cable revisions may need a different list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ConnectionParams {
    #[serde(default="connection_vendor_id_default")]
    pub vendor_id: u16,
    #[serde(default="connection_product_id_default")]
    pub product_id: u16,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default="connection_timeout_ms_default")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default="connection_payload_offsets_default")]
    pub payload_offsets: Vec<usize>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        return ConnectionParams {
            vendor_id: connection_vendor_id_default(),
            product_id: connection_product_id_default(),
            serial_number: None,
            timeout_ms: connection_timeout_ms_default(),
            simulate: false,
            payload_offsets: connection_payload_offsets_default(),
        }
    }
}

impl ConnectionParams {
    pub fn simulated() -> Self {
        return ConnectionParams { simulate: true, ..Default::default() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn timing_settle_ms_default() -> u64 { return 500 }
fn timing_retry_delay_ms_default() -> u64 { return 200 }
fn timing_poll_interval_ms_default() -> u64 { return 500 }
fn timing_overload_backoff_ms_default() -> u64 { return 500 }

/// Fixed delays used by the sampling procedures
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TimingConfig {
    #[serde(default="timing_settle_ms_default")]
    pub settle_ms: u64,
    #[serde(default="timing_retry_delay_ms_default")]
    pub retry_delay_ms: u64,
    #[serde(default="timing_poll_interval_ms_default")]
    pub poll_interval_ms: u64,
    #[serde(default="timing_overload_backoff_ms_default")]
    pub overload_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        return TimingConfig {
            settle_ms: timing_settle_ms_default(),
            retry_delay_ms: timing_retry_delay_ms_default(),
            poll_interval_ms: timing_poll_interval_ms_default(),
            overload_backoff_ms: timing_overload_backoff_ms_default(),
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration { Duration::from_millis(self.settle_ms) }
    pub fn retry_delay(&self) -> Duration { Duration::from_millis(self.retry_delay_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn overload_backoff(&self) -> Duration { Duration::from_millis(self.overload_backoff_ms) }
}

fn sampling_read_retries_default() -> u32 { return 3 }
fn sampling_sample_count_default() -> u32 { return 5 }
fn sampling_sample_delay_ms_default() -> u64 { return 500 }
fn sampling_resistance_samples_default() -> u32 { return 5 }
fn sampling_resistance_delay_ms_default() -> u64 { return 300 }
fn sampling_stable_timeout_ms_default() -> u64 { return 10_000 }
fn sampling_stable_threshold_default() -> f64 { return 0.05 }
fn sampling_stable_window_default() -> usize { return 3 }

/// Defaults for callers which do not pass their own sampling arguments
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SamplingConfig {
    #[serde(default="sampling_read_retries_default")]
    pub read_retries: u32,
    #[serde(default="sampling_sample_count_default")]
    pub sample_count: u32,
    #[serde(default="sampling_sample_delay_ms_default")]
    pub sample_delay_ms: u64,
    #[serde(default="sampling_resistance_samples_default")]
    pub resistance_samples: u32,
    #[serde(default="sampling_resistance_delay_ms_default")]
    pub resistance_delay_ms: u64,
    #[serde(default="sampling_stable_timeout_ms_default")]
    pub stable_timeout_ms: u64,
    #[serde(default="sampling_stable_threshold_default")]
    pub stable_threshold: f64,
    #[serde(default="sampling_stable_window_default")]
    pub stable_window: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        return SamplingConfig {
            read_retries: sampling_read_retries_default(),
            sample_count: sampling_sample_count_default(),
            sample_delay_ms: sampling_sample_delay_ms_default(),
            resistance_samples: sampling_resistance_samples_default(),
            resistance_delay_ms: sampling_resistance_delay_ms_default(),
            stable_timeout_ms: sampling_stable_timeout_ms_default(),
            stable_threshold: sampling_stable_threshold_default(),
            stable_window: sampling_stable_window_default(),
        }
    }
}

impl SamplingConfig {
    pub fn sample_delay(&self) -> Duration { Duration::from_millis(self.sample_delay_ms) }
    pub fn resistance_delay(&self) -> Duration { Duration::from_millis(self.resistance_delay_ms) }
    pub fn stable_timeout(&self) -> Duration { Duration::from_millis(self.stable_timeout_ms) }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct MeterConfig {
    #[serde(default)]
    pub connection: ConnectionParams,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl MeterConfig {
    /// Settings for a session without hardware
    pub fn simulated() -> Self {
        return MeterConfig { connection: ConnectionParams::simulated(), ..Default::default() }
    }

    pub fn from_yaml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let mut file = File::open(path).map_err(|e| ConfigError::Io { path: origin.clone(), source: e })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| ConfigError::Io { path: origin.clone(), source: e })?;

        let c = Self::from_yaml(&contents, &origin)?;
        info!("Meter config loaded from {origin}");
        Ok(c)
    }

    /// Looks for `$UT61E_CONFIG`, then `config/ut61e.yaml`, then `ut61e.yaml`.
    /// Without any file the built-in defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }

        for candidate in Self::search_paths() {
            if candidate.is_file() {
                return Self::load_from(&candidate);
            }
        }

        debug!("No {CONFIG_FILE} found, using defaults");
        Ok(MeterConfig::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        return vec![Path::new("config").join(CONFIG_FILE), PathBuf::from(CONFIG_FILE)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let c = MeterConfig::from_yaml("{}", "inline").unwrap();
        assert_eq!(c, MeterConfig::default());
        assert_eq!(c.connection.vendor_id, 0x1a86);
        assert_eq!(c.connection.product_id, 0xe429);
        assert_eq!(c.connection.payload_offsets, vec![0, 1, 2, 5]);
        assert_eq!(c.sampling.read_retries, 3);
        assert_eq!(c.timing.settle(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r"
connection:
  simulate: true
  payload_offsets: [1, 3]
sampling:
  stable_threshold: 0.02
";
        let c = MeterConfig::from_yaml(yaml, "inline").unwrap();
        assert!(c.connection.simulate);
        assert_eq!(c.connection.payload_offsets, vec![1, 3]);
        assert_eq!(c.connection.timeout_ms, 5000);
        assert_eq!(c.sampling.stable_threshold, 0.02);
        assert_eq!(c.sampling.stable_window, 3);
        assert_eq!(c.timing, TimingConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection:\n  product_id: 1234\n  serial_number: \"ABC\"").unwrap();

        let c = MeterConfig::load_from(file.path()).unwrap();
        assert_eq!(c.connection.product_id, 1234);
        assert_eq!(c.connection.serial_number, Some("ABC".to_string()));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection: [not, a, map]").unwrap();

        let res = MeterConfig::load_from(file.path());
        assert!(matches!(res, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let res = MeterConfig::load_from(Path::new("/nonexistent/ut61e.yaml"));
        assert!(matches!(res, Err(ConfigError::Io { .. })));
    }
}
