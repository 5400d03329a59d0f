use crate::config::MeterConfig;
use log::{debug, info};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub mod parser;
pub mod procedures;
pub mod range_table;
pub mod structs;
pub mod transport;
pub mod utils;

use procedures::Procedures;
use structs::MeterReading;
use transport::{HidDeviceSummary, Transport};

/// Failures inside the meter stack
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Format error: {0}")]
    Format(String),
    #[error("Device error: {0}")]
    Device(String),
    #[error("Failed to read after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("No valid samples obtained")]
    NoValidSamples,
    #[error("Reading not stable within {timeout:?} (threshold {:.2}%)", .threshold * 100.0)]
    NotStable { timeout: Duration, threshold: f64 },
    #[error("Device not open")]
    NotOpen,
    #[error("Range table invalid: {0}")]
    RangeTable(String),
}

impl MeterError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MeterError::Timeout(_) | MeterError::RetriesExhausted { .. } | MeterError::NotStable { .. }
        )
    }
}

/// Error kinds seen by callers of the driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("{0}")]
    General(String),
    #[error("{0}")]
    Timeout(String),
}

impl From<MeterError> for DriverError {
    fn from(e: MeterError) -> Self {
        if e.is_timeout() {
            return DriverError::Timeout(e.to_string());
        }
        return DriverError::General(e.to_string());
    }
}

/// Connection summary, no device I/O involved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub simulate: bool,
    pub connected: bool,
}

/// Driver for one UT61E / UT161E meter behind the WCH USB cable
pub struct Ut61eDriver {
    config: MeterConfig,
    procedures: Procedures,
}

impl Ut61eDriver {
    /// Builds the driver with the transport the configuration asks for
    pub fn new(config: MeterConfig) -> Result<Self, DriverError> {
        let transport = transport::build_transport(&config.connection);
        Self::with_transport(config, transport)
    }

    /// Builds the driver on top of a caller supplied transport
    pub fn with_transport(config: MeterConfig, transport: Box<dyn Transport>) -> Result<Self, DriverError> {
        range_table::validate()?;

        debug!(
            "Driver for VID=0x{:04x} PID=0x{:04x} (simulate={})",
            config.connection.vendor_id, config.connection.product_id, transport.is_simulated()
        );

        let procedures = Procedures::new(transport, config.timing.clone());
        return Ok(Ut61eDriver { config, procedures })
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn initialize(&mut self) -> Result<(), DriverError> {
        Ok(self.procedures.init()?)
    }

    pub fn shutdown(&mut self) {
        self.procedures.close();
    }

    pub fn is_connected(&self) -> bool {
        self.procedures.is_open()
    }

    /// Single reading with the configured number of attempts
    pub fn read_value(&mut self) -> Result<MeterReading, DriverError> {
        let retries = self.config.sampling.read_retries;
        Ok(self.procedures.read_once(retries)?)
    }

    /// Averaged resistance in Ohm
    pub fn read_resistance(&mut self, average_count: u32) -> Result<f64, DriverError> {
        let delay = self.config.sampling.resistance_delay();
        let retries = self.config.sampling.read_retries;
        Ok(self.procedures.read_resistance(average_count, delay, retries)?)
    }

    pub fn read_averaged(&mut self, sample_count: u32, delay: Duration) -> Result<MeterReading, DriverError> {
        let retries = self.config.sampling.read_retries;
        Ok(self.procedures.read_averaged(sample_count, delay, retries)?)
    }

    pub fn wait_for_stable(&mut self, timeout: Duration, threshold: f64, window_size: usize) -> Result<MeterReading, DriverError> {
        let retries = self.config.sampling.read_retries;
        Ok(self.procedures.wait_for_stable(timeout, threshold, window_size, retries)?)
    }

    /// `read_resistance` with the configured sample count
    pub fn measure_resistance(&mut self) -> Result<f64, DriverError> {
        let count = self.config.sampling.resistance_samples;
        self.read_resistance(count)
    }

    /// `wait_for_stable` with the configured timeout, threshold and window
    pub fn wait_for_stable_default(&mut self) -> Result<MeterReading, DriverError> {
        let sampling = self.config.sampling.clone();
        self.wait_for_stable(sampling.stable_timeout(), sampling.stable_threshold, sampling.stable_window)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor_id: self.config.connection.vendor_id,
            product_id: self.config.connection.product_id,
            serial_number: self.config.connection.serial_number.clone(),
            simulate: self.procedures.transport().is_simulated(),
            connected: self.procedures.is_open(),
        }
    }

    /// HID devices of the given vendor currently attached
    pub fn list_devices(vendor_id: u16) -> Vec<HidDeviceSummary> {
        let devices = transport::list_hid_devices(vendor_id);
        info!("Found {} HID device(s) for vendor 0x{vendor_id:04x}", devices.len());
        devices
    }
}
