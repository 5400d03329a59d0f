//! UT61E / UT161E multimeter library
//!
//! Decodes the ES51922 frames the meter streams over its WCH USB cable and
//! provides the sampling procedures a test bench needs: single reads with
//! retry, averaged readings, resistance in Ohm and waiting for a settled
//! display.

pub mod config;
pub mod metering_ut61e;

// Re-export common types for easier access
pub use config::{ConnectionParams, MeterConfig};
pub use metering_ut61e::{DeviceInfo, DriverError, MeterError, Ut61eDriver};
pub use metering_ut61e::parser::decode_packet;
pub use metering_ut61e::structs::{MeterReading, Mode, Unit};
pub use metering_ut61e::transport::{SimulatedTransport, Transport};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
}
