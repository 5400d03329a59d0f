use super::parser::{PACKET_LEN, TERMINATOR};
use super::MeterError;
use crate::config::ConnectionParams;
use log::{debug, info};
#[cfg(feature = "hid")]
use log::warn;
use serde::Serialize;

/// Largest HID report we ask the bridge for
pub const REPORT_LEN: usize = 128;

/// Upper bound of reports thrown away by one `flush_input`
#[cfg(feature = "hid")]
const FLUSH_MAX_REPORTS: usize = 64;

/// Source of raw ES51922 frames.
///
/// One implementation talks to the WCH HID bridge, another synthesizes
/// frames for bench runs without a meter. Procedures only see this trait.
pub trait Transport {
    fn open(&mut self) -> Result<(), MeterError>;

    /// Blocks until one 14 byte frame is available or the read timeout passes
    fn read_packet(&mut self) -> Result<[u8; PACKET_LEN], MeterError>;

    /// Releases the channel. Safe to call more than once, never fails.
    fn close(&mut self);

    /// Drops anything buffered so the next read starts on a fresh frame
    fn flush_input(&mut self) -> Result<(), MeterError>;

    fn is_open(&self) -> bool;

    fn is_simulated(&self) -> bool {
        false
    }
}

/// Locates the 14 byte frame inside a HID report.
///
/// Offsets are tried in order, the first window with only 7 bit bytes wins.
/// Without such a window the first 14 bytes are used as they are.
pub fn extract_payload(report: &[u8], offsets: &[usize]) -> Result<[u8; PACKET_LEN], MeterError> {
    let mut packet = [0u8; PACKET_LEN];

    for offset in offsets {
        let window = match report.get(*offset..).and_then(|rest| rest.get(..PACKET_LEN)) {
            Some(w) => w,
            None => continue,
        };

        if window.iter().all(|b| *b <= 0x7F) {
            packet.copy_from_slice(window);
            return Ok(packet);
        }
    }

    if report.len() >= PACKET_LEN {
        debug!("No 7 bit window in report {}, using the first {PACKET_LEN} bytes", hex::encode(report));
        packet.copy_from_slice(&report[..PACKET_LEN]);
        return Ok(packet);
    }

    Err(MeterError::Format(format!("HID report too short: {} bytes", report.len())))
}

// Simulated resistance, in display counts of the 220 Ohm row (1 count = 1 mOhm)
pub const SIM_FLOOR_COUNTS: u32 = 5_000;
pub const SIM_CEILING_COUNTS: u32 = 8_000;
pub const SIM_STEP_COUNTS: u32 = 100;

/// Synthesizes resistance frames which climb from 5.000 Ohm to 8.000 Ohm
/// in 0.100 Ohm steps and start over.
pub struct SimulatedTransport {
    params: ConnectionParams,
    next_counts: u32,
    open: bool,
}

impl SimulatedTransport {
    pub fn new(params: ConnectionParams) -> Self {
        return SimulatedTransport {
            params,
            next_counts: SIM_FLOOR_COUNTS,
            open: false,
        }
    }

    fn advance(&mut self) -> u32 {
        let counts = self.next_counts;
        self.next_counts += SIM_STEP_COUNTS;
        if self.next_counts > SIM_CEILING_COUNTS {
            self.next_counts = SIM_FLOOR_COUNTS;
        }
        counts
    }
}

/// Builds a 220 Ohm range resistance frame showing `counts` on the display
pub fn resistance_frame(counts: u32) -> [u8; PACKET_LEN] {
    let mut packet = [0x30u8; PACKET_LEN];
    packet[0] = 0x30;   // range 0
    let mut rest = counts % 100_000;
    for i in (1..=5).rev() {
        packet[i] = 0x30 | (rest % 10) as u8;
        rest /= 10;
    }
    packet[6] = 0x33;   // resistance
    packet[10] = 0x3A;  // DC, auto range
    packet[12] = TERMINATOR[0];
    packet[13] = TERMINATOR[1];
    packet
}

impl Transport for SimulatedTransport {
    fn open(&mut self) -> Result<(), MeterError> {
        info!("SIM: opening meter VID=0x{:04x} PID=0x{:04x}", self.params.vendor_id, self.params.product_id);
        self.open = true;
        Ok(())
    }

    fn read_packet(&mut self) -> Result<[u8; PACKET_LEN], MeterError> {
        let counts = self.advance();
        Ok(resistance_frame(counts))
    }

    fn close(&mut self) {
        if self.open {
            info!("SIM: meter closed");
        }
        self.open = false;
    }

    fn flush_input(&mut self) -> Result<(), MeterError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// HID device matching the meter vendor, as reported by enumeration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HidDeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: Option<String>,
}

#[cfg(feature = "hid")]
pub use hid_backend::HidTransport;

#[cfg(feature = "hid")]
mod hid_backend {
    use super::*;
    use hidapi::{HidApi, HidDevice};

    /// Reads ES51922 frames from the WCH UART-to-HID bridge. The meter
    /// streams about two frames per second, nothing is ever written to it.
    pub struct HidTransport {
        params: ConnectionParams,
        device: Option<HidDevice>,
    }

    impl HidTransport {
        pub fn new(params: ConnectionParams) -> Self {
            return HidTransport { params, device: None }
        }

        fn read_timeout_ms(&self) -> i32 {
            i32::try_from(self.params.timeout_ms).unwrap_or(i32::MAX)
        }
    }

    impl Transport for HidTransport {
        fn open(&mut self) -> Result<(), MeterError> {
            if self.device.is_some() {
                return Ok(());
            }

            let vid = self.params.vendor_id;
            let pid = self.params.product_id;

            let api = HidApi::new().map_err(|e| MeterError::Connection(format!("HID subsystem unavailable: {e}")))?;
            let device = match &self.params.serial_number {
                Some(serial) => api.open_serial(vid, pid, serial),
                None => api.open(vid, pid),
            }
            .map_err(|e| MeterError::Connection(format!("Failed to open HID device VID=0x{vid:04x} PID=0x{pid:04x}: {e}")))?;

            device
                .set_blocking_mode(true)
                .map_err(|e| MeterError::Connection(format!("Failed to configure HID device: {e}")))?;

            let manufacturer = device.get_manufacturer_string().ok().flatten().unwrap_or_default();
            let product = device.get_product_string().ok().flatten().unwrap_or_default();
            info!("Opened HID device VID=0x{vid:04x} PID=0x{pid:04x} ({manufacturer} {product})");

            self.device = Some(device);
            Ok(())
        }

        fn read_packet(&mut self) -> Result<[u8; PACKET_LEN], MeterError> {
            let timeout_ms = self.read_timeout_ms();
            let device = self.device.as_ref().ok_or(MeterError::NotOpen)?;

            let mut report = [0u8; REPORT_LEN];
            let n = device.read_timeout(&mut report, timeout_ms).map_err(|e| {
                let message = e.to_string();
                if message.to_lowercase().contains("timeout") {
                    MeterError::Timeout(format!("Timeout reading from HID device: {message}"))
                } else {
                    MeterError::Device(message)
                }
            })?;

            if n == 0 {
                return Err(MeterError::Timeout(format!("No HID report within {} ms", self.params.timeout_ms)));
            }

            extract_payload(&report[..n], &self.params.payload_offsets)
        }

        fn close(&mut self) {
            /* dropping the handle releases it */
            if self.device.take().is_some() {
                info!("HID device closed");
            }
        }

        fn flush_input(&mut self) -> Result<(), MeterError> {
            let device = self.device.as_ref().ok_or(MeterError::NotOpen)?;

            let mut report = [0u8; REPORT_LEN];
            for _ in 0..FLUSH_MAX_REPORTS {
                match device.read_timeout(&mut report, 0) {
                    Ok(0) => return Ok(()),
                    Ok(n) => debug!("Flushed {n} byte report"),
                    Err(e) => return Err(MeterError::Device(format!("Flush failed: {e}"))),
                }
            }

            warn!("Meter kept streaming while flushing, giving up after {FLUSH_MAX_REPORTS} reports");
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.device.is_some()
        }
    }

    pub fn enumerate(vendor_id: u16) -> Result<Vec<HidDeviceSummary>, MeterError> {
        let api = HidApi::new().map_err(|e| MeterError::Connection(format!("HID subsystem unavailable: {e}")))?;

        Ok(api
            .device_list()
            .filter(|d| d.vendor_id() == vendor_id)
            .map(|d| HidDeviceSummary {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                manufacturer: d.manufacturer_string().unwrap_or_default().to_string(),
                product: d.product_string().unwrap_or_default().to_string(),
                serial_number: d.serial_number().map(|s| s.to_string()),
            })
            .collect())
    }
}

/// Stand-in when the crate is built without the `hid` feature
#[cfg(not(feature = "hid"))]
pub struct UnsupportedTransport {
    params: ConnectionParams,
}

#[cfg(not(feature = "hid"))]
impl Transport for UnsupportedTransport {
    fn open(&mut self) -> Result<(), MeterError> {
        Err(MeterError::Connection(format!(
            "HID support not compiled in, cannot open VID=0x{:04x} PID=0x{:04x} (enable the `hid` feature or use simulate mode)",
            self.params.vendor_id, self.params.product_id
        )))
    }

    fn read_packet(&mut self) -> Result<[u8; PACKET_LEN], MeterError> {
        Err(MeterError::NotOpen)
    }

    fn close(&mut self) {}

    fn flush_input(&mut self) -> Result<(), MeterError> {
        Err(MeterError::NotOpen)
    }

    fn is_open(&self) -> bool {
        false
    }
}

/// Picks the transport for the given parameters
pub fn build_transport(params: &ConnectionParams) -> Box<dyn Transport> {
    if params.simulate {
        return Box::new(SimulatedTransport::new(params.clone()));
    }

    #[cfg(feature = "hid")]
    {
        Box::new(HidTransport::new(params.clone()))
    }

    #[cfg(not(feature = "hid"))]
    {
        Box::new(UnsupportedTransport { params: params.clone() })
    }
}

/// Lists HID devices of the given vendor. Enumeration problems are logged
/// and give an empty list.
pub fn list_hid_devices(vendor_id: u16) -> Vec<HidDeviceSummary> {
    #[cfg(feature = "hid")]
    {
        match hid_backend::enumerate(vendor_id) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to list HID devices: {e}");
                Vec::new()
            }
        }
    }

    #[cfg(not(feature = "hid"))]
    {
        debug!("HID support not compiled in, no devices for vendor 0x{vendor_id:04x}");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_ut61e::parser::decode_packet;
    use crate::metering_ut61e::structs::{Mode, Unit};

    const OFFSETS: [usize; 4] = [0, 1, 2, 5];

    #[test]
    fn test_extract_at_offset_zero() {
        let frame = resistance_frame(1234);
        let packet = extract_payload(&frame, &OFFSETS).unwrap();
        assert_eq!(packet, frame);
    }

    #[test]
    fn test_extract_skips_high_wrapper_bytes() {
        let frame = resistance_frame(4321);
        let mut report = vec![0xAB, 0xCD, 0x80];
        report.extend_from_slice(&frame);
        report.extend_from_slice(&[0x00; 4]);

        // windows at 0, 1 and 2 still cover wrapper bytes above 0x7F
        let packet = extract_payload(&report, &[0, 1, 2, 3]).unwrap();
        assert_eq!(packet, frame);
    }

    #[test]
    fn test_extract_at_offset_five() {
        let frame = resistance_frame(777);
        let mut report = vec![0x90, 0x91, 0x92, 0x93, 0x94];
        report.extend_from_slice(&frame);

        let packet = extract_payload(&report, &OFFSETS).unwrap();
        assert_eq!(packet, frame);
    }

    #[test]
    fn test_extract_falls_back_to_first_bytes() {
        let report = [0xFFu8; 16];
        let packet = extract_payload(&report, &OFFSETS).unwrap();
        assert_eq!(packet, [0xFFu8; 14]);
    }

    #[test]
    fn test_extract_too_short() {
        let res = extract_payload(&[0x30; 10], &OFFSETS);
        assert!(matches!(res, Err(MeterError::Format(_))));
    }

    #[test]
    fn test_extract_ignores_offsets_past_the_report() {
        let frame = resistance_frame(2_500);
        let mut report = frame.to_vec();
        report.extend_from_slice(&[0x30; 6]);

        let packet = extract_payload(&report, &[usize::MAX, usize::MAX - 3, 7, 0]).unwrap();
        assert_eq!(packet, frame);
    }

    #[test]
    fn test_extract_with_configured_huge_offset() {
        let config = crate::config::MeterConfig::from_yaml("connection:\n  payload_offsets: [18446744073709551615]", "inline").unwrap();
        let packet = extract_payload(&[0x30; 20], &config.connection.payload_offsets).unwrap();
        assert_eq!(packet, [0x30; PACKET_LEN]);
    }

    #[test]
    fn test_resistance_frame_decodes() {
        let r = decode_packet(&resistance_frame(5_100));
        assert_eq!(r.value(), Some(5.1));
        assert_eq!(r.unit(), Unit::Ohm);
        assert_eq!(r.mode(), &Mode::Resistance);
    }

    #[test]
    fn test_simulated_cycle() {
        let mut t = SimulatedTransport::new(ConnectionParams::simulated());
        t.open().unwrap();
        assert!(t.is_open());

        let steps = ((SIM_CEILING_COUNTS - SIM_FLOOR_COUNTS) / SIM_STEP_COUNTS + 1) as usize;
        let mut values = Vec::new();
        for _ in 0..steps + 2 {
            let r = decode_packet(&t.read_packet().unwrap());
            assert_eq!(r.unit(), Unit::Ohm);
            assert_eq!(r.mode(), &Mode::Resistance);
            values.push(r.value().unwrap());
        }

        assert_eq!(values[0], 5.0);
        for pair in values[..steps].windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(values[steps - 1], 8.0);
        assert_eq!(values[steps], 5.0);
        assert_eq!(values[steps + 1], 5.1);

        t.close();
        t.close();
        assert!(!t.is_open());
    }

    #[test]
    fn test_simulated_sessions_are_independent() {
        let mut a = SimulatedTransport::new(ConnectionParams::simulated());
        let mut b = SimulatedTransport::new(ConnectionParams::simulated());
        a.read_packet().unwrap();
        a.read_packet().unwrap();
        assert_eq!(b.read_packet().unwrap(), resistance_frame(SIM_FLOOR_COUNTS));
    }

    #[cfg(not(feature = "hid"))]
    #[test]
    fn test_hardware_without_hid_support() {
        let mut t = build_transport(&ConnectionParams::default());
        assert!(matches!(t.open(), Err(MeterError::Connection(_))));
        assert!(!t.is_open());
        assert!(list_hid_devices(0x1a86).is_empty());
    }
}
