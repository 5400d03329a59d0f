use super::range_table;
use super::structs::MeterReading;
use super::MeterError;
use log::debug;
use serde_json::{Map, Value};

// ES51922 frame constants
pub const PACKET_LEN: usize = 14;
pub const TERMINATOR: [u8; 2] = [0x0D, 0x0A];
pub const DIGIT_COUNT: usize = 5;

// Byte 7, info flags
const INFO_PERCENT: u8 = 0x08;
const INFO_NEGATIVE: u8 = 0x04;
const INFO_LOW_BATTERY: u8 = 0x02;
const INFO_OVERLOAD: u8 = 0x01;

// Byte 8
const REL_RELATIVE: u8 = 0x02;

// Byte 10, voltage / mode flags
const VOLT_DC: u8 = 0x08;
const VOLT_AC: u8 = 0x04;
const VOLT_AUTO: u8 = 0x02;
const VOLT_HZ: u8 = 0x01;

// Byte 11
const HOLD_HOLD: u8 = 0x02;

/// Raw fields of a validated frame, before range resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PacketFields {
    pub range_index: u8,
    pub digits: [u8; DIGIT_COUNT],
    pub mode_nibble: u8,
    pub info_flags: u8,
    pub rel_flags: u8,
    pub limit_flags: u8,
    pub voltage_flags: u8,
    pub hold_flags: u8,
}

impl PacketFields {
    pub fn is_overload(&self) -> bool { self.info_flags & INFO_OVERLOAD != 0 }
    pub fn is_negative(&self) -> bool { self.info_flags & INFO_NEGATIVE != 0 }

    fn flags(&self) -> Map<String, Value> {
        let mut flags = Map::new();
        flags.insert("low_battery".to_string(), Value::from(self.info_flags & INFO_LOW_BATTERY != 0));
        flags.insert("hold".to_string(), Value::from(self.hold_flags & HOLD_HOLD != 0));
        flags.insert("relative".to_string(), Value::from(self.rel_flags & REL_RELATIVE != 0));
        flags.insert("dc".to_string(), Value::from(self.voltage_flags & VOLT_DC != 0));
        flags.insert("ac".to_string(), Value::from(self.voltage_flags & VOLT_AC != 0));
        flags.insert("auto".to_string(), Value::from(self.voltage_flags & VOLT_AUTO != 0));
        flags.insert("hz".to_string(), Value::from(self.voltage_flags & VOLT_HZ != 0));
        flags.insert("percent".to_string(), Value::from(self.info_flags & INFO_PERCENT != 0));
        flags
    }
}

/// Checks length and terminator and pulls the bit fields out of a frame
pub fn split_packet(packet: &[u8]) -> Result<PacketFields, MeterError> {
    if packet.len() != PACKET_LEN {
        return Err(MeterError::Format(format!("Invalid packet length: {}", packet.len())));
    }

    if packet[12..14] != TERMINATOR {
        return Err(MeterError::Format(format!("Invalid terminator: {}", hex::encode(&packet[12..14]))));
    }

    let mut digits = [0u8; DIGIT_COUNT];
    for (i, digit) in digits.iter_mut().enumerate() {
        let d = packet[i + 1] & 0x0F;
        /* blank or garbage segments read as zero */
        *digit = if d > 9 { 0 } else { d };
    }

    Ok(PacketFields {
        range_index: packet[0] & 0x07,
        digits,
        mode_nibble: packet[6] & 0x0F,
        info_flags: packet[7] & 0x0F,
        rel_flags: packet[8] & 0x0F,
        limit_flags: packet[9] & 0x0F,
        voltage_flags: packet[10] & 0x0F,
        hold_flags: packet[11] & 0x0F,
    })
}

/// Composes the display digits, most significant first, and places the decimal point
pub fn digits_to_value(digits: &[u8; DIGIT_COUNT], decimal_pos: u8) -> f64 {
    let mut value_int: u32 = 0;
    for d in digits {
        value_int = value_int * 10 + *d as u32;
    }

    let exponent = DIGIT_COUNT as i32 - decimal_pos as i32;
    value_int as f64 / 10_f64.powi(exponent)
}

/// Decodes one 14 byte ES51922 frame.
///
/// Never fails: a frame which does not validate comes back as a reading with
/// `is_overload` set, no value and an `error` flag describing the problem.
pub fn decode_packet(packet: &[u8]) -> MeterReading {
    let fields = match split_packet(packet) {
        Ok(f) => f,
        Err(e) => {
            let message = match e {
                MeterError::Format(m) => m,
                other => other.to_string(),
            };
            debug!("Frame {} rejected: {}", hex::encode(packet), message);
            return MeterReading::parse_error(message, packet);
        }
    };

    let info = range_table::lookup(fields.mode_nibble, fields.range_index);

    let value = if fields.is_overload() {
        None
    } else {
        let v = digits_to_value(&fields.digits, info.decimal_pos);
        Some(if fields.is_negative() { -v } else { v })
    };

    MeterReading::new(
        value,
        info.unit,
        info.mode,
        fields.is_overload(),
        fields.is_negative(),
        fields.flags(),
        packet,
    )
}
