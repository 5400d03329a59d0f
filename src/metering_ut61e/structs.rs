use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Unit tag shown next to the LCD digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Ohm,
    KiloOhm,
    MegaOhm,
    Volt,
    MilliVolt,
    Ampere,
    MilliAmpere,
    MicroAmpere,
    Hertz,
    KiloHertz,
    MegaHertz,
    NanoFarad,
    MicroFarad,
    MilliFarad,
    Unknown,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Ohm => "Ohm",
            Unit::KiloOhm => "kOhm",
            Unit::MegaOhm => "MOhm",
            Unit::Volt => "V",
            Unit::MilliVolt => "mV",
            Unit::Ampere => "A",
            Unit::MilliAmpere => "mA",
            Unit::MicroAmpere => "uA",
            Unit::Hertz => "Hz",
            Unit::KiloHertz => "kHz",
            Unit::MegaHertz => "MHz",
            Unit::NanoFarad => "nF",
            Unit::MicroFarad => "uF",
            Unit::MilliFarad => "mF",
            Unit::Unknown => "?",
        }
    }

    /// Factor to the base unit for the resistance tags, `None` for everything else
    pub fn ohm_factor(&self) -> Option<f64> {
        match self {
            Unit::Ohm => Some(1.0),
            Unit::KiloOhm => Some(1_000.0),
            Unit::MegaOhm => Some(1_000_000.0),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Measurement function selected on the rotary switch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Resistance,
    DcVoltage,
    DcCurrent,
    Frequency,
    Capacitance,
    /// Mode nibble without a table entry
    Unknown(u8),
    /// The frame could not be decoded, carries the reason
    ParseError(String),
}

impl Mode {
    pub fn is_resistance(&self) -> bool {
        self.to_string().to_lowercase().contains("resistance")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Mode::ParseError(_))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Resistance => f.write_str("Resistance"),
            Mode::DcVoltage => f.write_str("DC Voltage"),
            Mode::DcCurrent => f.write_str("DC Current"),
            Mode::Frequency => f.write_str("Frequency"),
            Mode::Capacitance => f.write_str("Capacitance"),
            Mode::Unknown(nibble) => write!(f, "Unknown (0x{:02X})", nibble),
            Mode::ParseError(message) => write!(f, "Parse Error: {}", message),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One display snapshot of the meter.
///
/// Readings are never modified after construction. `raw_packet` holds a copy
/// of the frame it was decoded from, derived readings (averages) carry none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    value: Option<f64>,
    unit: Unit,
    mode: Mode,
    is_overload: bool,
    is_negative: bool,
    flags: Map<String, Value>,
    #[serde(serialize_with = "serialize_hex")]
    raw_packet: Vec<u8>,
}

fn serialize_hex<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl MeterReading {
    pub fn new(
        value: Option<f64>,
        unit: Unit,
        mode: Mode,
        is_overload: bool,
        is_negative: bool,
        flags: Map<String, Value>,
        raw_packet: &[u8],
    ) -> Self {
        // An overloaded display has no meaningful number
        let value = if is_overload { None } else { value };

        MeterReading {
            value,
            unit,
            mode,
            is_overload,
            is_negative,
            flags,
            raw_packet: raw_packet.to_vec(),
        }
    }

    /// Reading for a frame that failed validation
    pub fn parse_error(message: String, raw_packet: &[u8]) -> Self {
        let mut flags = Map::new();
        flags.insert("error".to_string(), Value::from(message.clone()));

        MeterReading {
            value: None,
            unit: Unit::Unknown,
            mode: Mode::ParseError(message),
            is_overload: true,
            is_negative: false,
            flags,
            raw_packet: raw_packet.to_vec(),
        }
    }

    pub fn value(&self) -> Option<f64> { self.value }
    pub fn unit(&self) -> Unit { self.unit }
    pub fn mode(&self) -> &Mode { &self.mode }
    pub fn is_overload(&self) -> bool { self.is_overload }
    pub fn is_negative(&self) -> bool { self.is_negative }
    pub fn flags(&self) -> &Map<String, Value> { &self.flags }
    pub fn raw_packet(&self) -> &[u8] { &self.raw_packet }

    pub fn flag(&self, name: &str) -> Option<&Value> {
        self.flags.get(name)
    }

    pub fn flag_set(&self, name: &str) -> bool {
        self.flags.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        self.flags.get("error").and_then(|v| v.as_str())
    }

    /// True when the reading carries a number callers can use
    pub fn is_usable(&self) -> bool {
        !self.is_overload && self.value.is_some()
    }

    /// Copy of this reading with one more flag set
    pub fn with_flag(&self, name: &str, value: Value) -> Self {
        let mut copy = self.clone();
        copy.flags.insert(name.to_string(), value);
        copy
    }
}

impl fmt::Display for MeterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "{} {} ({})", v, self.unit, self.mode),
            None => write!(f, "OL {} ({})", self.unit, self.mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_drops_value() {
        let r = MeterReading::new(Some(1.5), Unit::Ohm, Mode::Resistance, true, false, Map::new(), &[]);
        assert_eq!(r.value(), None);
        assert!(!r.is_usable());
    }

    #[test]
    fn test_parse_error_reading() {
        let r = MeterReading::parse_error("Invalid packet length: 3".to_string(), &[1, 2, 3]);
        assert!(r.is_overload());
        assert_eq!(r.value(), None);
        assert_eq!(r.unit().to_string(), "?");
        assert_eq!(r.mode().to_string(), "Parse Error: Invalid packet length: 3");
        assert_eq!(r.error(), Some("Invalid packet length: 3"));
        assert_eq!(r.raw_packet(), &[1, 2, 3]);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::DcVoltage.to_string(), "DC Voltage");
        assert_eq!(Mode::Unknown(0x0a).to_string(), "Unknown (0x0A)");
        assert!(Mode::Resistance.is_resistance());
        assert!(!Mode::Capacitance.is_resistance());
    }

    #[test]
    fn test_serialize_reading() {
        let mut flags = Map::new();
        flags.insert("hold".to_string(), Value::from(true));
        let r = MeterReading::new(Some(2.2), Unit::KiloOhm, Mode::Resistance, false, false, flags, &[0x0d, 0x0a]);

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["unit"], "kOhm");
        assert_eq!(json["mode"], "Resistance");
        assert_eq!(json["flags"]["hold"], true);
        assert_eq!(json["raw_packet"], "0d0a");
    }
}
