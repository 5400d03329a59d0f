use super::structs::{Mode, Unit};
use super::MeterError;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

/// One row of a measurement category: unit, nominal full scale and where
/// the decimal point sits in the five digit display
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRow {
    pub unit: Unit,
    pub full_scale: f64,
    pub decimal_pos: u8,
}

#[derive(Debug)]
pub struct Category {
    pub mode_nibble: u8,
    pub mode: Mode,
    pub rows: &'static [RangeRow],
}

/// Decimal position used for mode nibbles without a table entry
pub const UNKNOWN_DECIMAL_POS: u8 = 2;

const fn row(unit: Unit, full_scale: f64, decimal_pos: u8) -> RangeRow {
    RangeRow { unit, full_scale, decimal_pos }
}

const VOLTAGE_ROWS: &[RangeRow] = &[
    row(Unit::Volt, 2.2, 3),
    row(Unit::Volt, 22.0, 4),
    row(Unit::Volt, 220.0, 2),
    row(Unit::Volt, 1000.0, 1),
    row(Unit::MilliVolt, 220.0, 2),
];

const RESISTANCE_ROWS: &[RangeRow] = &[
    row(Unit::Ohm, 220.0, 2),
    row(Unit::KiloOhm, 2.2, 3),
    row(Unit::KiloOhm, 22.0, 4),
    row(Unit::KiloOhm, 220.0, 2),
    row(Unit::MegaOhm, 2.2, 3),
    row(Unit::MegaOhm, 22.0, 4),
    row(Unit::MegaOhm, 220.0, 2),
];

const CAPACITANCE_ROWS: &[RangeRow] = &[
    row(Unit::NanoFarad, 22.0, 4),
    row(Unit::NanoFarad, 220.0, 2),
    row(Unit::MicroFarad, 2.2, 3),
    row(Unit::MicroFarad, 22.0, 4),
    row(Unit::MicroFarad, 220.0, 2),
    row(Unit::MilliFarad, 2.2, 3),
    row(Unit::MilliFarad, 22.0, 4),
    row(Unit::MilliFarad, 220.0, 2),
];

/* Rows are indexed by position, the range index selects the row directly */
const FREQUENCY_ROWS: &[RangeRow] = &[
    row(Unit::Hertz, 220.0, 2),
    row(Unit::Hertz, 2200.0, 1),
    row(Unit::KiloHertz, 22.0, 4),
    row(Unit::KiloHertz, 220.0, 2),
    row(Unit::MegaHertz, 2.2, 3),
    row(Unit::MegaHertz, 22.0, 4),
    row(Unit::MegaHertz, 220.0, 2),
];

const MICROAMP_ROWS: &[RangeRow] = &[
    row(Unit::MicroAmpere, 220.0, 2),
    row(Unit::MicroAmpere, 2200.0, 1),
];

const MILLIAMP_ROWS: &[RangeRow] = &[
    row(Unit::MilliAmpere, 22.0, 4),
    row(Unit::MilliAmpere, 220.0, 2),
];

const AMP_ROWS: &[RangeRow] = &[
    row(Unit::Ampere, 10.0, 4),
];

lazy_static! {
    pub static ref CATEGORIES: Vec<Category> = vec![
        Category { mode_nibble: 0x0B, mode: Mode::DcVoltage, rows: VOLTAGE_ROWS },
        Category { mode_nibble: 0x03, mode: Mode::Resistance, rows: RESISTANCE_ROWS },
        Category { mode_nibble: 0x06, mode: Mode::Capacitance, rows: CAPACITANCE_ROWS },
        Category { mode_nibble: 0x02, mode: Mode::Frequency, rows: FREQUENCY_ROWS },
        Category { mode_nibble: 0x0D, mode: Mode::DcCurrent, rows: MICROAMP_ROWS },
        Category { mode_nibble: 0x0F, mode: Mode::DcCurrent, rows: MILLIAMP_ROWS },
        Category { mode_nibble: 0x00, mode: Mode::DcCurrent, rows: AMP_ROWS },
    ];

    static ref BY_NIBBLE: HashMap<u8, &'static Category> = {
        let mut map = HashMap::new();
        for category in CATEGORIES.iter() {
            map.insert(category.mode_nibble, category);
        }
        map
    };
}

/// Result of a range lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RangeInfo {
    pub unit: Unit,
    pub mode: Mode,
    pub decimal_pos: u8,
}

/// Resolves unit, mode and decimal position from the mode nibble and range index.
/// Range indices past the end of a category fall back to its first row.
pub fn lookup(mode_nibble: u8, range_index: u8) -> RangeInfo {
    let category = match BY_NIBBLE.get(&mode_nibble) {
        Some(c) => c,
        None => {
            return RangeInfo {
                unit: Unit::Unknown,
                mode: Mode::Unknown(mode_nibble),
                decimal_pos: UNKNOWN_DECIMAL_POS,
            };
        }
    };

    let row = category.rows.get(range_index as usize).unwrap_or(&category.rows[0]);

    RangeInfo {
        unit: row.unit,
        mode: category.mode.clone(),
        decimal_pos: row.decimal_pos,
    }
}

/// Checks the table once before a driver relies on it
pub fn validate() -> Result<(), MeterError> {
    let mut seen = HashSet::new();

    for category in CATEGORIES.iter() {
        if category.mode_nibble > 0x0F {
            return Err(MeterError::RangeTable(format!("mode nibble 0x{:X} does not fit 4 bits", category.mode_nibble)));
        }
        if !seen.insert(category.mode_nibble) {
            return Err(MeterError::RangeTable(format!("mode nibble 0x{:X} listed twice", category.mode_nibble)));
        }
        if category.rows.is_empty() {
            return Err(MeterError::RangeTable(format!("{} has no rows", category.mode)));
        }
        if category.rows.len() > 8 {
            return Err(MeterError::RangeTable(format!("{} has more rows than a 3 bit range index can select", category.mode)));
        }
        for row in category.rows {
            if row.decimal_pos > 5 {
                return Err(MeterError::RangeTable(format!("{} {} decimal position {} out of range", category.mode, row.unit, row.decimal_pos)));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_valid() {
        assert!(validate().is_ok());
        assert_eq!(CATEGORIES.len(), 7);
    }

    #[test]
    fn test_resistance_rows() {
        let expected = [
            (Unit::Ohm, 2), (Unit::KiloOhm, 3), (Unit::KiloOhm, 4), (Unit::KiloOhm, 2),
            (Unit::MegaOhm, 3), (Unit::MegaOhm, 4), (Unit::MegaOhm, 2),
        ];
        for (idx, (unit, pos)) in expected.iter().enumerate() {
            let info = lookup(0x03, idx as u8);
            assert_eq!(info.unit, *unit);
            assert_eq!(info.decimal_pos, *pos);
            assert_eq!(info.mode, Mode::Resistance);
        }
    }

    #[test]
    fn test_out_of_range_index_clamps_to_first_row() {
        assert_eq!(lookup(0x03, 7).unit, Unit::Ohm);
        assert_eq!(lookup(0x0B, 6).unit, Unit::Volt);
        assert_eq!(lookup(0x0B, 6).decimal_pos, 3);
        assert_eq!(lookup(0x00, 3).unit, Unit::Ampere);
        // index 7 is the last capacitance row, no clamp
        assert_eq!(lookup(0x06, 7).unit, Unit::MilliFarad);
        assert_eq!(lookup(0x06, 7).decimal_pos, 2);
    }

    #[test]
    fn test_current_categories() {
        assert_eq!(lookup(0x0D, 1).unit, Unit::MicroAmpere);
        assert_eq!(lookup(0x0D, 1).decimal_pos, 1);
        assert_eq!(lookup(0x0F, 0).unit, Unit::MilliAmpere);
        assert_eq!(lookup(0x0F, 0).mode, Mode::DcCurrent);
        assert_eq!(lookup(0x02, 2).unit, Unit::KiloHertz);
    }

    #[test]
    fn test_frequency_rows_by_position() {
        let expected = [
            (Unit::Hertz, 2), (Unit::Hertz, 1), (Unit::KiloHertz, 4), (Unit::KiloHertz, 2),
            (Unit::MegaHertz, 3), (Unit::MegaHertz, 4), (Unit::MegaHertz, 2),
        ];
        for (idx, (unit, pos)) in expected.iter().enumerate() {
            let info = lookup(0x02, idx as u8);
            assert_eq!(info.unit, *unit);
            assert_eq!(info.decimal_pos, *pos);
        }
    }

    #[test]
    fn test_unknown_nibble() {
        let info = lookup(0x0A, 0);
        assert_eq!(info.unit, Unit::Unknown);
        assert_eq!(info.mode.to_string(), "Unknown (0x0A)");
        assert_eq!(info.decimal_pos, UNKNOWN_DECIMAL_POS);
    }
}
