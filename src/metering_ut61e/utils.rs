use super::structs::Unit;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1), 0.0 for fewer than two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let m = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Most frequent item. On a tie the item seen first wins.
pub fn most_common<T: PartialEq + Clone>(items: &[T]) -> Option<T> {
    let mut counts: Vec<(&T, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some(entry) => entry.1 += 1,
            None => counts.push((item, 1)),
        }
    }

    let mut best: Option<(&T, usize)> = None;
    for (item, count) in counts {
        match best {
            Some((_, c)) if c >= count => {}
            _ => best = Some((item, count)),
        }
    }

    best.map(|(item, _)| item.clone())
}

/// Largest deviation of any value from the window mean, relative to the mean.
/// A zero mean makes the deviation absolute.
pub fn max_relative_deviation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;

    let deviation = if m == 0.0 {
        values.iter().map(|v| v.abs()).fold(0.0, f64::max)
    } else {
        values.iter().map(|v| (v - m).abs() / m.abs()).fold(0.0, f64::max)
    };

    Some(deviation)
}

/// Scales a resistance reading to Ohm. Units other than the resistance
/// tags are passed through unchanged.
pub fn to_ohms(value: f64, unit: Unit) -> f64 {
    value * unit.ohm_factor().unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
        assert_eq!(sample_std_dev(&[5.0]), 0.0);
        assert!((sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_most_common_prefers_first_on_tie() {
        assert_eq!(most_common::<u8>(&[]), None);
        assert_eq!(most_common(&["a", "b", "b", "a"]), Some("a"));
        assert_eq!(most_common(&["a", "b", "b"]), Some("b"));
        assert_eq!(most_common(&[Unit::KiloOhm, Unit::Ohm]), Some(Unit::KiloOhm));
    }

    #[test]
    fn test_relative_deviation() {
        assert_eq!(max_relative_deviation(&[]), None);
        assert_eq!(max_relative_deviation(&[10.0, 10.0, 10.0]), Some(0.0));
        let d = max_relative_deviation(&[9.0, 10.0, 11.0]).unwrap();
        assert!((d - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_mean_uses_absolute_deviation() {
        let d = max_relative_deviation(&[-0.01, 0.0, 0.01]).unwrap();
        assert!((d - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_to_ohms() {
        assert_eq!(to_ohms(18.2, Unit::KiloOhm), 18200.0);
        assert_eq!(to_ohms(2.5, Unit::MegaOhm), 2_500_000.0);
        assert_eq!(to_ohms(5.5, Unit::Ohm), 5.5);
        assert_eq!(to_ohms(1.0, Unit::Volt), 1.0);
    }
}
