//! Unit conversion.
//!
//! Linear units convert through a base unit per dimension (metres, kilograms,
//! litres, seconds, metres per second). Temperature is affine and converts
//! through kelvin.

use abacus_core::CalcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Length,
    Mass,
    Volume,
    Time,
    Speed,
    Temperature,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Length => "length",
            Dimension::Mass => "mass",
            Dimension::Volume => "volume",
            Dimension::Time => "time",
            Dimension::Speed => "speed",
            Dimension::Temperature => "temperature",
        }
    }
}

struct UnitDef {
    names: &'static [&'static str],
    dimension: Dimension,
    /// Multiplier into the dimension's base unit. Unused for temperature.
    factor: f64,
}

const fn unit(names: &'static [&'static str], dimension: Dimension, factor: f64) -> UnitDef {
    UnitDef { names, dimension, factor }
}

use Dimension::*;

const UNITS: &[UnitDef] = &[
    unit(&["mm", "millimeter", "millimeters", "millimetre", "millimetres"], Length, 0.001),
    unit(&["cm", "centimeter", "centimeters", "centimetre", "centimetres"], Length, 0.01),
    unit(&["m", "meter", "meters", "metre", "metres"], Length, 1.0),
    unit(&["km", "kilometer", "kilometers", "kilometre", "kilometres"], Length, 1000.0),
    unit(&["in", "inch", "inches"], Length, 0.0254),
    unit(&["ft", "foot", "feet"], Length, 0.3048),
    unit(&["yd", "yard", "yards"], Length, 0.9144),
    unit(&["mi", "mile", "miles"], Length, 1609.344),
    unit(&["mg", "milligram", "milligrams"], Mass, 1e-6),
    unit(&["g", "gram", "grams"], Mass, 0.001),
    unit(&["kg", "kilogram", "kilograms", "kilo", "kilos"], Mass, 1.0),
    unit(&["oz", "ounce", "ounces"], Mass, 0.028_349_523_125),
    unit(&["lb", "lbs", "lbm", "pound", "pounds"], Mass, 0.453_592_37),
    unit(&["ton", "tons"], Mass, 907.184_74),
    unit(&["tonne", "tonnes"], Mass, 1000.0),
    unit(&["ml", "milliliter", "milliliters", "millilitre", "millilitres"], Volume, 0.001),
    unit(&["l", "liter", "liters", "litre", "litres"], Volume, 1.0),
    unit(&["cup", "cups"], Volume, 0.236_588_236_5),
    unit(&["qt", "quart", "quarts"], Volume, 0.946_352_946),
    unit(&["gal", "gallon", "gallons"], Volume, 3.785_411_784),
    unit(&["s", "sec", "secs", "second", "seconds"], Time, 1.0),
    unit(&["min", "mins", "minute", "minutes"], Time, 60.0),
    unit(&["h", "hr", "hrs", "hour", "hours"], Time, 3600.0),
    unit(&["day", "days"], Time, 86_400.0),
    unit(&["week", "weeks"], Time, 604_800.0),
    unit(&["year", "years"], Time, 31_557_600.0),
    unit(&["m/s", "mps"], Speed, 1.0),
    unit(&["kph", "kmh", "km/h"], Speed, 1000.0 / 3600.0),
    unit(&["mph"], Speed, 1609.344 / 3600.0),
    unit(&["c", "celsius"], Temperature, 0.0),
    unit(&["f", "fahrenheit"], Temperature, 0.0),
    unit(&["k", "kelvin"], Temperature, 0.0),
];

fn lookup(name: &str) -> Option<&'static UnitDef> {
    let key = name.trim().trim_start_matches('°').to_ascii_lowercase();
    UNITS.iter().find(|u| u.names.contains(&key.as_str()))
}

pub fn is_known_unit(name: &str) -> bool {
    lookup(name).is_some()
}

fn to_kelvin(value: f64, unit: &str) -> f64 {
    match unit {
        "c" => value + 273.15,
        "f" => (value - 32.0) * 5.0 / 9.0 + 273.15,
        _ => value,
    }
}

fn from_kelvin(kelvin: f64, unit: &str) -> f64 {
    match unit {
        "c" => kelvin - 273.15,
        "f" => (kelvin - 273.15) * 9.0 / 5.0 + 32.0,
        _ => kelvin,
    }
}

/// Convert `value` between two units of the same dimension. Unit names are
/// case-insensitive.
pub fn convert(value: f64, from: &str, to: &str) -> Result<f64, CalcError> {
    let src = lookup(from).ok_or_else(|| CalcError::evaluation(format!("unknown unit: {}", from)))?;
    let dst = lookup(to).ok_or_else(|| CalcError::evaluation(format!("unknown unit: {}", to)))?;

    if src.dimension != dst.dimension {
        return Err(CalcError::domain(format!(
            "cannot convert {} ({}) to {} ({})",
            from,
            src.dimension.as_str(),
            to,
            dst.dimension.as_str()
        )));
    }

    if src.dimension == Temperature {
        let kelvin = to_kelvin(value, src.names[0]);
        if kelvin < 0.0 {
            return Err(CalcError::domain("temperature below absolute zero"));
        }
        return Ok(from_kelvin(kelvin, dst.names[0]));
    }

    Ok(value * src.factor / dst.factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_core::ErrorKind;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_length_and_mass() {
        assert!(close(convert(10.0, "km", "miles").unwrap(), 6.213_711_922));
        assert!(close(convert(1.0, "ft", "in").unwrap(), 12.0));
        assert!(close(convert(1.0, "KG", "lb").unwrap(), 2.204_622_621_8));
        assert!(close(convert(16.0, "oz", "lbm").unwrap(), 1.0));
    }

    #[test]
    fn test_volume_time_speed() {
        assert!(close(convert(1.0, "gallon", "quarts").unwrap(), 4.0));
        assert!(close(convert(2.0, "hours", "minutes").unwrap(), 120.0));
        assert!(close(convert(60.0, "mph", "kph").unwrap(), 96.560_64));
    }

    #[test]
    fn test_temperature() {
        assert!(close(convert(100.0, "°C", "f").unwrap(), 212.0));
        assert!(close(convert(32.0, "fahrenheit", "celsius").unwrap(), 0.0));
        assert!(close(convert(0.0, "k", "c").unwrap(), -273.15));
        let err = convert(-300.0, "c", "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainError);
    }

    #[test]
    fn test_incompatible_and_unknown() {
        assert_eq!(convert(1.0, "km", "kg").unwrap_err().kind(), ErrorKind::DomainError);
        assert_eq!(convert(1.0, "parsec", "km").unwrap_err().kind(), ErrorKind::EvaluationError);
        assert!(is_known_unit("Miles"));
        assert!(!is_known_unit("furlong"));
    }
}
