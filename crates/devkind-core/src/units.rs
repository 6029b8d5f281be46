//! Unit conversion for measure values.
//!
//! Measures are stored in the base unit of their dimension (C, m, ms, kg,
//! byte, mps, W, Pa, kcal, m2, m3, lx, dB). Converting to a display unit is
//! either linear (a coefficient) or affine (temperatures).

enum Transform {
    /// `base = value * coeff`
    Linear(f64),
    Fahrenheit,
    Kelvin,
}

fn lookup(unit: &str) -> Option<(&'static str, Transform)> {
    use Transform::*;
    let entry = match unit {
        // temperature
        "C" => ("C", Linear(1.0)),
        "F" => ("C", Fahrenheit),
        "K" => ("C", Kelvin),
        // length
        "m" => ("m", Linear(1.0)),
        "mm" => ("m", Linear(0.001)),
        "cm" => ("m", Linear(0.01)),
        "km" => ("m", Linear(1000.0)),
        "in" => ("m", Linear(0.0254)),
        "ft" => ("m", Linear(0.3048)),
        "mi" => ("m", Linear(1609.344)),
        // time
        "ms" => ("ms", Linear(1.0)),
        "s" => ("ms", Linear(1000.0)),
        "min" => ("ms", Linear(60_000.0)),
        "h" => ("ms", Linear(3_600_000.0)),
        "day" => ("ms", Linear(86_400_000.0)),
        "week" => ("ms", Linear(604_800_000.0)),
        "mon" => ("ms", Linear(2_592_000_000.0)),
        "year" => ("ms", Linear(31_536_000_000.0)),
        // mass
        "kg" => ("kg", Linear(1.0)),
        "g" => ("kg", Linear(0.001)),
        "lb" => ("kg", Linear(0.453_592_37)),
        "oz" => ("kg", Linear(0.028_349_523_125)),
        // data
        "byte" => ("byte", Linear(1.0)),
        "KB" => ("byte", Linear(1000.0)),
        "MB" => ("byte", Linear(1_000_000.0)),
        "GB" => ("byte", Linear(1_000_000_000.0)),
        "TB" => ("byte", Linear(1_000_000_000_000.0)),
        // speed
        "mps" => ("mps", Linear(1.0)),
        "kmph" => ("mps", Linear(0.277_777_777_777_777_8)),
        "mph" => ("mps", Linear(0.447_04)),
        // power
        "W" => ("W", Linear(1.0)),
        "kW" => ("W", Linear(1000.0)),
        // pressure
        "Pa" => ("Pa", Linear(1.0)),
        "bar" => ("Pa", Linear(100_000.0)),
        "psi" => ("Pa", Linear(6894.757_293_168)),
        "mmHg" => ("Pa", Linear(133.322_387_415)),
        "inHg" => ("Pa", Linear(3386.388_666_6)),
        "atm" => ("Pa", Linear(101_325.0)),
        // energy
        "kcal" => ("kcal", Linear(1.0)),
        "kJ" => ("kcal", Linear(0.239_006)),
        // area and volume
        "m2" => ("m2", Linear(1.0)),
        "km2" => ("m2", Linear(1_000_000.0)),
        "ft2" => ("m2", Linear(0.092_903_04)),
        "m3" => ("m3", Linear(1.0)),
        "l" => ("m3", Linear(0.001)),
        "gal" => ("m3", Linear(0.003_785_41)),
        // misc
        "lx" => ("lx", Linear(1.0)),
        "dB" => ("dB", Linear(1.0)),
        _ => return None,
    };
    Some(entry)
}

/// Base unit of the dimension `unit` belongs to.
pub fn base_unit(unit: &str) -> Option<&'static str> {
    lookup(unit).map(|(base, _)| base)
}

/// Convert `value` expressed in `unit` into its base unit.
pub fn to_base_unit(value: f64, unit: &str) -> Option<f64> {
    let (_, transform) = lookup(unit)?;
    Some(match transform {
        Transform::Linear(coeff) => value * coeff,
        Transform::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        Transform::Kelvin => value - 273.15,
    })
}

/// Convert `value` expressed in the base unit into `unit`.
pub fn from_base_unit(value: f64, unit: &str) -> Option<f64> {
    let (_, transform) = lookup(unit)?;
    Some(match transform {
        Transform::Linear(coeff) => value / coeff,
        Transform::Fahrenheit => value * 9.0 / 5.0 + 32.0,
        Transform::Kelvin => value + 273.15,
    })
}
