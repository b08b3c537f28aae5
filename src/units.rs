//! Length units used at the axis boundary.
//!
//! The canonical unit is the micrometre. Conversion factors are exact
//! (1 mm = 1000 µm), so the only loss is floating-point representation.

use std::fmt;
use std::str::FromStr;

const MICROMETRES_PER_MILLIMETRE: f64 = 1000.0;

/// Unit attached to a position, distance or limit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Units {
    /// Micrometres (canonical)
    #[default]
    Micrometres,
    /// Millimetres
    Millimetres,
}

impl Units {
    /// Convert `value` expressed in `self` to micrometres.
    pub fn to_micrometres(self, value: f64) -> f64 {
        match self {
            Units::Micrometres => value,
            Units::Millimetres => value * MICROMETRES_PER_MILLIMETRE,
        }
    }

    /// Convert `micrometres` to a value expressed in `self`.
    #[allow(clippy::wrong_self_convention)]
    pub fn from_micrometres(self, micrometres: f64) -> f64 {
        match self {
            Units::Micrometres => micrometres,
            Units::Millimetres => micrometres / MICROMETRES_PER_MILLIMETRE,
        }
    }

    /// Short symbol for display.
    pub fn symbol(self) -> &'static str {
        match self {
            Units::Micrometres => "µm",
            Units::Millimetres => "mm",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "um" | "µm" | "micrometre" | "micrometres" | "micrometer" | "micrometers" => {
                Ok(Units::Micrometres)
            }
            "mm" | "millimetre" | "millimetres" | "millimeter" | "millimeters" => {
                Ok(Units::Millimetres)
            }
            other => Err(format!("Unknown length unit '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millimetre_conversion() {
        assert_eq!(Units::Millimetres.to_micrometres(1.0), 1000.0);
        assert_eq!(Units::Millimetres.from_micrometres(2500.0), 2.5);
        assert_eq!(Units::Micrometres.to_micrometres(42.0), 42.0);
    }

    #[test]
    fn test_round_trip_through_millimetres() {
        for value in [0.0, 1.0, 999.999, 50000.0] {
            let um = Units::Micrometres.to_micrometres(value);
            let mm = Units::Millimetres.from_micrometres(um);
            let back = Units::Millimetres.to_micrometres(mm);
            assert!(
                (back - value).abs() <= f64::EPSILON * value.abs().max(1.0),
                "{} -> {} -> {}",
                value,
                mm,
                back
            );
        }
    }

    #[test]
    fn test_parse_units() {
        assert_eq!("mm".parse::<Units>().unwrap(), Units::Millimetres);
        assert_eq!("µm".parse::<Units>().unwrap(), Units::Micrometres);
        assert_eq!("UM".parse::<Units>().unwrap(), Units::Micrometres);
        assert!("inch".parse::<Units>().is_err());
    }
}
