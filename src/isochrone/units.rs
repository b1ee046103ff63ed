//! Length and area units for isochrone ranges and attributes

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    #[serde(alias = "metres", alias = "meters")]
    M,
    #[serde(alias = "kilometres", alias = "kilometers")]
    Km,
    #[serde(alias = "miles")]
    Mi,
}

impl Units {
    pub fn from_name(name: &str) -> Option<Units> {
        match name.to_ascii_lowercase().as_str() {
            "m" | "metres" | "meters" => Some(Units::M),
            "km" | "kilometres" | "kilometers" => Some(Units::Km),
            "mi" | "miles" => Some(Units::Mi),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Units::M => "m",
            Units::Km => "km",
            Units::Mi => "mi",
        }
    }

    /// Multiplier from metres
    pub fn length_factor(&self) -> f64 {
        match self {
            Units::M => 1.0,
            Units::Km => 0.001,
            Units::Mi => 0.000621371,
        }
    }

    /// Multiplier from square metres
    pub fn area_factor(&self) -> f64 {
        match self {
            Units::M => 1.0,
            Units::Km => 1e-6,
            Units::Mi => 3.86102e-7,
        }
    }

    pub fn to_metres(&self, value: f64) -> f64 {
        value / self.length_factor()
    }

    pub fn area_from_sq_metres(&self, area: f64) -> f64 {
        area * self.area_factor()
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Round to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_scaling() {
        let sq_m = 2_500_000.0;
        assert!((Units::Km.area_from_sq_metres(sq_m) - 2.5).abs() < 1e-12);
        assert!((Units::Mi.area_from_sq_metres(sq_m) - 0.965255).abs() < 1e-6);
        assert_eq!(Units::M.area_from_sq_metres(sq_m), sq_m);
    }

    #[test]
    fn test_range_conversion() {
        assert!((Units::Km.to_metres(1.5) - 1500.0).abs() < 1e-9);
        assert!((Units::Mi.to_metres(1.0) - 1609.34).abs() < 0.01);
    }

    #[test]
    fn test_names() {
        assert_eq!(Units::from_name("KM"), Some(Units::Km));
        assert_eq!(Units::from_name("miles"), Some(Units::Mi));
        assert_eq!(Units::from_name("yards"), None);
        assert_eq!(round_to(1.23456, 4), 1.2346);
    }
}
