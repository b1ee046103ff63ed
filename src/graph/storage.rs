//! Per-edge side storage
//!
//! Sparse attributes looked up by edge id: border crossings, vehicle
//! restrictions, conditional access expressions and hourly speed profiles.
//! Edges without an entry are unrestricted.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::EdgeId;
use crate::error::{Error, Result};

/// Vehicle classes carried as bits in [`VehicleRestriction::forbidden`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Hgv,
    Bicycle,
    Pedestrian,
}

impl VehicleClass {
    pub fn bit(self) -> u8 {
        match self {
            VehicleClass::Car => 1,
            VehicleClass::Hgv => 1 << 1,
            VehicleClass::Bicycle => 1 << 2,
            VehicleClass::Pedestrian => 1 << 3,
        }
    }
}

/// Edge crosses a country border
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderCrossing {
    pub from_country: u16,
    pub to_country: u16,
}

impl BorderCrossing {
    pub fn touches(&self, country: u16) -> bool {
        self.from_country == country || self.to_country == country
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleRestriction {
    /// OR of [`VehicleClass::bit`] values denied on this edge
    #[serde(default)]
    pub forbidden: u8,
    /// Metres
    #[serde(default)]
    pub max_height: Option<f64>,
    /// Tonnes
    #[serde(default)]
    pub max_weight: Option<f64>,
}

impl VehicleRestriction {
    pub fn forbids(&self, class: VehicleClass) -> bool {
        self.forbidden & class.bit() != 0
    }
}

/// Hourly speeds in km/h, either one day (24 values) or one week
/// (168 values, Monday 00:00 first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedProfile(pub Vec<f64>);

impl SpeedProfile {
    pub fn is_valid(&self) -> bool {
        (self.0.len() == 24 || self.0.len() == 168)
            && self.0.iter().all(|s| s.is_finite() && *s >= 0.0)
    }

    /// Speed for the given weekday (0 = Monday) and hour
    pub fn speed(&self, weekday: u32, hour: u32) -> f64 {
        if self.0.len() == 168 {
            self.0[(weekday * 24 + hour) as usize % 168]
        } else {
            self.0[hour as usize % 24]
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SideStorage {
    pub borders: FxHashMap<EdgeId, BorderCrossing>,
    pub vehicle_restrictions: FxHashMap<EdgeId, VehicleRestriction>,
    pub conditional_access: FxHashMap<EdgeId, String>,
    pub speed_profiles: FxHashMap<EdgeId, SpeedProfile>,
}

impl SideStorage {
    pub fn border(&self, edge: EdgeId) -> Option<&BorderCrossing> {
        self.borders.get(&edge)
    }

    pub fn vehicle_restriction(&self, edge: EdgeId) -> Option<&VehicleRestriction> {
        self.vehicle_restrictions.get(&edge)
    }

    pub fn conditional(&self, edge: EdgeId) -> Option<&str> {
        self.conditional_access.get(&edge).map(String::as_str)
    }

    pub fn speed_profile(&self, edge: EdgeId) -> Option<&SpeedProfile> {
        self.speed_profiles.get(&edge)
    }

    pub fn has_speed_profiles(&self) -> bool {
        !self.speed_profiles.is_empty()
    }

    pub(crate) fn validate(&self, n_edges: usize) -> Result<()> {
        let keys = self
            .borders
            .keys()
            .chain(self.vehicle_restrictions.keys())
            .chain(self.conditional_access.keys())
            .chain(self.speed_profiles.keys());
        for &edge in keys {
            if edge as usize >= n_edges {
                return Err(Error::InvalidGraph(format!(
                    "side storage references edge {} but graph has {} edges",
                    edge, n_edges
                )));
            }
        }
        for (edge, profile) in &self.speed_profiles {
            if !profile.is_valid() {
                return Err(Error::InvalidGraph(format!(
                    "speed profile of edge {} must hold 24 or 168 non-negative values",
                    edge
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekly_profile_lookup() {
        let mut speeds = vec![50.0; 168];
        speeds[24 + 8] = 20.0;
        let profile = SpeedProfile(speeds);
        assert!(profile.is_valid());
        assert_eq!(profile.speed(1, 8), 20.0);
        assert_eq!(profile.speed(0, 8), 50.0);
    }

    #[test]
    fn test_rejects_out_of_range_keys() {
        let mut storage = SideStorage::default();
        storage.conditional_access.insert(7, "no @ (Mo-Fr)".into());
        assert!(storage.validate(7).is_err());
        assert!(storage.validate(8).is_ok());
    }

    #[test]
    fn test_vehicle_bits() {
        let r = VehicleRestriction {
            forbidden: VehicleClass::Hgv.bit() | VehicleClass::Bicycle.bit(),
            ..Default::default()
        };
        assert!(r.forbids(VehicleClass::Hgv));
        assert!(!r.forbids(VehicleClass::Car));
    }
}
