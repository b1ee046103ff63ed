//! Engine configuration
//!
//! Every section defaults, so a config file only lists what it changes:
//!
//! ```json
//! { "routing": { "snap_radius": 500.0 }, "landmarks": { "count": 8 } }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::RestrictionSet;
use crate::weighting::Profile;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub preparation: PreparationConfig,
    pub landmarks: LandmarkConfig,
    pub routing: RoutingConfig,
    pub isochrones: IsochroneConfig,
    pub matrix: MatrixConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: EngineConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.preparation;
        for (name, value) in [
            ("periodic_updates", p.periodic_updates),
            ("lazy_updates", p.lazy_updates),
            ("neighbour_updates", p.neighbour_updates),
        ] {
            if value > 100 {
                return Err(Error::InvalidRequest(format!(
                    "preparation.{} must be a percentage, got {}",
                    name, value
                )));
            }
        }
        if self.landmarks.sets.is_empty() && self.landmarks.count > 0 {
            return Err(Error::InvalidRequest(
                "landmarks.sets must list at least one restriction set".into(),
            ));
        }
        if !(self.isochrones.concavity > 0.0) {
            return Err(Error::InvalidRequest(format!(
                "isochrones.concavity must be positive, got {}",
                self.isochrones.concavity
            )));
        }
        self.routing.timezone()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreparationConfig {
    /// Recompute all priorities every `periodic_updates`% of the nodes
    pub periodic_updates: u32,
    /// Lazily re-check the popped node once fewer than `lazy_updates`% remain
    pub lazy_updates: u32,
    /// Share of a contracted node's neighbours whose priority is refreshed
    pub neighbour_updates: u32,
    /// Settled nodes after which a witness search gives up
    pub witness_settled_limit: usize,
    /// Seed for the neighbour update sampling
    pub seed: u64,
    /// Restrictions kept exact by the core
    pub coverage: RestrictionSet,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            periodic_updates: 20,
            lazy_updates: 10,
            neighbour_updates: 20,
            witness_settled_limit: 500,
            seed: 123,
            coverage: RestrictionSet::everything(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// Landmarks per set, 0 disables ALT
    pub count: usize,
    /// One landmark table is computed per restriction set
    pub sets: Vec<RestrictionSet>,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            count: 16,
            sets: vec![RestrictionSet::none()],
        }
    }
}

/// What to do when a request restricts edges the core does not cover
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Answer with a plain search over the original edges
    #[default]
    Fallback,
    /// Reject with `Error::RestrictionSetMismatch`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub max_visited_nodes: usize,
    pub mismatch_policy: MismatchPolicy,
    /// Metres
    pub snap_radius: f64,
    /// Fixed UTC offset used to evaluate conditional restrictions
    pub timezone_offset_minutes: i32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_visited_nodes: 1_000_000,
            mismatch_policy: MismatchPolicy::Fallback,
            snap_radius: 350.0,
            timezone_offset_minutes: 0,
        }
    }
}

impl RoutingConfig {
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).ok_or_else(|| {
            Error::InvalidRequest(format!(
                "timezone offset {} minutes is out of range",
                self.timezone_offset_minutes
            ))
        })
    }
}

/// Mean speeds (km/h) used for the reach factor of time isochrones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanSpeeds {
    pub car: f64,
    pub hgv: f64,
    pub bike: f64,
    pub foot: f64,
}

impl Default for MeanSpeeds {
    fn default() -> Self {
        Self {
            car: 56.0,
            hgv: 48.0,
            bike: 16.0,
            foot: 4.8,
        }
    }
}

impl MeanSpeeds {
    pub fn get(&self, profile: Profile) -> f64 {
        match profile {
            Profile::Car => self.car,
            Profile::Hgv => self.hgv,
            Profile::Bike => self.bike,
            Profile::Foot => self.foot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsochroneConfig {
    pub max_locations: usize,
    /// Seconds
    pub max_range_time: f64,
    /// Metres
    pub max_range_distance: f64,
    pub max_intervals: usize,
    pub concavity: f64,
    pub mean_speeds: MeanSpeeds,
}

impl Default for IsochroneConfig {
    fn default() -> Self {
        Self {
            max_locations: 5,
            max_range_time: 3600.0,
            max_range_distance: 120_000.0,
            max_intervals: 10,
            concavity: 2.0,
            mean_speeds: MeanSpeeds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixAlgorithm {
    /// Core search when the chain is covered, Dijkstra otherwise
    #[default]
    Auto,
    Core,
    Dijkstra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Maximum sources x destinations
    pub max_routes: usize,
    pub algorithm: MatrixAlgorithm,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            max_routes: 2500,
            algorithm: MatrixAlgorithm::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "routing": {{ "snap_radius": 500.0, "mismatch_policy": "reject" }},
                "landmarks": {{ "count": 4 }} }}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.routing.snap_radius, 500.0);
        assert_eq!(config.routing.mismatch_policy, MismatchPolicy::Reject);
        assert_eq!(config.routing.max_visited_nodes, 1_000_000);
        assert_eq!(config.landmarks.count, 4);
        assert_eq!(config.landmarks.sets, vec![RestrictionSet::none()]);
        assert_eq!(config.preparation.coverage, RestrictionSet::everything());
    }

    #[test]
    fn test_rejects_bad_percentages_and_offsets() {
        let mut config = EngineConfig::default();
        config.preparation.lazy_updates = 150;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.routing.timezone_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }
}
