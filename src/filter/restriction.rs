//! Structured summary of what a filter chain restricts
//!
//! Preparation keeps every edge a coverage set could restrict inside the core,
//! so a query whose restrictions are a subset of the coverage can use the
//! shortcuts unchanged. Landmark tables computed under a set `L` remain lower
//! bounds for any query restricting at least `L`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::graph::{features, EdgeId, RoadGraph};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionSet {
    /// Feature bits that may be avoided
    pub avoid_features: u32,
    /// Countries whose borders may be avoided
    pub avoid_countries: BTreeSet<u16>,
    /// Any border crossing may be avoided
    pub avoid_all_borders: bool,
    /// Edges carrying a vehicle restriction
    pub vehicle_access: bool,
    /// Edges carrying a conditional access expression
    pub conditional_access: bool,
    /// Edges carrying a time-dependent speed profile
    pub time_dependent: bool,
}

impl RestrictionSet {
    /// Restricts nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Restricts everything the filters can express
    pub fn everything() -> Self {
        Self {
            avoid_features: features::ALL,
            avoid_countries: BTreeSet::new(),
            avoid_all_borders: true,
            vehicle_access: true,
            conditional_access: true,
            time_dependent: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    /// Every edge `self` can restrict is also restricted by `other`
    pub fn is_subset_of(&self, other: &RestrictionSet) -> bool {
        let features = self.avoid_features & !other.avoid_features == 0;
        let borders = (!self.avoid_all_borders || other.avoid_all_borders)
            && (other.avoid_all_borders || self.avoid_countries.is_subset(&other.avoid_countries));
        features
            && borders
            && (!self.vehicle_access || other.vehicle_access)
            && (!self.conditional_access || other.conditional_access)
            && (!self.time_dependent || other.time_dependent)
    }

    pub fn union(&self, other: &RestrictionSet) -> RestrictionSet {
        let avoid_all_borders = self.avoid_all_borders || other.avoid_all_borders;
        RestrictionSet {
            avoid_features: self.avoid_features | other.avoid_features,
            avoid_countries: if avoid_all_borders {
                BTreeSet::new()
            } else {
                self.avoid_countries.union(&other.avoid_countries).copied().collect()
            },
            avoid_all_borders,
            vehicle_access: self.vehicle_access || other.vehicle_access,
            conditional_access: self.conditional_access || other.conditional_access,
            time_dependent: self.time_dependent || other.time_dependent,
        }
    }

    /// Whether some query within this set could treat the edge differently
    /// from an unrestricted one. Shortcuts are never restricted.
    pub fn restricts_edge(&self, graph: &RoadGraph, id: EdgeId) -> bool {
        let edge = graph.edge(id);
        if edge.is_shortcut() {
            return false;
        }
        let storage = graph.storage();

        if edge.features & self.avoid_features != 0 {
            return true;
        }
        if let Some(border) = storage.border(id) {
            if self.avoid_all_borders
                || self.avoid_countries.iter().any(|&c| border.touches(c))
            {
                return true;
            }
        }
        (self.vehicle_access && storage.vehicle_restriction(id).is_some())
            || (self.conditional_access && storage.conditional(id).is_some())
            || (self.time_dependent && storage.speed_profile(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries(ids: &[u16]) -> BTreeSet<u16> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_everything_covers_any_set() {
        let query = RestrictionSet {
            avoid_features: features::FERRIES | features::TOLLWAYS,
            avoid_countries: countries(&[56, 276]),
            vehicle_access: true,
            ..Default::default()
        };
        assert!(query.is_subset_of(&RestrictionSet::everything()));
        assert!(!RestrictionSet::everything().is_subset_of(&query));
        assert!(RestrictionSet::none().is_subset_of(&query));
    }

    #[test]
    fn test_country_subsets() {
        let a = RestrictionSet {
            avoid_countries: countries(&[56]),
            ..Default::default()
        };
        let b = RestrictionSet {
            avoid_countries: countries(&[56, 250]),
            ..Default::default()
        };
        let all = RestrictionSet {
            avoid_all_borders: true,
            ..Default::default()
        };
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(b.is_subset_of(&all));
        assert!(!all.is_subset_of(&b));
    }

    #[test]
    fn test_union_absorbs_countries_into_all_borders() {
        let a = RestrictionSet {
            avoid_countries: countries(&[56]),
            ..Default::default()
        };
        let all = RestrictionSet {
            avoid_all_borders: true,
            conditional_access: true,
            ..Default::default()
        };
        let u = a.union(&all);
        assert!(u.avoid_all_borders);
        assert!(u.avoid_countries.is_empty());
        assert!(a.is_subset_of(&u) && all.is_subset_of(&u));
    }
}
