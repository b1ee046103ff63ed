//! Isochrone polygons
//!
//! One accessibility map is computed per origin and range. The reachable node
//! locations and the frontier cut points are wrapped in a concave hull, which
//! is smoothed and annotated with area, reach factor and any externally
//! supplied attributes. Overlaps between the isochrones of different origins
//! can be reported as extra intersection features.

use geo::{BooleanOps, GeodesicArea, MultiPolygon, Polygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::IsochroneConfig;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::graph::{Coordinate, NodeId, RoadGraph, Weight};
use crate::range::RangeSearch;
use crate::weighting::{Departure, FastestWeighting, Profile, ShortestWeighting, Weighting};

pub mod concave_hull;
pub mod geojson;
pub mod units;

pub use concave_hull::{HullStats, Shape};
pub use units::Units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeType {
    /// Seconds
    #[default]
    Time,
    /// Length in the request's units
    Distance,
}

/// Supplies extra per-polygon statistics such as population counts
pub trait AttributeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn attributes(&self, polygon: &Polygon<f64>) -> Vec<(String, f64)>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsochroneParams {
    pub range_type: RangeType,
    pub ranges: Vec<f64>,
    /// Split the single range into steps of this size
    pub interval: Option<f64>,
    pub units: Units,
    /// Overrides `units` for areas
    pub area_units: Option<Units>,
    pub area: bool,
    pub reachfactor: bool,
    /// 0..=100, negative for the default
    pub smoothing: f64,
    pub intersections: bool,
    /// Measure travel towards the locations instead of away from them
    pub reverse: bool,
}

impl Default for IsochroneParams {
    fn default() -> Self {
        Self {
            range_type: RangeType::Time,
            ranges: Vec::new(),
            interval: None,
            units: Units::M,
            area_units: None,
            area: false,
            reachfactor: false,
            smoothing: -1.0,
            intersections: false,
            reverse: false,
        }
    }
}

impl IsochroneParams {
    pub fn time(ranges: Vec<f64>) -> Self {
        Self {
            ranges,
            ..Default::default()
        }
    }

    pub fn distance(ranges: Vec<f64>, units: Units) -> Self {
        Self {
            range_type: RangeType::Distance,
            ranges,
            units,
            ..Default::default()
        }
    }

    pub fn area_unit(&self) -> Units {
        self.area_units.unwrap_or(self.units)
    }

    /// Ranges in ascending order, intervals expanded
    pub fn resolved_ranges(&self) -> Result<Vec<f64>> {
        if self.ranges.is_empty() {
            return Err(Error::InvalidRequest("no range given".into()));
        }
        if let Some(&bad) = self.ranges.iter().find(|r| !r.is_finite() || **r <= 0.0) {
            return Err(Error::InvalidRequest(format!("range {} must be positive", bad)));
        }

        let mut ranges = match self.interval {
            Some(step) => {
                if self.ranges.len() != 1 {
                    return Err(Error::InvalidRequest(
                        "an interval needs exactly one range".into(),
                    ));
                }
                if !step.is_finite() || step <= 0.0 {
                    return Err(Error::InvalidRequest(format!(
                        "interval {} must be positive",
                        step
                    )));
                }
                let max = self.ranges[0];
                let mut expanded = Vec::new();
                let mut value = step;
                while value < max {
                    expanded.push(value);
                    value += step;
                }
                expanded.push(max);
                expanded
            }
            None => self.ranges.clone(),
        };
        ranges.sort_by(f64::total_cmp);
        ranges.dedup();
        Ok(ranges)
    }

    /// Range in metres (distance) or seconds (time)
    fn base_value(&self, range: f64) -> f64 {
        match self.range_type {
            RangeType::Time => range,
            RangeType::Distance => self.units.to_metres(range),
        }
    }
}

/// Search starting point: the requested location and its snapped node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub center: Coordinate,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Isochrone {
    pub shape: Shape,
    /// Range as requested
    pub value: f64,
    /// Radius of a circle with the mean reach, metres
    pub mean_radius: f64,
    pub area: Option<f64>,
    pub reachfactor: Option<f64>,
    pub attributes: Vec<(String, f64)>,
    pub stats: HullStats,
}

impl Isochrone {
    pub fn polygon(&self) -> Option<&Polygon<f64>> {
        self.shape.polygon()
    }

    /// Geodesic area in square metres
    pub fn area_sq_metres(&self) -> f64 {
        self.polygon().map(|p| p.geodesic_area_unsigned()).unwrap_or(0.0)
    }

    /// Area over the area of a circle with the mean radius, at most 1
    pub fn reach_factor(&self) -> f64 {
        if self.mean_radius <= 0.0 {
            return 0.0;
        }
        let circle = std::f64::consts::PI * self.mean_radius * self.mean_radius;
        units::round_to((self.area_sq_metres() / circle).min(1.0), 4)
    }
}

/// Isochrones of one origin, ascending by range
#[derive(Debug, Clone)]
pub struct IsochroneMap {
    pub index: usize,
    pub center: Coordinate,
    pub isochrones: Vec<Isochrone>,
}

/// Overlap of isochrones from different origins
#[derive(Debug, Clone)]
pub struct IsochroneIntersection {
    pub geometry: MultiPolygon<f64>,
    /// `(origin index, isochrone index)` of every overlapping isochrone
    pub contours: Vec<(usize, usize)>,
    pub area: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IsochroneCollection {
    pub maps: Vec<IsochroneMap>,
    pub intersections: Vec<IsochroneIntersection>,
}

impl IsochroneCollection {
    /// Number of features the collection renders to
    pub fn feature_count(&self) -> usize {
        self.maps.iter().map(|m| m.isochrones.len()).sum::<usize>() + self.intersections.len()
    }

    pub fn to_geojson(&self) -> serde_json::Value {
        geojson::feature_collection(self)
    }
}

pub struct IsochroneBuilder<'a> {
    graph: &'a RoadGraph,
    filter: &'a FilterChain,
    profile: Profile,
    config: &'a IsochroneConfig,
    departure: Option<Departure<'a>>,
    max_visited: usize,
    providers: Vec<&'a dyn AttributeProvider>,
}

impl<'a> IsochroneBuilder<'a> {
    pub fn new(
        graph: &'a RoadGraph,
        filter: &'a FilterChain,
        profile: Profile,
        config: &'a IsochroneConfig,
    ) -> Self {
        Self {
            graph,
            filter,
            profile,
            config,
            departure: None,
            max_visited: usize::MAX,
            providers: Vec::new(),
        }
    }

    pub fn departure(mut self, departure: Option<Departure<'a>>) -> Self {
        self.departure = departure;
        self
    }

    pub fn max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited;
        self
    }

    pub fn attribute_provider(mut self, provider: &'a dyn AttributeProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Check request size against the configured limits
    pub fn validate(&self, origins: usize, params: &IsochroneParams) -> Result<Vec<f64>> {
        if origins == 0 {
            return Err(Error::InvalidRequest("no locations given".into()));
        }
        if origins > self.config.max_locations {
            return Err(Error::InvalidRequest(format!(
                "{} locations exceed the maximum of {}",
                origins, self.config.max_locations
            )));
        }
        let ranges = params.resolved_ranges()?;
        if ranges.len() > self.config.max_intervals {
            return Err(Error::InvalidRequest(format!(
                "{} ranges exceed the maximum of {}",
                ranges.len(),
                self.config.max_intervals
            )));
        }

        let (largest, limit) = match params.range_type {
            RangeType::Time => (ranges[ranges.len() - 1], self.config.max_range_time),
            RangeType::Distance => (
                params.base_value(ranges[ranges.len() - 1]),
                self.config.max_range_distance,
            ),
        };
        if largest > limit {
            return Err(Error::InvalidRequest(format!(
                "range {} exceeds the maximum of {}",
                largest, limit
            )));
        }
        Ok(ranges)
    }

    pub fn build(&self, origins: &[Origin], params: &IsochroneParams) -> Result<IsochroneCollection> {
        let ranges = self.validate(origins.len(), params)?;
        let weighting: Box<dyn Weighting> = match params.range_type {
            RangeType::Time => Box::new(FastestWeighting::new(self.profile)),
            RangeType::Distance => Box::new(ShortestWeighting::new(self.profile)),
        };
        let weighting = weighting.as_ref();

        let largest_radius = self.mean_radius(params, ranges[ranges.len() - 1]);
        let smoothing = concave_hull::smoothing_distance(params.smoothing, largest_radius);

        let maps: Vec<IsochroneMap> = origins
            .par_iter()
            .enumerate()
            .map(|(index, origin)| IsochroneMap {
                index,
                center: origin.center,
                isochrones: ranges
                    .iter()
                    .map(|&range| self.isochrone(weighting, origin, params, range, smoothing))
                    .collect(),
            })
            .collect();

        let intersections = if params.intersections {
            compute_intersections(&maps, params.area.then(|| params.area_unit()))
        } else {
            Vec::new()
        };

        tracing::debug!(
            origins = origins.len(),
            ranges = ranges.len(),
            intersections = intersections.len(),
            "isochrones built"
        );
        Ok(IsochroneCollection {
            maps,
            intersections,
        })
    }

    fn mean_radius(&self, params: &IsochroneParams, range: f64) -> f64 {
        match params.range_type {
            RangeType::Time => self.config.mean_speeds.get(self.profile) / 3.6 * range,
            RangeType::Distance => params.base_value(range),
        }
    }

    fn max_weight(params: &IsochroneParams, range: f64) -> Weight {
        let ds = (params.base_value(range) * 10.0).round();
        if ds >= Weight::MAX as f64 {
            Weight::MAX - 1
        } else {
            ds as Weight
        }
    }

    fn isochrone(
        &self,
        weighting: &dyn Weighting,
        origin: &Origin,
        params: &IsochroneParams,
        range: f64,
        smoothing: f64,
    ) -> Isochrone {
        let map = RangeSearch::new(self.graph, weighting, self.filter)
            .departure(self.departure)
            .max_visited(self.max_visited)
            .query(origin.node, Self::max_weight(params, range), params.reverse);

        let mut points: Vec<Coordinate> = map
            .nodes()
            .into_iter()
            .map(|n| self.graph.coordinate(n))
            .collect();
        points.extend(map.frontier().iter().map(|f| f.cut_point(self.graph)));

        let (shape, stats) = concave_hull::build_shape(&points, self.config.concavity, smoothing);
        let mut isochrone = Isochrone {
            shape,
            value: range,
            mean_radius: self.mean_radius(params, range),
            area: None,
            reachfactor: None,
            attributes: Vec::new(),
            stats,
        };

        if params.area {
            let area = params.area_unit().area_from_sq_metres(isochrone.area_sq_metres());
            isochrone.area = Some(units::round_to(area, 4));
        }
        if params.reachfactor {
            isochrone.reachfactor = Some(isochrone.reach_factor());
        }
        if let Some(polygon) = isochrone.polygon() {
            let attributes: Vec<(String, f64)> = self
                .providers
                .iter()
                .flat_map(|p| p.attributes(polygon))
                .map(|(name, value)| (name, units::round_to(value, 4)))
                .collect();
            isochrone.attributes = attributes;
        }
        isochrone
    }
}

/// Pairwise overlaps between isochrones of different origins
pub fn compute_intersections(
    maps: &[IsochroneMap],
    area_units: Option<Units>,
) -> Vec<IsochroneIntersection> {
    let mut intersections = Vec::new();
    for (i, a) in maps.iter().enumerate() {
        for b in &maps[i + 1..] {
            for (ia, iso_a) in a.isochrones.iter().enumerate() {
                let Some(pa) = iso_a.polygon() else {
                    continue;
                };
                for (ib, iso_b) in b.isochrones.iter().enumerate() {
                    let Some(pb) = iso_b.polygon() else {
                        continue;
                    };
                    let geometry = pa.intersection(pb);
                    if geometry.0.is_empty() {
                        continue;
                    }
                    let area = area_units.map(|u| {
                        units::round_to(u.area_from_sq_metres(geometry.geodesic_area_unsigned()), 4)
                    });
                    intersections.push(IsochroneIntersection {
                        geometry,
                        contours: vec![(a.index, ia), (b.index, ib)],
                        area,
                    });
                }
            }
        }
    }
    intersections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    /// 9x9 grid, 100 m spacing at 36 km/h (10 s per block)
    fn grid() -> RoadGraph {
        let mut b = GraphBuilder::new();
        let step = 100.0 / 111_139.0;
        for r in 0..9 {
            for c in 0..9 {
                b.node(50.0 + r as f64 * step, 4.0 + c as f64 * step * 1.556);
            }
        }
        for r in 0..9u32 {
            for c in 0..9u32 {
                let n = r * 9 + c;
                if c < 8 {
                    b.road(n, n + 1, 100.0, 36.0);
                }
                if r < 8 {
                    b.road(n, n + 9, 100.0, 36.0);
                }
            }
        }
        b.build().unwrap()
    }

    fn origin(g: &RoadGraph, node: NodeId) -> Origin {
        Origin {
            center: g.coordinate(node),
            node,
        }
    }

    #[test]
    fn test_resolved_ranges() {
        let mut p = IsochroneParams::time(vec![600.0, 300.0]);
        assert_eq!(p.resolved_ranges().unwrap(), vec![300.0, 600.0]);

        p.ranges = vec![1000.0];
        p.interval = Some(300.0);
        assert_eq!(p.resolved_ranges().unwrap(), vec![300.0, 600.0, 900.0, 1000.0]);

        p.ranges = vec![300.0, 600.0];
        assert!(p.resolved_ranges().is_err());
        assert!(IsochroneParams::time(vec![]).resolved_ranges().is_err());
        assert!(IsochroneParams::time(vec![-5.0]).resolved_ranges().is_err());
    }

    #[test]
    fn test_limits() {
        let g = grid();
        let chain = FilterChain::new();
        let config = IsochroneConfig::default();
        let builder = IsochroneBuilder::new(&g, &chain, Profile::Car, &config);

        let too_far = IsochroneParams::time(vec![config.max_range_time + 1.0]);
        assert!(matches!(builder.validate(1, &too_far), Err(Error::InvalidRequest(_))));
        let ok = IsochroneParams::time(vec![60.0]);
        assert!(builder.validate(0, &ok).is_err());
        assert!(builder.validate(config.max_locations + 1, &ok).is_err());
        let km = IsochroneParams::distance(vec![200.0], Units::Km);
        assert!(builder.validate(1, &km).is_err(), "200 km is over the distance limit");
    }

    #[test]
    fn test_ranges_nest() {
        let g = grid();
        let chain = FilterChain::new();
        let config = IsochroneConfig::default();
        let builder = IsochroneBuilder::new(&g, &chain, Profile::Car, &config);
        let mut params = IsochroneParams::time(vec![20.0, 40.0]);
        params.area = true;
        params.reachfactor = true;

        let result = builder.build(&[origin(&g, 40)], &params).unwrap();
        let isos = &result.maps[0].isochrones;
        assert_eq!(isos.len(), 2);
        assert_eq!(isos[0].value, 20.0);
        assert_eq!(isos[1].value, 40.0);
        let (small, large) = (isos[0].area.unwrap(), isos[1].area.unwrap());
        assert!(small > 0.0 && small < large, "{} < {}", small, large);
        assert!(isos.iter().all(|i| i.reachfactor.unwrap() <= 1.0));
    }

    #[test]
    fn test_distance_units() {
        let g = grid();
        let chain = FilterChain::new();
        let config = IsochroneConfig::default();
        let builder = IsochroneBuilder::new(&g, &chain, Profile::Car, &config);

        let mut metres = IsochroneParams::distance(vec![250.0], Units::M);
        metres.area = true;
        let mut km = IsochroneParams::distance(vec![0.25], Units::Km);
        km.area = true;

        let a = builder.build(&[origin(&g, 40)], &metres).unwrap();
        let b = builder.build(&[origin(&g, 40)], &km).unwrap();
        let (m2, km2) = (a.maps[0].isochrones[0].area.unwrap(), b.maps[0].isochrones[0].area.unwrap());
        assert!((km2 - m2 / 1e6).abs() < 1e-3, "{} vs {}", km2, m2);
    }

    struct Vertices;

    impl AttributeProvider for Vertices {
        fn name(&self) -> &str {
            "vertices"
        }

        fn attributes(&self, polygon: &Polygon<f64>) -> Vec<(String, f64)> {
            vec![("vertices".to_string(), polygon.exterior().0.len() as f64)]
        }
    }

    #[test]
    fn test_external_attributes() {
        let g = grid();
        let chain = FilterChain::new();
        let config = IsochroneConfig::default();
        let provider = Vertices;
        let builder = IsochroneBuilder::new(&g, &chain, Profile::Car, &config).attribute_provider(&provider);
        let result = builder.build(&[origin(&g, 40)], &IsochroneParams::time(vec![30.0])).unwrap();
        let iso = &result.maps[0].isochrones[0];
        assert_eq!(iso.attributes.len(), 1);
        assert_eq!(iso.attributes[0].0, "vertices");
        assert!(iso.attributes[0].1 >= 4.0);
    }

    #[test]
    fn test_intersections_reference_both_origins() {
        let g = grid();
        let chain = FilterChain::new();
        let config = IsochroneConfig::default();
        let builder = IsochroneBuilder::new(&g, &chain, Profile::Car, &config);
        let mut params = IsochroneParams::time(vec![30.0]);
        params.intersections = true;

        let result = builder.build(&[origin(&g, 39), origin(&g, 41)], &params).unwrap();
        assert_eq!(result.intersections.len(), 1);
        assert_eq!(result.intersections[0].contours, vec![(0, 0), (1, 0)]);
        assert_eq!(result.feature_count(), 3);

        let far = builder.build(&[origin(&g, 0), origin(&g, 80)], &params).unwrap();
        assert!(far.intersections.is_empty());
    }
}
