//! Routing engine facade
//!
//! Owns the prepared core, the landmark tables, the snapping index and the
//! configuration. Per request it snaps coordinates, assembles the filter chain
//! from [`RouteOptions`] and dispatches to the search components.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, MatrixAlgorithm, MismatchPolicy};
use crate::contraction::{ContractedGraph, CorePredicate, PrepareCore};
use crate::error::{Error, Result};
use crate::filter::{
    BorderPolicy, ConditionalFilter, ConditionalTable, EdgeFilter, FilterChain, VehicleParams,
};
use crate::graph::{Coordinate, NodeId, NodeLocator, RoadGraph};
use crate::isochrone::{IsochroneBuilder, IsochroneCollection, IsochroneParams, Origin};
use crate::landmarks::Landmarks;
use crate::matrix::{MatrixDriver, MatrixResult, Metric};
use crate::routing::core_alt::check_admissible;
use crate::routing::{CoreRouter, Dijkstra, Path};
use crate::weighting::{Departure, HourlySpeeds, Profile, Weighting};

/// Per-request options that shape the filter chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// Feature bits to avoid, see [`crate::graph::features`]
    pub avoid_features: u32,
    pub avoid_countries: BTreeSet<u16>,
    pub avoid_borders: bool,
    /// Metres
    pub vehicle_height: Option<f64>,
    /// Tonnes
    pub vehicle_weight: Option<f64>,
    /// Local time in the configured zone. Enables conditional restrictions
    /// and time-dependent speeds.
    pub departure: Option<NaiveDateTime>,
}

impl RouteOptions {
    pub fn avoiding(mask: u32) -> Self {
        Self {
            avoid_features: mask,
            ..Default::default()
        }
    }
}

pub struct RoutingEngine {
    cg: ContractedGraph,
    weighting: Box<dyn Weighting>,
    landmarks: Landmarks,
    locator: NodeLocator,
    conditionals: Arc<ConditionalTable>,
    speeds: HourlySpeeds,
    config: EngineConfig,
}

impl RoutingEngine {
    /// Prepare the core for `weighting`, then the landmark tables and the
    /// snapping index
    pub fn build(graph: RoadGraph, weighting: Box<dyn Weighting>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let locator = NodeLocator::build(&graph);
        let conditionals = Arc::new(ConditionalTable::parse(graph.storage()));

        let predicate = CorePredicate::RestrictedEdges(config.preparation.coverage.clone());
        let cg = PrepareCore::new(graph, weighting.as_ref(), predicate)
            .with_config(config.preparation.clone())
            .run()?;
        let landmarks = Landmarks::build(&cg, weighting.as_ref(), &config.landmarks);

        tracing::info!(
            weighting = %weighting.key(),
            nodes = cg.graph().node_count(),
            core_nodes = cg.core_size(),
            shortcuts = cg.graph().shortcut_count(),
            landmark_sets = landmarks.sets().len(),
            conditionals = conditionals.len(),
            unparsable_conditionals = conditionals.unparsable(),
            took_ms = start.elapsed().as_millis() as u64,
            "engine ready"
        );

        Ok(Self {
            cg,
            weighting,
            landmarks,
            locator,
            conditionals,
            speeds: HourlySpeeds,
            config,
        })
    }

    pub fn graph(&self) -> &RoadGraph {
        self.cg.graph()
    }

    pub fn contracted(&self) -> &ContractedGraph {
        &self.cg
    }

    pub fn weighting(&self) -> &dyn Weighting {
        self.weighting.as_ref()
    }

    pub fn profile(&self) -> Profile {
        self.weighting.profile()
    }

    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Nearest routable node within the configured radius
    pub fn snap(&self, coord: Coordinate) -> Result<NodeId> {
        let radius = self.config.routing.snap_radius;
        self.locator
            .snap(coord, radius)
            .map(|(node, _)| node)
            .ok_or_else(|| Error::invalid_point(coord, radius))
    }

    fn departure_time(&self, options: &RouteOptions) -> Result<Option<DateTime<FixedOffset>>> {
        let Some(local) = options.departure else {
            return Ok(None);
        };
        let tz = self.config.routing.timezone()?;
        tz.from_local_datetime(&local)
            .single()
            .map(Some)
            .ok_or_else(|| Error::InvalidRequest(format!("departure {} is ambiguous", local)))
    }

    /// Time-dependent evaluation context. Without speed profiles a departure
    /// only drives the conditional filter and the static search stays exact.
    fn departure(&self, options: &RouteOptions) -> Result<Option<Departure<'_>>> {
        let at = self.departure_time(options)?;
        if !self.graph().storage().has_speed_profiles() {
            return Ok(None);
        }
        Ok(at.map(|at| Departure::new(at, &self.speeds)))
    }

    /// Filters for `options`, in the order they are checked
    pub fn filter_chain(&self, options: &RouteOptions) -> Result<FilterChain> {
        let mut chain = FilterChain::new();
        if options.avoid_features != 0 {
            chain.push(EdgeFilter::AvoidFeatures {
                mask: options.avoid_features,
            });
        }
        if options.avoid_borders {
            chain.push(EdgeFilter::AvoidBorders(BorderPolicy::All));
        } else if !options.avoid_countries.is_empty() {
            chain.push(EdgeFilter::AvoidBorders(BorderPolicy::Countries(
                options.avoid_countries.clone(),
            )));
        }
        let profile = self.profile();
        if profile == Profile::Hgv || options.vehicle_height.is_some() || options.vehicle_weight.is_some() {
            chain.push(EdgeFilter::VehicleAccess(VehicleParams {
                height: options.vehicle_height,
                weight: options.vehicle_weight,
                ..VehicleParams::new(profile.vehicle_class())
            }));
        }
        if let Some(at) = self.departure_time(options)? {
            chain.push(EdgeFilter::ConditionalAccess(ConditionalFilter::with_table(
                at,
                Arc::clone(&self.conditionals),
            )));
        }
        Ok(chain)
    }

    /// Whether the core can answer requests made with `options`
    pub fn covers(&self, options: &RouteOptions) -> Result<bool> {
        let chain = self.filter_chain(options)?;
        let time_dependent = self.departure(options)?.is_some();
        Ok(check_admissible(&self.cg, self.weighting(), &chain, time_dependent).is_ok())
    }

    pub fn route(&self, from: Coordinate, to: Coordinate, options: &RouteOptions) -> Result<Option<Path>> {
        let (s, t) = (self.snap(from)?, self.snap(to)?);
        self.route_nodes(s, t, options)
    }

    pub fn route_nodes(&self, source: NodeId, target: NodeId, options: &RouteOptions) -> Result<Option<Path>> {
        let n = self.graph().node_count() as NodeId;
        if source >= n || target >= n {
            return Err(Error::InvalidRequest(format!(
                "route {} -> {} leaves the graph of {} nodes",
                source, target, n
            )));
        }
        let chain = self.filter_chain(options)?;
        let departure = self.departure(options)?;
        let max_visited = self.config.routing.max_visited_nodes;

        let result = match CoreRouter::new(&self.cg, self.weighting(), &chain, departure) {
            Ok(router) => router
                .landmarks(self.landmarks.select(chain.restrictions().as_ref()))
                .max_visited(max_visited)
                .route(source, target),
            Err(e @ Error::RestrictionSetMismatch { .. }) => match self.config.routing.mismatch_policy {
                MismatchPolicy::Reject => Err(e),
                MismatchPolicy::Fallback => {
                    tracing::warn!(error = %e, "falling back to dijkstra on original edges");
                    Ok(Dijkstra::new(self.graph(), self.weighting(), &chain)
                        .max_visited(max_visited)
                        .departure(departure)
                        .route(source, target))
                }
            },
            Err(e) => Err(e),
        };

        if chain.conditional_failures() > 0 {
            tracing::warn!(
                failures = chain.conditional_failures(),
                "conditional restrictions ignored"
            );
        }
        result
    }

    /// Isochrones around `locations`. Each location snaps to its own origin.
    pub fn isochrones(
        &self,
        locations: &[Coordinate],
        params: &IsochroneParams,
        options: &RouteOptions,
    ) -> Result<IsochroneCollection> {
        let config = &self.config.isochrones;
        if locations.len() > config.max_locations {
            return Err(Error::InvalidRequest(format!(
                "{} locations exceed the maximum of {}",
                locations.len(),
                config.max_locations
            )));
        }
        let origins = locations
            .iter()
            .map(|&center| Ok(Origin { center, node: self.snap(center)? }))
            .collect::<Result<Vec<_>>>()?;

        let chain = self.filter_chain(options)?;
        IsochroneBuilder::new(self.graph(), &chain, self.profile(), config)
            .departure(self.departure(options)?)
            .max_visited(self.config.routing.max_visited_nodes)
            .build(&origins, params)
    }

    pub fn matrix(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
        metrics: &[Metric],
        options: &RouteOptions,
    ) -> Result<MatrixResult> {
        let routes = sources.len() * destinations.len();
        if routes > self.config.matrix.max_routes {
            return Err(Error::InvalidRequest(format!(
                "{} routes exceed the maximum of {}",
                routes, self.config.matrix.max_routes
            )));
        }
        let sources = sources.iter().map(|&c| self.snap(c)).collect::<Result<Vec<_>>>()?;
        let destinations = destinations
            .iter()
            .map(|&c| self.snap(c))
            .collect::<Result<Vec<_>>>()?;
        self.matrix_nodes(&sources, &destinations, metrics, options)
    }

    pub fn matrix_nodes(
        &self,
        sources: &[NodeId],
        destinations: &[NodeId],
        metrics: &[Metric],
        options: &RouteOptions,
    ) -> Result<MatrixResult> {
        if options.departure.is_some() {
            return Err(Error::InvalidRequest(
                "matrices do not support a departure time".into(),
            ));
        }
        let chain = self.filter_chain(options)?;
        let config = &self.config.matrix;
        if self.config.routing.mismatch_policy == MismatchPolicy::Reject
            && config.algorithm != MatrixAlgorithm::Dijkstra
        {
            check_admissible(&self.cg, self.weighting(), &chain, false)?;
        }
        MatrixDriver::new(&self.cg, self.weighting(), &chain, config)
            .max_visited(self.config.routing.max_visited_nodes)
            .compute(sources, destinations, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RestrictionSet;
    use crate::graph::{features, Edge, GraphBuilder};
    use crate::weighting::{FastestWeighting, ShortestWeighting};

    /// Two parallel streets joined by a ferry and a toll road
    fn graph() -> RoadGraph {
        let mut b = GraphBuilder::new();
        for i in 0..4 {
            b.node(50.0, 4.0 + i as f64 * 0.002);
        }
        for i in 0..4 {
            b.node(50.002, 4.0 + i as f64 * 0.002);
        }
        for i in 0..3 {
            b.road(i, i + 1, 150.0, 50.0);
            b.road(i + 4, i + 5, 150.0, 50.0);
        }
        b.edge(Edge::new(0, 4, 220.0, 50.0).with_features(features::FERRIES));
        b.edge(Edge::new(3, 7, 220.0, 50.0).with_features(features::TOLLWAYS));
        b.build().unwrap()
    }

    fn engine(coverage: RestrictionSet, policy: MismatchPolicy) -> RoutingEngine {
        let mut config = EngineConfig::default();
        config.preparation.coverage = coverage;
        config.routing.mismatch_policy = policy;
        config.landmarks.count = 2;
        RoutingEngine::build(graph(), Box::new(ShortestWeighting::new(Profile::Car)), config).unwrap()
    }

    #[test]
    fn test_filter_chain_from_options() {
        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        let mut options = RouteOptions::avoiding(features::FERRIES);
        options.avoid_countries.insert(56);
        options.vehicle_height = Some(4.0);
        options.departure = NaiveDateTime::parse_from_str("2024-03-04 08:00", "%Y-%m-%d %H:%M").ok();

        let chain = e.filter_chain(&options).unwrap();
        let kinds: Vec<_> = chain.filters().iter().map(|f| f.kind()).collect();
        use crate::filter::FilterKind::*;
        assert_eq!(kinds, vec![AvoidFeatures, AvoidBorders, VehicleAccess, ConditionalAccess]);
        assert!(e.filter_chain(&RouteOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_route_avoids_ferry() {
        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        let open = e.route_nodes(0, 4, &RouteOptions::default()).unwrap().unwrap();
        assert_eq!(open.nodes, vec![0, 4]);

        let path = e
            .route_nodes(0, 4, &RouteOptions::avoiding(features::FERRIES))
            .unwrap()
            .unwrap();
        assert_eq!(path.nodes, vec![0, 1, 2, 3, 7, 6, 5, 4]);
        assert_eq!(path.distance, 6.0 * 150.0 + 220.0);

        let none = e
            .route_nodes(0, 4, &RouteOptions::avoiding(features::FERRIES | features::TOLLWAYS))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_mismatch_policy() {
        let ferries_only = RestrictionSet {
            avoid_features: features::FERRIES,
            ..Default::default()
        };
        let tolls = RouteOptions::avoiding(features::TOLLWAYS);

        let fallback = engine(ferries_only.clone(), MismatchPolicy::Fallback);
        assert!(!fallback.covers(&tolls).unwrap());
        let path = fallback.route_nodes(3, 7, &tolls).unwrap().unwrap();
        assert_eq!(path.nodes, vec![3, 2, 1, 0, 4, 5, 6, 7]);

        let strict = engine(ferries_only, MismatchPolicy::Reject);
        let err = strict.route_nodes(3, 7, &tolls).unwrap_err();
        assert!(matches!(err, Error::RestrictionSetMismatch { .. }));
        assert!(strict.route_nodes(3, 7, &RouteOptions::avoiding(features::FERRIES)).is_ok());
    }

    #[test]
    fn test_snap_errors() {
        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        assert_eq!(e.snap(Coordinate::new(50.0, 4.0)).unwrap(), 0);
        let err = e.snap(Coordinate::new(10.0, 10.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidQueryPoint { .. }));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_weighting_mismatch_is_rejected() {
        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        let fastest = FastestWeighting::new(Profile::Car);
        let chain = FilterChain::new();
        assert!(check_admissible(e.contracted(), &fastest, &chain, false).is_err());
        assert!(check_admissible(e.contracted(), e.weighting(), &chain, false).is_ok());
    }

    #[test]
    fn test_matrix_matches_routes() {
        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        let options = RouteOptions::avoiding(features::FERRIES);
        let nodes: Vec<NodeId> = (0..8).collect();
        let m = e.matrix_nodes(&nodes, &nodes, &[Metric::Weight], &options).unwrap();
        let weights = m.weights.unwrap();
        for &s in &nodes {
            for &t in &nodes {
                let expected = e
                    .route_nodes(s, t, &options)
                    .unwrap()
                    .map_or(-1.0, |p| p.weight as f64);
                assert_eq!(weights[s as usize][t as usize], expected, "{} -> {}", s, t);
            }
        }
    }

    #[test]
    fn test_route_options_read_departure_from_json() {
        let options: RouteOptions =
            serde_json::from_str(r#"{"avoid_features": 4, "departure": "2024-03-04T08:30:00"}"#).unwrap();
        assert_eq!(options.avoid_features, features::FERRIES);
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 3, 4).and_then(|d| d.and_hms_opt(8, 30, 0));
        assert_eq!(options.departure, expected);

        let e = engine(RestrictionSet::everything(), MismatchPolicy::Fallback);
        let chain = e.filter_chain(&options).unwrap();
        assert!(chain.restrictions().is_some_and(|r| r.conditional_access));
    }
}
