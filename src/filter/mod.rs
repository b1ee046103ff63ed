//! Edge filter chain
//!
//! An ordered conjunction of tagged predicates shared by preparation and
//! queries. Every filter accepts shortcuts unconditionally: a shortcut only
//! exists over edges no admissible request restricts.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use crate::graph::{Direction, EdgeCursor, EdgeId, RoadGraph, VehicleClass};

pub mod conditional;
pub mod restriction;

pub use conditional::{ConditionalAccess, ConditionalTable, ParseError};
pub use restriction::RestrictionSet;

/// Discriminant of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    AvoidFeatures,
    AvoidBorders,
    VehicleAccess,
    ConditionalAccess,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorderPolicy {
    /// Never cross a border
    All,
    /// Never cross into or out of these countries
    Countries(BTreeSet<u16>),
}

/// Vehicle class and dimensions checked against edge restrictions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParams {
    pub class: VehicleClass,
    /// Metres
    pub height: Option<f64>,
    /// Tonnes
    pub weight: Option<f64>,
}

impl VehicleParams {
    pub fn new(class: VehicleClass) -> Self {
        Self {
            class,
            height: None,
            weight: None,
        }
    }
}

/// Time-dependent access from conditional expressions
pub struct ConditionalFilter {
    at: DateTime<FixedOffset>,
    failures: Arc<AtomicUsize>,
    table: Option<Arc<ConditionalTable>>,
}

impl ConditionalFilter {
    /// Parses each expression when it is evaluated
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Self {
            at,
            failures: Arc::new(AtomicUsize::new(0)),
            table: None,
        }
    }

    /// Looks expressions up in a table parsed at engine build
    pub fn with_table(at: DateTime<FixedOffset>, table: Arc<ConditionalTable>) -> Self {
        Self {
            table: Some(table),
            ..Self::new(at)
        }
    }

    pub fn at(&self) -> DateTime<FixedOffset> {
        self.at
    }

    /// Evaluations of unparsable expressions that were let through
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn failure_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.failures)
    }

    fn fail_open(&self) -> bool {
        self.failures.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn allows(&self, edge: EdgeId, expr: &str) -> bool {
        let local = self.at.naive_local();
        match self.table.as_deref().and_then(|t| t.get(edge)) {
            Some(Some(access)) => access.allows(local),
            Some(None) => self.fail_open(),
            None => match ConditionalAccess::parse(expr) {
                Ok(access) => access.allows(local),
                Err(e) => {
                    tracing::warn!(edge, error = %e, "ignoring unparsable conditional restriction");
                    self.fail_open()
                }
            },
        }
    }
}

impl fmt::Debug for ConditionalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalFilter")
            .field("at", &self.at)
            .field("failures", &self.failures())
            .finish()
    }
}

pub type EdgePredicate = dyn Fn(&RoadGraph, &EdgeCursor<'_>, Direction) -> bool + Send + Sync;

pub enum EdgeFilter {
    /// Reject edges carrying any of these feature bits
    AvoidFeatures { mask: u32 },
    AvoidBorders(BorderPolicy),
    VehicleAccess(VehicleParams),
    ConditionalAccess(ConditionalFilter),
    /// Caller supplied predicate, opaque to restriction analysis
    Custom {
        name: String,
        predicate: Arc<EdgePredicate>,
    },
}

impl fmt::Debug for EdgeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeFilter::AvoidFeatures { mask } => {
                f.debug_struct("AvoidFeatures").field("mask", mask).finish()
            }
            EdgeFilter::AvoidBorders(p) => f.debug_tuple("AvoidBorders").field(p).finish(),
            EdgeFilter::VehicleAccess(v) => f.debug_tuple("VehicleAccess").field(v).finish(),
            EdgeFilter::ConditionalAccess(c) => {
                f.debug_tuple("ConditionalAccess").field(c).finish()
            }
            EdgeFilter::Custom { name, .. } => {
                f.debug_struct("Custom").field("name", name).finish()
            }
        }
    }
}

impl EdgeFilter {
    pub fn kind(&self) -> FilterKind {
        match self {
            EdgeFilter::AvoidFeatures { .. } => FilterKind::AvoidFeatures,
            EdgeFilter::AvoidBorders(_) => FilterKind::AvoidBorders,
            EdgeFilter::VehicleAccess(_) => FilterKind::VehicleAccess,
            EdgeFilter::ConditionalAccess(_) => FilterKind::ConditionalAccess,
            EdgeFilter::Custom { .. } => FilterKind::Custom,
        }
    }

    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&RoadGraph, &EdgeCursor<'_>, Direction) -> bool + Send + Sync + 'static,
    {
        EdgeFilter::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn accept(&self, graph: &RoadGraph, edge: &EdgeCursor<'_>, direction: Direction) -> bool {
        if edge.edge.is_shortcut() {
            return true;
        }
        let storage = graph.storage();

        match self {
            EdgeFilter::AvoidFeatures { mask } => edge.edge.features & mask == 0,
            EdgeFilter::AvoidBorders(policy) => match (policy, storage.border(edge.id)) {
                (_, None) => true,
                (BorderPolicy::All, Some(_)) => false,
                (BorderPolicy::Countries(set), Some(b)) => {
                    !set.contains(&b.from_country) && !set.contains(&b.to_country)
                }
            },
            EdgeFilter::VehicleAccess(vehicle) => match storage.vehicle_restriction(edge.id) {
                None => true,
                Some(r) => {
                    let too_high = matches!((vehicle.height, r.max_height), (Some(h), Some(max)) if h > max);
                    let too_heavy = matches!((vehicle.weight, r.max_weight), (Some(w), Some(max)) if w > max);
                    !r.forbids(vehicle.class) && !too_high && !too_heavy
                }
            },
            EdgeFilter::ConditionalAccess(filter) => {
                storage.conditional(edge.id).map_or(true, |expr| filter.allows(edge.id, expr))
            }
            EdgeFilter::Custom { predicate, .. } => predicate(graph, edge, direction),
        }
    }

    /// What this filter may restrict, `None` if it is opaque
    pub fn restrictions(&self) -> Option<RestrictionSet> {
        let mut set = RestrictionSet::none();
        match self {
            EdgeFilter::AvoidFeatures { mask } => set.avoid_features = *mask,
            EdgeFilter::AvoidBorders(BorderPolicy::All) => set.avoid_all_borders = true,
            EdgeFilter::AvoidBorders(BorderPolicy::Countries(c)) => set.avoid_countries = c.clone(),
            EdgeFilter::VehicleAccess(_) => set.vehicle_access = true,
            EdgeFilter::ConditionalAccess(_) => set.conditional_access = true,
            EdgeFilter::Custom { .. } => return None,
        }
        Some(set)
    }
}

/// Ordered AND of filters
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<EdgeFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: EdgeFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: EdgeFilter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> &[EdgeFilter] {
        &self.filters
    }

    /// Short-circuits on the first rejecting filter
    pub fn accept(&self, graph: &RoadGraph, edge: &EdgeCursor<'_>, direction: Direction) -> bool {
        self.filters.iter().all(|f| f.accept(graph, edge, direction))
    }

    pub fn contains(&self, kind: FilterKind) -> bool {
        self.filters.iter().any(|f| f.kind() == kind)
    }

    pub fn get(&self, kind: FilterKind) -> Option<&EdgeFilter> {
        self.filters.iter().find(|f| f.kind() == kind)
    }

    /// Union of the filters' restrictions, `None` if any filter is opaque
    pub fn restrictions(&self) -> Option<RestrictionSet> {
        self.filters
            .iter()
            .try_fold(RestrictionSet::none(), |acc, f| Some(acc.union(&f.restrictions()?)))
    }

    /// Whether a core prepared with `coverage` answers this chain exactly
    pub fn is_covered_by(&self, coverage: &RestrictionSet) -> bool {
        self.restrictions().is_some_and(|r| r.is_subset_of(coverage))
    }

    /// Conditional expressions that failed to parse while evaluating this chain
    pub fn conditional_failures(&self) -> usize {
        match self.get(FilterKind::ConditionalAccess) {
            Some(EdgeFilter::ConditionalAccess(c)) => c.failures(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        features, BorderCrossing, Edge, GraphBuilder, Shortcut, VehicleRestriction,
    };

    fn sample() -> RoadGraph {
        let mut b = GraphBuilder::new();
        for i in 0..4 {
            b.node(50.0, 4.0 + i as f64 * 0.001);
        }
        let ferry = b.edge(Edge::new(0, 1, 100.0, 20.0).with_features(features::FERRIES));
        let border = b.road(1, 2, 100.0, 50.0);
        let low = b.road(2, 3, 100.0, 50.0);
        let cond = b.road(3, 0, 100.0, 50.0);
        let s = b.storage_mut();
        s.borders.insert(
            border,
            BorderCrossing {
                from_country: 56,
                to_country: 250,
            },
        );
        s.vehicle_restrictions.insert(
            low,
            VehicleRestriction {
                max_height: Some(3.5),
                ..Default::default()
            },
        );
        s.conditional_access.insert(cond, "no @ (Mo-Fr".into());
        assert_eq!((ferry, cond), (0, 3));
        b.build().unwrap()
    }

    fn cursor(g: &RoadGraph, id: EdgeId) -> EdgeCursor<'_> {
        let edge = g.edge(id);
        EdgeCursor {
            id,
            edge,
            from: edge.base,
            to: edge.adj,
        }
    }

    #[test]
    fn test_chain_short_circuits_and_reports_kinds() {
        let g = sample();
        let chain = FilterChain::new()
            .with(EdgeFilter::AvoidFeatures {
                mask: features::FERRIES,
            })
            .with(EdgeFilter::AvoidBorders(BorderPolicy::Countries(
                [250].into_iter().collect(),
            )));

        assert!(!chain.accept(&g, &cursor(&g, 0), Direction::Forward));
        assert!(!chain.accept(&g, &cursor(&g, 1), Direction::Forward));
        assert!(chain.accept(&g, &cursor(&g, 2), Direction::Forward));
        assert!(chain.contains(FilterKind::AvoidBorders));
        assert!(!chain.contains(FilterKind::VehicleAccess));
    }

    #[test]
    fn test_vehicle_dimensions() {
        let g = sample();
        let mut truck = VehicleParams::new(VehicleClass::Hgv);
        truck.height = Some(4.0);
        let f = EdgeFilter::VehicleAccess(truck);
        assert!(!f.accept(&g, &cursor(&g, 2), Direction::Forward));

        let car = EdgeFilter::VehicleAccess(VehicleParams::new(VehicleClass::Car));
        assert!(car.accept(&g, &cursor(&g, 2), Direction::Forward));
    }

    #[test]
    fn test_conditional_fails_open_and_counts() {
        let g = sample();
        let at = DateTime::parse_from_rfc3339("2024-03-05T08:00:00+01:00").unwrap();
        let filter = ConditionalFilter::new(at);
        let counter = filter.failure_counter();
        let chain = FilterChain::new().with(EdgeFilter::ConditionalAccess(filter));

        assert!(chain.accept(&g, &cursor(&g, 3), Direction::Forward));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(chain.conditional_failures(), 1);
    }

    #[test]
    fn test_table_backed_conditional_shares_one_parse() {
        let g = sample();
        let table = Arc::new(ConditionalTable::parse(g.storage()));
        assert_eq!(table.unparsable(), 1);

        let at = DateTime::parse_from_rfc3339("2024-03-05T08:00:00+01:00").unwrap();
        let filter = ConditionalFilter::with_table(at, Arc::clone(&table));
        let chain = FilterChain::new().with(EdgeFilter::ConditionalAccess(filter));
        for _ in 0..3 {
            assert!(chain.accept(&g, &cursor(&g, 3), Direction::Forward));
        }
        assert_eq!(chain.conditional_failures(), 3);
        assert!(chain.accept(&g, &cursor(&g, 1), Direction::Forward));
    }

    #[test]
    fn test_every_filter_accepts_shortcuts() {
        let g = sample();
        let mut shortcut = Edge::new(0, 2, 200.0, 0.0).with_features(features::ALL);
        shortcut.shortcut = Some(Shortcut {
            weight: 10,
            duration: 10,
            skipped: [0, 1],
            via: 1,
        });
        let c = EdgeCursor {
            id: 0,
            edge: &shortcut,
            from: 0,
            to: 2,
        };
        let at = DateTime::parse_from_rfc3339("2024-03-05T08:00:00+00:00").unwrap();
        let filters = [
            EdgeFilter::AvoidFeatures {
                mask: features::ALL,
            },
            EdgeFilter::AvoidBorders(BorderPolicy::All),
            EdgeFilter::VehicleAccess(VehicleParams::new(VehicleClass::Pedestrian)),
            EdgeFilter::ConditionalAccess(ConditionalFilter::new(at)),
            EdgeFilter::custom("never", |_, _, _| false),
        ];
        for f in &filters {
            assert!(f.accept(&g, &c, Direction::Forward), "{:?}", f.kind());
            assert!(f.accept(&g, &c, Direction::Backward), "{:?}", f.kind());
        }
    }

    #[test]
    fn test_custom_filter_is_opaque() {
        let chain = FilterChain::new()
            .with(EdgeFilter::AvoidFeatures {
                mask: features::TOLLWAYS,
            })
            .with(EdgeFilter::custom("odd", |_, e, _| e.id % 2 == 0));
        assert!(chain.restrictions().is_none());
        assert!(!chain.is_covered_by(&RestrictionSet::everything()));

        let plain = FilterChain::new().with(EdgeFilter::AvoidFeatures {
            mask: features::TOLLWAYS,
        });
        assert_eq!(
            plain.restrictions().unwrap().avoid_features,
            features::TOLLWAYS
        );
        assert!(plain.is_covered_by(&RestrictionSet::everything()));
        assert!(!plain.is_covered_by(&RestrictionSet::none()));
    }
}
