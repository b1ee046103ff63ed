//! Many-to-many matrices
//!
//! Two strategies fill the table:
//!
//! ## Core one-to-many
//!
//! Used when the prepared core covers the request's filter chain:
//! - one backward upward tree per destination, built in parallel
//! - per source, one forward upward search plus an exhaustive core search
//! - each cell is the best meeting over the destination's backward tree
//!
//! ## Dijkstra
//!
//! One plain search per source over the original edges, stopped once every
//! destination is settled. Exact for any filter chain.
//!
//! Rows are computed in parallel. Unreachable cells hold [`UNREACHABLE`].

use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::config::{MatrixAlgorithm, MatrixConfig};
use crate::contraction::ContractedGraph;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::graph::NodeId;
use crate::routing::core_alt::check_admissible;
use crate::routing::one_to_many::{Label, OneToMany};
use crate::routing::Dijkstra;
use crate::weighting::Weighting;

/// Cell value for pairs with no path within the search budget
pub const UNREACHABLE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Seconds
    Duration,
    /// Metres
    Distance,
    /// Raw weighting units
    Weight,
}

impl Metric {
    pub fn from_name(name: &str) -> Option<Metric> {
        match name {
            "duration" => Some(Metric::Duration),
            "distance" => Some(Metric::Distance),
            "weight" => Some(Metric::Weight),
            _ => None,
        }
    }

    fn value(&self, label: &Label) -> f64 {
        match self {
            Metric::Duration => label.duration as f64 / 10.0,
            Metric::Distance => (label.distance * 100.0).round() / 100.0,
            Metric::Weight => label.weight as f64,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MatrixStats {
    pub sources: usize,
    pub destinations: usize,
    pub unreachable: usize,
    pub tree_time_ms: u64,
    pub rows_time_ms: u64,
}

/// Tables indexed `[source][destination]`, one per requested metric
#[derive(Debug, Clone, Serialize)]
pub struct MatrixResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distances: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<Vec<f64>>>,
    /// Strategy that filled the table
    pub algorithm: MatrixAlgorithm,
    #[serde(skip)]
    pub stats: MatrixStats,
}

impl MatrixResult {
    pub fn table(&self, metric: Metric) -> Option<&Vec<Vec<f64>>> {
        match metric {
            Metric::Duration => self.durations.as_ref(),
            Metric::Distance => self.distances.as_ref(),
            Metric::Weight => self.weights.as_ref(),
        }
    }
}

pub struct MatrixDriver<'a> {
    cg: &'a ContractedGraph,
    weighting: &'a dyn Weighting,
    filter: &'a FilterChain,
    config: &'a MatrixConfig,
    max_visited: usize,
}

impl<'a> MatrixDriver<'a> {
    pub fn new(
        cg: &'a ContractedGraph,
        weighting: &'a dyn Weighting,
        filter: &'a FilterChain,
        config: &'a MatrixConfig,
    ) -> Self {
        Self {
            cg,
            weighting,
            filter,
            config,
            max_visited: usize::MAX,
        }
    }

    /// Settled-node budget of every single search
    pub fn max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited;
        self
    }

    /// Strategy for this driver's filter chain
    pub fn algorithm(&self) -> Result<MatrixAlgorithm> {
        match self.config.algorithm {
            MatrixAlgorithm::Dijkstra => Ok(MatrixAlgorithm::Dijkstra),
            MatrixAlgorithm::Core => {
                check_admissible(self.cg, self.weighting, self.filter, false)?;
                Ok(MatrixAlgorithm::Core)
            }
            MatrixAlgorithm::Auto => {
                match check_admissible(self.cg, self.weighting, self.filter, false) {
                    Ok(()) => Ok(MatrixAlgorithm::Core),
                    Err(e) => {
                        tracing::warn!(error = %e, "core not usable for matrix, falling back to dijkstra");
                        Ok(MatrixAlgorithm::Dijkstra)
                    }
                }
            }
        }
    }

    pub fn compute(
        &self,
        sources: &[NodeId],
        destinations: &[NodeId],
        metrics: &[Metric],
    ) -> Result<MatrixResult> {
        self.validate(sources, destinations, metrics)?;
        let algorithm = self.algorithm()?;
        let mut stats = MatrixStats {
            sources: sources.len(),
            destinations: destinations.len(),
            ..Default::default()
        };

        let rows = match algorithm {
            MatrixAlgorithm::Core => self.core_rows(sources, destinations, &mut stats)?,
            _ => self.dijkstra_rows(sources, destinations, &mut stats),
        };
        stats.unreachable = rows.iter().flatten().filter(|c| c.is_none()).count();

        let table = |metric: Metric| -> Option<Vec<Vec<f64>>> {
            metrics.contains(&metric).then(|| {
                rows.iter()
                    .map(|row| {
                        row.iter()
                            .map(|cell| cell.as_ref().map_or(UNREACHABLE, |l| metric.value(l)))
                            .collect()
                    })
                    .collect()
            })
        };

        tracing::debug!(
            sources = stats.sources,
            destinations = stats.destinations,
            unreachable = stats.unreachable,
            algorithm = ?algorithm,
            tree_ms = stats.tree_time_ms,
            rows_ms = stats.rows_time_ms,
            "matrix computed"
        );
        Ok(MatrixResult {
            durations: table(Metric::Duration),
            distances: table(Metric::Distance),
            weights: table(Metric::Weight),
            algorithm,
            stats,
        })
    }

    fn validate(&self, sources: &[NodeId], destinations: &[NodeId], metrics: &[Metric]) -> Result<()> {
        if sources.is_empty() || destinations.is_empty() {
            return Err(Error::InvalidRequest(
                "matrix needs at least one source and one destination".into(),
            ));
        }
        if metrics.is_empty() {
            return Err(Error::InvalidRequest("no matrix metric requested".into()));
        }
        let routes = sources.len() * destinations.len();
        if routes > self.config.max_routes {
            return Err(Error::InvalidRequest(format!(
                "{} routes exceed the maximum of {}",
                routes, self.config.max_routes
            )));
        }
        let n = self.cg.graph().node_count() as NodeId;
        if let Some(bad) = sources.iter().chain(destinations).find(|&&v| v >= n) {
            return Err(Error::InvalidRequest(format!("node {} is not in the graph", bad)));
        }
        Ok(())
    }

    fn core_rows(
        &self,
        sources: &[NodeId],
        destinations: &[NodeId],
        stats: &mut MatrixStats,
    ) -> Result<Vec<Vec<Option<Label>>>> {
        let otm = OneToMany::new(self.cg, self.weighting, self.filter, self.max_visited)?;

        let start = Instant::now();
        let trees = otm.backward_trees(destinations);
        stats.tree_time_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let rows = sources.par_iter().map(|&s| otm.row(s, &trees)).collect();
        stats.rows_time_ms = start.elapsed().as_millis() as u64;
        Ok(rows)
    }

    fn dijkstra_rows(
        &self,
        sources: &[NodeId],
        destinations: &[NodeId],
        stats: &mut MatrixStats,
    ) -> Vec<Vec<Option<Label>>> {
        let targets: FxHashSet<NodeId> = destinations.iter().copied().collect();
        let dijkstra = Dijkstra::new(self.cg.graph(), self.weighting, self.filter)
            .max_visited(self.max_visited);

        let start = Instant::now();
        let rows = sources
            .par_iter()
            .map(|&s| {
                let mut remaining = targets.len();
                let tree = dijkstra.run_until(s, |node, _| {
                    if targets.contains(&node) {
                        remaining -= 1;
                    }
                    remaining == 0
                });
                destinations
                    .iter()
                    .map(|&d| {
                        tree.entry(d).map(|e| Label {
                            weight: e.weight,
                            duration: e.duration,
                            distance: e.distance,
                        })
                    })
                    .collect()
            })
            .collect();
        stats.rows_time_ms = start.elapsed().as_millis() as u64;
        rows
    }
}
