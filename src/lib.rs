//! # butterfly-reach
//!
//! Road routing over a partially contracted graph. One prepared index serves
//! three kinds of queries while request options vary per call:
//!
//! - point-to-point routes under avoid / vehicle / conditional restrictions
//! - isochrones built from bounded accessibility searches
//! - many-to-many duration and distance matrices
//!
//! ```no_run
//! use butterfly_reach::config::EngineConfig;
//! use butterfly_reach::engine::{RouteOptions, RoutingEngine};
//! use butterfly_reach::graph::{io::GraphFile, Coordinate};
//! use butterfly_reach::weighting::{FastestWeighting, Profile};
//!
//! # fn main() -> butterfly_reach::Result<()> {
//! let graph = GraphFile::read("graph.json".as_ref())?;
//! let engine = RoutingEngine::build(
//!     graph,
//!     Box::new(FastestWeighting::new(Profile::Car)),
//!     EngineConfig::default(),
//! )?;
//! let path = engine.route(
//!     Coordinate::new(50.85, 4.35),
//!     Coordinate::new(50.84, 4.37),
//!     &RouteOptions::default(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod contraction;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geo;
pub mod graph;
pub mod isochrone;
pub mod landmarks;
pub mod matrix;
pub mod range;
pub mod routing;
pub mod weighting;

pub use engine::{RouteOptions, RoutingEngine};
pub use error::{Error, Result};
pub use graph::{Coordinate, NodeId, RoadGraph};
