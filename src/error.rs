//! Error types for butterfly-reach
//!
//! Unreachable targets are not errors: searches return `None` and matrices
//! carry a `-1` sentinel. Everything below aborts the single request (or, for
//! [`Error::Prepare`], the whole graph build).

use thiserror::Error;

use crate::contraction::PrepareError;
use crate::filter::RestrictionSet;
use crate::graph::Coordinate;

/// Errors surfaced by the routing engine
#[derive(Debug, Error)]
pub enum Error {
    /// The coordinate could not be snapped onto the graph
    #[error("could not find a routable point within {radius:.0} m of coordinate ({lat:.6}, {lon:.6})")]
    InvalidQueryPoint { lat: f64, lon: f64, radius: f64 },

    /// The request restricts edges the prepared core does not keep flexible
    #[error("requested restrictions {requested:?} are not covered by the prepared core {covered:?}")]
    RestrictionSetMismatch {
        requested: Option<RestrictionSet>,
        covered: RestrictionSet,
    },

    /// The request itself is malformed or exceeds configured limits
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The graph handed to the engine is inconsistent
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Contraction failed; the index must not be used
    #[error("preprocessing failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_point(coord: Coordinate, radius: f64) -> Self {
        Error::InvalidQueryPoint {
            lat: coord.lat,
            lon: coord.lon,
            radius,
        }
    }

    /// Whether the error is the caller's fault (bad input) rather than the engine's
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidQueryPoint { .. }
                | Error::RestrictionSetMismatch { .. }
                | Error::InvalidRequest(_)
        )
    }
}

/// Result type alias for butterfly-reach operations
pub type Result<T> = std::result::Result<T, Error>;
