//! Concave hull polygon generation and smoothing
//!
//! The hull is built around reachable node locations plus the cut points on
//! frontier edges, then simplified with a tolerance derived from the
//! smoothing factor.

use geo::{Area, ConcaveHull, Coord, MultiPoint, Point, Polygon, Simplify};

use crate::geo::metres_to_degrees;
use crate::graph::Coordinate;

/// Smallest smoothing distance, in degrees
pub const MINIMUM_DISTANCE: f64 = 0.006;

/// Default distance for ranges reaching beyond 5 km
const DEFAULT_WIDE_DISTANCE: f64 = 0.010;

const WIDE_RADIUS: f64 = 5000.0;

/// Shape of one isochrone
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Empty,
    Point(Point<f64>),
    Polygon(Polygon<f64>),
}

impl Shape {
    pub fn polygon(&self) -> Option<&Polygon<f64>> {
        match self {
            Shape::Polygon(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Shape::Empty)
    }
}

#[derive(Debug, Default, Clone)]
pub struct HullStats {
    pub input_points: usize,
    pub hull_vertices: usize,
    pub final_vertices: usize,
    /// Smoothing would have collapsed the ring and was dropped
    pub smoothing_discarded: bool,
}

/// Smoothing distance in degrees for `factor` (0..=100, negative for the
/// default) and the largest reach in metres
pub fn smoothing_distance(factor: f64, max_radius: f64) -> f64 {
    if factor < 0.0 {
        return if max_radius < WIDE_RADIUS {
            MINIMUM_DISTANCE
        } else {
            DEFAULT_WIDE_DISTANCE
        };
    }
    let distance = metres_to_degrees(max_radius) / 100.0 * factor;
    distance.max(MINIMUM_DISTANCE)
}

/// Hull around `points`, simplified with `smoothing / 10` as the tolerance
pub fn build_shape(points: &[Coordinate], concavity: f64, smoothing: f64) -> (Shape, HullStats) {
    let mut stats = HullStats {
        input_points: points.len(),
        ..Default::default()
    };

    if points.is_empty() {
        return (Shape::Empty, stats);
    }
    if points.len() < 3 {
        let p = points[0];
        return (Shape::Point(Point::new(p.lon, p.lat)), stats);
    }

    let multi_point: MultiPoint<f64> = points
        .iter()
        .map(|c| Coord { x: c.lon, y: c.lat })
        .collect();
    let hull: Polygon<f64> = multi_point.concave_hull(concavity);
    stats.hull_vertices = hull.exterior().0.len();

    if collapsed(&hull) {
        let p = points[0];
        stats.final_vertices = 0;
        return (Shape::Point(Point::new(p.lon, p.lat)), stats);
    }

    let epsilon = smoothing / 10.0;
    let smoothed = if epsilon > 0.0 {
        hull.simplify(&epsilon)
    } else {
        hull.clone()
    };
    let shape = if collapsed(&smoothed) {
        stats.smoothing_discarded = true;
        hull
    } else {
        smoothed
    };

    stats.final_vertices = shape.exterior().0.len();
    tracing::trace!(
        points = stats.input_points,
        hull = stats.hull_vertices,
        smoothed = stats.final_vertices,
        discarded = stats.smoothing_discarded,
        "isochrone hull"
    );
    (Shape::Polygon(shape), stats)
}

/// Fewer than three distinct vertices or no area
fn collapsed(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.len() < 4 || polygon.unsigned_area() == 0.0
}
