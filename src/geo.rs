//! Geodesic helpers shared by snapping, landmarks and isochrones

use geo::{Distance, Haversine, Point};

use crate::graph::Coordinate;

/// Metres per degree of latitude
const METRES_PER_DEGREE: f64 = 111_139.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    Haversine::distance(p1, p2)
}

pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Rough metres -> degrees conversion used for smoothing tolerances
pub fn metres_to_degrees(metres: f64) -> f64 {
    metres / METRES_PER_DEGREE
}

/// Point at `fraction` along the straight segment `a -> b`
pub fn interpolate(a: Coordinate, b: Coordinate, fraction: f64) -> Coordinate {
    let t = fraction.clamp(0.0, 1.0);
    Coordinate::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t)
}
