//! Great-circle distance and forward azimuth between two positions.

use geo::{GeodesicBearing, HaversineDistance};

use crate::track::Point;

/// Smallest distance (m) or elapsed time (s) used as a divisor.
pub const EPSILON: f64 = 1e-3;

/// Haversine distance in metres.
pub fn distance(p1: &Point, p2: &Point) -> f64 {
    p1.position().haversine_distance(&p2.position())
}

/// Forward geodesic azimuth (WGS84) from `p1` to `p2`, in [0, 360).
pub fn bearing(p1: &Point, p2: &Point) -> f64 {
    let azimuth = p1.position().geodesic_bearing(p2.position());
    let normalized = azimuth.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}
