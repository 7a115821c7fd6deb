//! # Geographic Utilities
//!
//! Great-circle distance and small local offsets for visit detection.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_meters`] | Haversine distance between two coordinates |
//! | [`offset_meters`] | Coordinate displaced north/east by a distance in meters |
//!
//! ## Example
//!
//! ```rust
//! use visit_engine::{Coordinate, geo_utils};
//!
//! let hall = Coordinate::new(7.784456, 122.593556);
//! let market = Coordinate::new(7.777286, 122.583990);
//!
//! let d = geo_utils::distance_meters(&hall, &market);
//! assert!(d > 1_000.0 && d < 1_500.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! The haversine formula on a sphere of radius [`EARTH_RADIUS_METERS`]. Accurate to
//! well under a meter at visit-radius scales, which is all the scanner needs.

use crate::Coordinate;

/// Mean Earth radius used by every distance in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two coordinates in meters.
///
/// Symmetric, and exactly `0.0` for identical coordinates.
///
/// # Example
///
/// ```rust
/// use visit_engine::{Coordinate, geo_utils};
///
/// let a = Coordinate::new(51.5074, -0.1278);
/// let b = Coordinate::new(48.8566, 2.3522);
///
/// assert_eq!(geo_utils::distance_meters(&a, &a), 0.0);
/// assert_eq!(geo_utils::distance_meters(&a, &b), geo_utils::distance_meters(&b, &a));
/// ```
#[inline]
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    // abs() keeps the result bit-identical when a and b are swapped
    let d_phi = (b.latitude - a.latitude).abs().to_radians();
    let d_lambda = (b.longitude - a.longitude).abs().to_radians();

    let sin_phi = (d_phi / 2.0).sin();
    let sin_lambda = (d_lambda / 2.0).sin();
    let h = (sin_phi * sin_phi + phi1.cos() * phi2.cos() * sin_lambda * sin_lambda).clamp(0.0, 1.0);

    EARTH_RADIUS_METERS * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Displace a coordinate by `north_m` meters along the meridian and `east_m`
/// meters along the parallel.
///
/// A flat local approximation, good for the tens-to-hundreds of meters used
/// when simulating movement around landmarks. Latitude is clamped to the poles
/// and longitude wrapped into `[-180, 180]`.
pub fn offset_meters(origin: &Coordinate, north_m: f64, east_m: f64) -> Coordinate {
    let d_lat = (north_m / EARTH_RADIUS_METERS).to_degrees();
    let cos_lat = origin.latitude.to_radians().cos().max(1e-6);
    let d_lng = (east_m / (EARTH_RADIUS_METERS * cos_lat)).to_degrees();

    let latitude = (origin.latitude + d_lat).clamp(-90.0, 90.0);
    let mut longitude = origin.longitude + d_lng;
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }

    Coordinate::new(latitude, longitude)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_distance_same_point_is_zero() {
        let p = Coordinate::new(7.784456, 122.593556);
        assert_eq!(distance_meters(&p, &p), 0.0);

        let south_west = Coordinate::new(-33.8688, -151.2093);
        assert_eq!(distance_meters(&south_west, &south_west), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        // London to Paris is approximately 344 km
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        assert!(approx_eq(distance_meters(&london, &paris), 343_500.0, 2_000.0));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let points = [
            Coordinate::new(7.784456, 122.593556),
            Coordinate::new(7.777286191323397, 122.5839903999468),
            Coordinate::new(-45.0, -179.9),
            Coordinate::new(89.9, 10.0),
            Coordinate::new(0.0, 0.0),
            Coordinate::new(-12.5, 179.99),
        ];

        for a in &points {
            for b in &points {
                assert_eq!(distance_meters(a, b), distance_meters(b, a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_distance_antipodal_is_half_circumference() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 180.0);
        let half = std::f64::consts::PI * EARTH_RADIUS_METERS;
        assert!(approx_eq(distance_meters(&a, &b), half, 1.0));
    }

    #[test]
    fn test_offset_north_matches_distance() {
        let origin = Coordinate::new(7.7844, 122.5935);
        let moved = offset_meters(&origin, 100.0, 0.0);
        assert!(approx_eq(distance_meters(&origin, &moved), 100.0, 1e-6));
    }

    #[test]
    fn test_offset_east_is_close() {
        let origin = Coordinate::new(51.5, -0.12);
        let moved = offset_meters(&origin, 0.0, 250.0);
        assert!(approx_eq(distance_meters(&origin, &moved), 250.0, 0.5));
        assert_eq!(moved.latitude, origin.latitude);
    }

    #[test]
    fn test_offset_wraps_longitude() {
        let origin = Coordinate::new(0.0, 179.9999);
        let moved = offset_meters(&origin, 0.0, 1_000.0);
        assert!(moved.longitude < 0.0);
        assert!(moved.is_valid());
    }
}
