//! # Proximity Scanner
//!
//! Finds the unvisited landmarks within the visit radius of a position.
//!
//! The scan is pure: it reads the catalog and the visited set and returns hits
//! ordered nearest first. No I/O happens here; the poller supplies the
//! position, catalog and visited set for each tick.

use std::collections::HashSet;

use log::debug;

use crate::geo_utils::distance_meters;
use crate::{Coordinate, Landmark};

/// A landmark detected within the visit radius.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ScanHit {
    pub landmark_id: String,
    /// Distance from the scanned position in meters
    pub distance_meters: f64,
}

/// Return the landmarks within `threshold_meters` of `current` that are not in
/// `already_visited`, nearest first.
///
/// The boundary is inclusive: a landmark exactly `threshold_meters` away is a hit.
/// Equal distances keep catalog order.
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
/// use visit_engine::{Coordinate, Landmark, scanner};
///
/// let here = Coordinate::new(7.784456, 122.593556);
/// let catalog = vec![
///     Landmark::preset("ipil-municipal-hall", "Ipil Municipal Hall", here),
///     Landmark::preset("far-away", "Far Away", Coordinate::new(7.9, 122.7)),
/// ];
///
/// let hits = scanner::scan(&here, &catalog, &HashSet::new(), 100.0);
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].landmark_id, "ipil-municipal-hall");
/// ```
pub fn scan(
    current: &Coordinate,
    catalog: &[Landmark],
    already_visited: &HashSet<String>,
    threshold_meters: f64,
) -> Vec<ScanHit> {
    let mut hits: Vec<ScanHit> = catalog
        .iter()
        .filter(|landmark| !already_visited.contains(&landmark.id))
        .filter_map(|landmark| {
            let distance = distance_meters(current, &landmark.location);
            debug!(
                "[ProximityScanner] {} ({}) is {:.1}m away",
                landmark.name, landmark.id, distance
            );
            (distance <= threshold_meters).then(|| ScanHit {
                landmark_id: landmark.id.clone(),
                distance_meters: distance,
            })
        })
        .collect();

    // Stable sort keeps catalog order among equidistant landmarks
    hits.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    hits
}

/// Landmark ids of a scan result, nearest first.
pub fn hit_ids(hits: &[ScanHit]) -> Vec<String> {
    hits.iter().map(|h| h.landmark_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::offset_meters;

    fn origin() -> Coordinate {
        Coordinate::new(7.7844, 122.5935)
    }

    fn landmark_at(id: &str, north_m: f64, east_m: f64) -> Landmark {
        Landmark::preset(id, id, offset_meters(&origin(), north_m, east_m))
    }

    #[test]
    fn test_scan_orders_nearest_first() {
        let catalog = vec![
            landmark_at("far", 90.0, 0.0),
            landmark_at("near", 10.0, 0.0),
            landmark_at("mid", 0.0, 45.0),
            landmark_at("outside", 400.0, 0.0),
        ];

        let hits = scan(&origin(), &catalog, &HashSet::new(), 100.0);
        assert_eq!(hit_ids(&hits), vec!["near", "mid", "far"]);
        assert!(hits.windows(2).all(|w| w[0].distance_meters <= w[1].distance_meters));
    }

    #[test]
    fn test_scan_skips_already_visited() {
        let catalog = vec![landmark_at("a", 5.0, 0.0), landmark_at("b", 15.0, 0.0)];
        let visited: HashSet<String> = ["a".to_string()].into_iter().collect();

        let hits = scan(&origin(), &catalog, &visited, 100.0);
        assert_eq!(hit_ids(&hits), vec!["b"]);
    }

    #[test]
    fn test_scan_threshold_is_inclusive() {
        let edge = landmark_at("edge", 100.0, 0.0);
        let threshold = distance_meters(&origin(), &edge.location);

        let hits = scan(&origin(), &[edge.clone()], &HashSet::new(), threshold);
        assert_eq!(hit_ids(&hits), vec!["edge"]);

        let beyond = Landmark::preset("beyond", "beyond", offset_meters(&origin(), threshold + 1.0, 0.0));
        let hits = scan(&origin(), &[edge, beyond], &HashSet::new(), threshold);
        assert_eq!(hit_ids(&hits), vec!["edge"]);
    }

    #[test]
    fn test_scan_empty_catalog() {
        assert!(scan(&origin(), &[], &HashSet::new(), 100.0).is_empty());
    }

    #[test]
    fn test_scan_equal_distances_keep_catalog_order() {
        let here = origin();
        let catalog = vec![
            Landmark::preset("first", "first", here),
            Landmark::preset("second", "second", here),
        ];
        let hits = scan(&here, &catalog, &HashSet::new(), 50.0);
        assert_eq!(hit_ids(&hits), vec!["first", "second"]);
        assert_eq!(hits[0].distance_meters, 0.0);
    }
}
