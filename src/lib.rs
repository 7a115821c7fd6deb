//! # Visit Engine
//!
//! Proximity-based landmark visit detection and progress awards for the
//! landmark discovery app.
//!
//! This library provides:
//! - Great-circle distance and nearest-first proximity scans
//! - A transactional progress ledger that pays out each visit exactly once
//! - Badge evaluation against a static rule table
//! - A poller that drives scan-and-commit on a timer and on foreground events
//!
//! ## Features
//!
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashSet;
//! use visit_engine::{apply_visits, scanner, BadgeEvaluator, Coordinate, EngineConfig, Landmark, LedgerState};
//!
//! let config = EngineConfig::default();
//! let here = Coordinate::new(7.784456, 122.593556);
//! let catalog = vec![Landmark::preset("ipil-municipal-hall", "Ipil Municipal Hall", here)];
//!
//! let ledger = LedgerState::default();
//! let hits = scanner::scan(&here, &catalog, &ledger.visited_set(), config.visit_radius_meters);
//! let detected = scanner::hit_ids(&hits);
//!
//! let (next, result) = apply_visits(&ledger, &detected, &BadgeEvaluator::default(), config.points_per_visit).unwrap();
//! assert_eq!(result.points_awarded, 50);
//! assert_eq!(next.visited_landmarks, vec!["ipil-municipal-hall"]);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CatalogError, ConfigError, LedgerError, PositionError, StoreError, TickError};

pub mod geo_utils;

// Proximity detection
pub mod scanner;
pub use scanner::ScanHit;

pub mod badges;
pub use badges::{BadgeCategory, BadgeEvaluator, BadgeProgress, BadgeRule};

// Ledger and its backing store
pub mod ledger;
pub use ledger::{apply_visits, CommitResult, LedgerState, ProgressLedger};

pub mod store;
pub use store::{run_transaction, LedgerStore, MemoryLedgerStore, TxDecision, TxOptions, Versioned};

pub mod catalog;
pub use catalog::{LandmarkCatalog, ModerationStatus, StaticCatalog, SubmittedLandmark};

pub mod leaderboard;
pub use leaderboard::{rank_leaderboard, Contender, LeaderboardEntry};

pub mod poller;
pub use poller::{
    PollerHandle, PollerStatus, PositionSource, TickOutcome, VisitNotification, VisitNotifier, VisitPoller,
};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("VisitEngineRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate in degrees.
///
/// # Example
/// ```
/// use visit_engine::Coordinate;
/// let hall = Coordinate::new(7.784456, 122.593556); // Ipil
/// assert!(hall.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the coordinate is finite and in range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A place that can be visited. Only `id` and `location` matter for detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Landmark {
    pub id: String,
    pub name: String,
    pub location: Coordinate,
    /// Seeded with the app rather than submitted by a user
    #[serde(default)]
    pub is_preset: bool,
}

impl Landmark {
    /// A landmark seeded with the app.
    pub fn preset(id: impl Into<String>, name: impl Into<String>, location: Coordinate) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location,
            is_preset: true,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Default visit radius in meters.
pub const VISIT_RADIUS_METERS: f64 = 100.0;
/// Default poll interval in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 10_000;
/// Default points per newly visited landmark.
pub const POINTS_PER_VISIT: u64 = 50;
/// Default number of transaction retries after the first attempt.
pub const TRANSACTION_RETRY_LIMIT: u32 = 3;
/// Default delay before the first transaction retry, in milliseconds.
pub const RETRY_BACKOFF_MS: u64 = 25;

/// Engine configuration.
///
/// Deserializes from camelCase JSON; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EngineConfig {
    /// A landmark within this distance counts as visited.
    /// Default: 100.0 meters
    pub visit_radius_meters: f64,

    /// Time between timer-driven ticks.
    /// Default: 10000 ms
    pub poll_interval_ms: u64,

    /// Points for each newly visited landmark.
    /// Default: 50
    pub points_per_visit: u64,

    /// Commit retries after a write conflict, not counting the first attempt.
    /// Default: 3
    pub transaction_retry_limit: u32,

    /// Delay before the first conflict retry, doubled for each further retry.
    /// Default: 25 ms
    pub retry_backoff_ms: u64,

    /// Longest wait for a position fix before the tick gives up.
    /// Default: 15000 ms
    pub position_timeout_ms: u64,

    /// How long stopping a poller waits for an in-flight tick.
    /// Default: 5000 ms
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            visit_radius_meters: VISIT_RADIUS_METERS,
            poll_interval_ms: POLL_INTERVAL_MS,
            points_per_visit: POINTS_PER_VISIT,
            transaction_retry_limit: TRANSACTION_RETRY_LIMIT,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            position_timeout_ms: 15_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON object and validate it.
    ///
    /// ```
    /// use visit_engine::EngineConfig;
    /// let config = EngineConfig::from_json(r#"{"visitRadiusMeters": 50}"#).unwrap();
    /// assert_eq!(config.visit_radius_meters, 50.0);
    /// assert_eq!(config.points_per_visit, 50);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.visit_radius_meters.is_finite() || self.visit_radius_meters <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "visitRadiusMeters",
                reason: format!("must be a positive distance, got {}", self.visit_radius_meters),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pollIntervalMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.position_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "positionTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{debug, info};
    use std::collections::HashSet;

    /// Outcome of a pure visit merge.
    #[derive(Debug, Clone, uniffi::Record)]
    pub struct VisitMerge {
        pub state: LedgerState,
        pub result: CommitResult,
    }

    /// Great-circle distance in meters.
    #[uniffi::export]
    pub fn ffi_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
        geo_utils::distance_meters(&a, &b)
    }

    /// Unvisited landmarks within `threshold_meters`, nearest first.
    #[uniffi::export]
    pub fn ffi_scan_nearby(
        current: Coordinate,
        catalog: Vec<Landmark>,
        already_visited: Vec<String>,
        threshold_meters: f64,
    ) -> Vec<ScanHit> {
        init_logging();
        let visited: HashSet<String> = already_visited.into_iter().collect();
        let hits = scanner::scan(&current, &catalog, &visited, threshold_meters);
        debug!(
            "[VisitEngineRust] scan_nearby: {} of {} landmarks within {}m",
            hits.len(),
            catalog.len(),
            threshold_meters
        );
        hits
    }

    /// Badges a visit count qualifies for, most prestigious first.
    #[uniffi::export]
    pub fn ffi_evaluate_badges(total_visit_count: u32) -> Vec<String> {
        let evaluator = BadgeEvaluator::default();
        let mut ids: Vec<String> = evaluator.evaluate(total_visit_count).into_iter().collect();
        evaluator.announcement_order(&mut ids);
        ids
    }

    /// Progress toward every visit badge.
    #[uniffi::export]
    pub fn ffi_badge_progress(total_visit_count: u32) -> Vec<BadgeProgress> {
        BadgeEvaluator::default().progress(total_visit_count)
    }

    /// Merge detected visits into a ledger for hosts running their own
    /// transaction. `None` means nothing new: do not write.
    #[uniffi::export]
    pub fn ffi_apply_visits(state: LedgerState, detected: Vec<String>, points_per_visit: u64) -> Option<VisitMerge> {
        init_logging();
        let merged = apply_visits(&state, &detected, &BadgeEvaluator::default(), points_per_visit);
        if let Some((_, ref result)) = merged {
            info!(
                "[VisitEngineRust] apply_visits: {} new, +{} points, badges {:?}",
                result.newly_visited_ids.len(),
                result.total_points(),
                result.newly_unlocked_badges
            );
        }
        merged.map(|(state, result)| VisitMerge { state, result })
    }

    #[uniffi::export]
    pub fn default_engine_config() -> EngineConfig {
        EngineConfig::default()
    }

    #[uniffi::export]
    pub fn default_badge_rules() -> Vec<BadgeRule> {
        badges::default_rules()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(7.7844, 122.5935).is_valid());
        assert!(Coordinate::new(-90.0, 180.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_default_config_matches_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.visit_radius_meters, VISIT_RADIUS_METERS);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.points_per_visit, 50);
        assert_eq!(config.transaction_retry_limit, 3);
        assert_eq!(config.retry_backoff_ms, RETRY_BACKOFF_MS);
        assert_eq!(TxOptions::default().backoff, Duration::from_millis(RETRY_BACKOFF_MS));
        assert_eq!(config.position_timeout(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = EngineConfig::from_json(r#"{"pollIntervalMs": 30000, "pointsPerVisit": 75}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 30_000);
        assert_eq!(config.points_per_visit, 75);
        assert_eq!(config.visit_radius_meters, 100.0);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"visitRadiusMeters": -5}"#),
            Err(ConfigError::Invalid { field: "visitRadiusMeters", .. })
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"pollIntervalMs": 0}"#),
            Err(ConfigError::Invalid { field: "pollIntervalMs", .. })
        ));
        assert!(matches!(EngineConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_landmark_document_format() {
        let json = r#"{"id":"plaza","name":"Plaza","location":{"latitude":7.78,"longitude":122.59}}"#;
        let landmark: Landmark = serde_json::from_str(json).unwrap();
        assert!(!landmark.is_preset);
        assert_eq!(landmark.location, Coordinate::new(7.78, 122.59));
    }
}
