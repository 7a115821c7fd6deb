//! Landmark catalog: the seeded presets plus approved user submissions.

use std::collections::HashSet;
use std::future::Future;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::{Coordinate, Landmark};

/// Source of the landmarks a scan runs against.
pub trait LandmarkCatalog: Send + Sync {
    fn list_landmarks(&self) -> impl Future<Output = Result<Vec<Landmark>, CatalogError>> + Send;
}

/// Moderation state of a user-submitted landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

/// A landmark submitted by a user, as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedLandmark {
    pub id: String,
    pub name: String,
    pub location: Coordinate,
    pub status: ModerationStatus,
    pub user_id: String,
}

/// The landmarks seeded with the app.
pub fn preset_landmarks() -> Vec<Landmark> {
    vec![
        Landmark::preset(
            "ipil-municipal-hall",
            "Ipil Municipal Hall",
            Coordinate::new(7.784456, 122.593556),
        ),
        Landmark::preset(
            "ipil-public-market",
            "Ipil Public Market",
            Coordinate::new(7.777286191323397, 122.5839903999468),
        ),
        Landmark::preset(
            "ipil-sanctuary",
            "Ipil Sanctuary",
            Coordinate::new(7.785556, 122.594444),
        ),
    ]
}

/// Presets followed by approved submissions. A submission reusing a preset id
/// (or an earlier submission's id) is dropped.
pub fn merge_catalog(presets: Vec<Landmark>, submissions: &[SubmittedLandmark]) -> Vec<Landmark> {
    let mut seen: HashSet<String> = presets.iter().map(|l| l.id.clone()).collect();
    let mut catalog = presets;

    for s in submissions {
        if s.status != ModerationStatus::Approved || !seen.insert(s.id.clone()) {
            continue;
        }
        catalog.push(Landmark {
            id: s.id.clone(),
            name: s.name.clone(),
            location: s.location,
            is_preset: false,
        });
    }

    catalog
}

/// A catalog held in memory, replaceable as moderation approves submissions.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    landmarks: RwLock<Vec<Landmark>>,
}

impl StaticCatalog {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks: RwLock::new(landmarks) }
    }

    /// Presets merged with the approved subset of `submissions`.
    pub fn with_submissions(submissions: &[SubmittedLandmark]) -> Self {
        Self::new(merge_catalog(preset_landmarks(), submissions))
    }

    pub fn replace(&self, landmarks: Vec<Landmark>) {
        match self.landmarks.write() {
            Ok(mut guard) => *guard = landmarks,
            Err(poisoned) => *poisoned.into_inner() = landmarks,
        }
    }
}

impl LandmarkCatalog for StaticCatalog {
    async fn list_landmarks(&self) -> Result<Vec<Landmark>, CatalogError> {
        self.landmarks
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| CatalogError::Unavailable("catalog lock poisoned".to_string()))
    }
}
