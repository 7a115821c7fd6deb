//! # Progress Ledger
//!
//! The per-user progress record and the commit that folds newly detected
//! visits into it.
//!
//! [`apply_visits`] is the pure merge: given a ledger and a list of detected
//! landmark ids it computes the next ledger and what was awarded.
//! [`ProgressLedger::commit_visits`] runs that merge inside a store
//! transaction, so a visit is only ever paid out once no matter how many
//! devices report it or how often the same detection is resubmitted.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::badges::BadgeEvaluator;
use crate::error::{LedgerError, StoreError};
use crate::store::{run_transaction, LedgerStore, TxDecision, TxOptions};
use crate::EngineConfig;

/// A user's persisted progress document.
///
/// Field names match the app's user documents. Missing fields read as zero or
/// empty. `visited_landmarks` and `earned_badges` are sets kept as lists;
/// commits only ever append to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LedgerState {
    pub points: u64,
    pub visited_landmarks: Vec<String>,
    pub completed_challenges: Vec<String>,
    pub earned_badges: Vec<String>,
    pub quiz_scores: HashMap<String, u32>,
    /// Reset monthly by the backend
    pub monthly_points: u64,
    /// Maintained elsewhere; commits carry it through unchanged
    pub current_streak: u32,
}

impl LedgerState {
    pub fn has_visited(&self, landmark_id: &str) -> bool {
        self.visited_landmarks.iter().any(|id| id == landmark_id)
    }

    pub fn visited_set(&self) -> HashSet<String> {
        self.visited_landmarks.iter().cloned().collect()
    }

    pub fn visit_count(&self) -> u32 {
        self.visited_landmarks.len() as u32
    }
}

/// What one commit awarded.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CommitResult {
    /// Landmarks recorded by this commit, in detection order
    pub newly_visited_ids: Vec<String>,
    /// Points for the visits themselves
    pub points_awarded: u64,
    /// Bonus points from badges unlocked by this commit
    pub badge_points: u64,
    /// Badges unlocked by this commit, most prestigious first
    pub newly_unlocked_badges: Vec<String>,
}

impl CommitResult {
    /// True when nothing was recorded, e.g. another device got there first.
    pub fn is_empty(&self) -> bool {
        self.newly_visited_ids.is_empty()
    }

    pub fn total_points(&self) -> u64 {
        self.points_awarded + self.badge_points
    }

    /// The badge to announce first.
    pub fn headline_badge(&self) -> Option<&str> {
        self.newly_unlocked_badges.first().map(String::as_str)
    }
}

/// Merge detected visits into `state`.
///
/// Returns `None` when every detected id is already recorded, in which case the
/// ledger must not be written. Otherwise returns the next ledger and the award.
/// Duplicate ids in `detected` count once.
///
/// # Example
///
/// ```rust
/// use visit_engine::{apply_visits, BadgeEvaluator, LedgerState};
///
/// let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
/// let (next, result) = apply_visits(&LedgerState::default(), &ids, &BadgeEvaluator::default(), 50).unwrap();
///
/// assert_eq!(result.points_awarded, 150);
/// assert_eq!(result.newly_unlocked_badges, vec!["explorer-novice"]);
/// assert_eq!(next.points, 250);
///
/// // Resubmitting the same visits awards nothing
/// assert!(apply_visits(&next, &ids, &BadgeEvaluator::default(), 50).is_none());
/// ```
pub fn apply_visits(
    state: &LedgerState,
    detected: &[String],
    evaluator: &BadgeEvaluator,
    points_per_visit: u64,
) -> Option<(LedgerState, CommitResult)> {
    let mut seen = state.visited_set();
    let new_ids: Vec<String> = detected
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();

    if new_ids.is_empty() {
        return None;
    }

    let points_from_visits = points_per_visit.saturating_mul(new_ids.len() as u64);

    let mut next = state.clone();
    next.visited_landmarks.extend(new_ids.iter().cloned());

    let earned: HashSet<&str> = state.earned_badges.iter().map(String::as_str).collect();
    let mut new_badges: Vec<String> = evaluator
        .evaluate(next.visit_count())
        .into_iter()
        .filter(|id| !earned.contains(id.as_str()))
        .collect();
    evaluator.announcement_order(&mut new_badges);
    let points_from_badges = evaluator.bonus_points(&new_badges);

    let total = points_from_visits.saturating_add(points_from_badges);
    next.points = next.points.saturating_add(total);
    next.monthly_points = next.monthly_points.saturating_add(total);
    next.earned_badges.extend(new_badges.iter().cloned());

    Some((
        next,
        CommitResult {
            newly_visited_ids: new_ids,
            points_awarded: points_from_visits,
            badge_points: points_from_badges,
            newly_unlocked_badges: new_badges,
        },
    ))
}

/// Authoritative per-user progress backed by a [`LedgerStore`].
pub struct ProgressLedger<S> {
    store: S,
    evaluator: BadgeEvaluator,
    points_per_visit: u64,
    tx: TxOptions,
}

impl<S: LedgerStore> ProgressLedger<S> {
    pub fn new(store: S, evaluator: BadgeEvaluator, config: &EngineConfig) -> Self {
        Self {
            store,
            evaluator,
            points_per_visit: config.points_per_visit,
            tx: TxOptions {
                retry_limit: config.transaction_retry_limit,
                backoff: config.retry_backoff(),
            },
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn evaluator(&self) -> &BadgeEvaluator {
        &self.evaluator
    }

    /// Read a user's ledger, creating the zero-valued document if it is absent.
    pub async fn load(&self, user_id: &str) -> Result<LedgerState, LedgerError> {
        if let Some(doc) = self.store.read(user_id).await? {
            return Ok(doc.value);
        }

        let initial = LedgerState::default();
        match self.store.compare_and_swap(user_id, None, &initial).await {
            Ok(_) => {
                info!("[ProgressLedger] Created ledger for {}", user_id);
                Ok(initial)
            }
            // Someone else created it between our read and write
            Err(StoreError::Conflict) => Ok(self
                .store
                .read(user_id)
                .await?
                .map(|doc| doc.value)
                .unwrap_or_default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically record newly detected visits and award points and badges.
    ///
    /// Ids already in the ledger are ignored, so resubmitting a visit, or racing
    /// another device that reports it, never pays out twice. When nothing new
    /// remains the store is left untouched and an empty result is returned.
    /// An empty `detected` list is a no-op and never contacts the store.
    pub async fn commit_visits(&self, user_id: &str, detected: &[String]) -> Result<CommitResult, LedgerError> {
        if detected.is_empty() {
            debug!("[ProgressLedger] Empty commit for {} ignored", user_id);
            return Ok(CommitResult::default());
        }

        let evaluator = &self.evaluator;
        let points_per_visit = self.points_per_visit;

        let result = run_transaction(&self.store, user_id, &self.tx, |state| {
            match apply_visits(state, detected, evaluator, points_per_visit) {
                Some((next, result)) => TxDecision::Commit(next, result),
                None => TxDecision::Abort(CommitResult::default()),
            }
        })
        .await?;

        if result.is_empty() {
            debug!("[ProgressLedger] {} visits for {} were already recorded", detected.len(), user_id);
        } else {
            info!(
                "[ProgressLedger] {} recorded {} new landmark(s): +{} points, +{} badge points, badges {:?}",
                user_id,
                result.newly_visited_ids.len(),
                result.points_awarded,
                result.badge_points,
                result.newly_unlocked_badges
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ledger() -> ProgressLedger<Arc<MemoryLedgerStore>> {
        ProgressLedger::new(
            Arc::new(MemoryLedgerStore::new()),
            BadgeEvaluator::default(),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_apply_visits_skips_known_and_duplicate_ids() {
        let state = LedgerState {
            visited_landmarks: ids(&["a"]),
            points: 50,
            ..Default::default()
        };

        let (next, result) =
            apply_visits(&state, &ids(&["a", "b", "b"]), &BadgeEvaluator::default(), 50).unwrap();
        assert_eq!(result.newly_visited_ids, ids(&["b"]));
        assert_eq!(result.points_awarded, 50);
        assert_eq!(next.visited_landmarks, ids(&["a", "b"]));
        assert_eq!(next.points, 100);
    }

    #[test]
    fn test_apply_visits_preserves_other_fields() {
        let mut quiz_scores = HashMap::new();
        quiz_scores.insert("a".to_string(), 80);
        let state = LedgerState {
            current_streak: 6,
            completed_challenges: ids(&["weekly-1"]),
            quiz_scores,
            ..Default::default()
        };

        let (next, _) = apply_visits(&state, &ids(&["x"]), &BadgeEvaluator::default(), 50).unwrap();
        assert_eq!(next.current_streak, 6);
        assert_eq!(next.completed_challenges, state.completed_challenges);
        assert_eq!(next.quiz_scores, state.quiz_scores);
    }

    #[test]
    fn test_apply_visits_multiple_badges_in_one_commit() {
        let state = LedgerState {
            visited_landmarks: (0..9).map(|i| format!("old-{}", i)).collect(),
            ..Default::default()
        };

        let (next, result) = apply_visits(&state, &ids(&["n1"]), &BadgeEvaluator::default(), 50).unwrap();
        assert_eq!(result.newly_unlocked_badges, ids(&["explorer-intermediate", "explorer-novice"]));
        assert_eq!(result.headline_badge(), Some("explorer-intermediate"));
        assert_eq!(result.badge_points, 350);
        assert_eq!(next.points, 400);
        assert_eq!(next.monthly_points, 400);
    }

    #[test]
    fn test_apply_visits_does_not_reaward_earned_badge() {
        let state = LedgerState {
            visited_landmarks: ids(&["a", "b", "c"]),
            earned_badges: ids(&["explorer-novice"]),
            ..Default::default()
        };
        let (next, result) = apply_visits(&state, &ids(&["d"]), &BadgeEvaluator::default(), 50).unwrap();
        assert!(result.newly_unlocked_badges.is_empty());
        assert_eq!(result.badge_points, 0);
        assert_eq!(next.earned_badges, ids(&["explorer-novice"]));
    }

    #[test]
    fn test_ledger_document_uses_app_field_names() {
        let json = r#"{"points": 120, "visitedLandmarks": ["a"], "currentStreak": 2, "username": "ignored"}"#;
        let state: LedgerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.points, 120);
        assert_eq!(state.visited_landmarks, ids(&["a"]));
        assert_eq!(state.current_streak, 2);
        assert_eq!(state.monthly_points, 0);

        let out = serde_json::to_value(&state).unwrap();
        assert!(out.get("earnedBadges").is_some());
        assert!(out.get("monthlyPoints").is_some());
    }

    #[tokio::test]
    async fn test_load_creates_zero_ledger() {
        let ledger = ledger();
        let state = ledger.load("u1").await.unwrap();
        assert_eq!(state, LedgerState::default());
        assert!(ledger.store().document_bytes("u1").is_some());

        // Second load reads the existing document
        ledger.load("u1").await.unwrap();
        assert_eq!(ledger.store().write_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let ledger = ledger();
        let first = ledger.commit_visits("u1", &ids(&["x"])).await.unwrap();
        assert_eq!(first.points_awarded, 50);

        let second = ledger.commit_visits("u1", &ids(&["x"])).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(second.total_points(), 0);

        let state = ledger.load("u1").await.unwrap();
        assert_eq!(state.points, 50);
        assert_eq!(state.visited_landmarks, ids(&["x"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_commits_award_once() {
        let store = Arc::new(MemoryLedgerStore::new().with_latency(Duration::from_millis(40)));
        let device_a = ProgressLedger::new(store.clone(), BadgeEvaluator::default(), &EngineConfig::default());
        let device_b = ProgressLedger::new(store.clone(), BadgeEvaluator::default(), &EngineConfig::default());
        let detected = ids(&["x"]);

        let (a, b) = tokio::join!(
            device_a.commit_visits("u1", &detected),
            device_b.commit_visits("u1", &detected),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.points_awarded + b.points_awarded, 50);
        assert!(a.is_empty() != b.is_empty());

        let state = device_a.load("u1").await.unwrap();
        assert_eq!(state.visited_landmarks, ids(&["x"]));
        assert_eq!(state.points, 50);
        assert_eq!(state.monthly_points, 50);
    }

    #[tokio::test]
    async fn test_first_three_visits_unlock_novice() {
        let ledger = ledger();
        let result = ledger.commit_visits("u1", &ids(&["a", "b", "c"])).await.unwrap();

        assert_eq!(result.points_awarded, 150);
        assert_eq!(result.newly_visited_ids.len(), 3);
        assert_eq!(result.newly_unlocked_badges, ids(&["explorer-novice"]));

        let state = ledger.load("u1").await.unwrap();
        assert_eq!(state.points, 250);
        assert_eq!(state.earned_badges, ids(&["explorer-novice"]));
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let ledger = ledger();
        let result = ledger.commit_visits("u1", &[]).await.unwrap();
        assert_eq!(result, CommitResult::default());
        assert_eq!(ledger.store().read_count(), 0);
        assert_eq!(ledger.store().write_count(), 0);
        assert!(ledger.store().document_bytes("u1").is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_ledger_untouched() {
        let ledger = ledger();
        ledger.commit_visits("u1", &ids(&["a"])).await.unwrap();
        let before = ledger.store().document_bytes("u1").unwrap();

        ledger.store().fail_next_writes(1);
        let err = ledger.commit_visits("u1", &ids(&["b", "c"])).await.unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(ledger.store().document_bytes("u1").unwrap(), before);

        let retry = ledger.commit_visits("u1", &ids(&["b", "c"])).await.unwrap();
        assert_eq!(retry.points_awarded, 100);
        assert_eq!(retry.newly_unlocked_badges, ids(&["explorer-novice"]));

        let again = ledger.commit_visits("u1", &ids(&["b", "c"])).await.unwrap();
        assert!(again.is_empty());

        let state = ledger.load("u1").await.unwrap();
        assert_eq!(state.points, 50 + 100 + 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_surfaces_conflict_exhaustion() {
        let ledger = ledger();
        ledger.commit_visits("u1", &ids(&["a"])).await.unwrap();
        let before = ledger.store().document_bytes("u1").unwrap();

        ledger.store().inject_concurrent_writes(50);
        let err = ledger.commit_visits("u1", &ids(&["b"])).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrentUpdateFailure { attempts: 4 }));
        assert_eq!(ledger.store().document_bytes("u1").unwrap(), before);
    }
}
