//! # Badges
//!
//! Static badge rules and the evaluator that decides which badges a visit
//! count qualifies for.
//!
//! Visit counts only drive [`BadgeCategory::Explorer`] rules. Photographer,
//! historian and social badges are awarded from counters this crate never
//! sees, so the evaluator leaves them alone.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Badge family. Only `Explorer` is driven by landmark visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum BadgeCategory {
    Explorer,
    Photographer,
    Historian,
    Social,
}

/// A static badge definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct BadgeRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: BadgeCategory,
    /// Counter value at which the badge unlocks
    pub requirement: u32,
    /// Bonus points awarded once on unlock
    pub points: u64,
}

impl BadgeRule {
    /// Whether `count` meets this rule's requirement.
    pub fn is_met(&self, count: u32) -> bool {
        count >= self.requirement
    }

    /// Progress toward the requirement as a percentage, capped at 100.
    pub fn progress_percent(&self, count: u32) -> f64 {
        if self.requirement == 0 {
            return 100.0;
        }
        (count as f64 / self.requirement as f64 * 100.0).min(100.0)
    }
}

/// Progress of one badge for display.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct BadgeProgress {
    pub badge_id: String,
    pub name: String,
    pub current: u32,
    pub requirement: u32,
    pub percent: f64,
    pub unlocked: bool,
}

/// The explorer ladder shipped with the app.
pub fn default_rules() -> Vec<BadgeRule> {
    vec![
        BadgeRule {
            id: "explorer-novice".to_string(),
            name: "Explorer Novice".to_string(),
            description: "Visit your first 3 landmarks".to_string(),
            category: BadgeCategory::Explorer,
            requirement: 3,
            points: 100,
        },
        BadgeRule {
            id: "explorer-intermediate".to_string(),
            name: "Explorer Pro".to_string(),
            description: "Visit 10 different landmarks".to_string(),
            category: BadgeCategory::Explorer,
            requirement: 10,
            points: 250,
        },
        BadgeRule {
            id: "explorer-master".to_string(),
            name: "Master Explorer".to_string(),
            description: "Visit 20 different landmarks".to_string(),
            category: BadgeCategory::Explorer,
            requirement: 20,
            points: 500,
        },
    ]
}

/// Evaluates visit counts against a fixed rule table.
#[derive(Debug, Clone)]
pub struct BadgeEvaluator {
    rules: Vec<BadgeRule>,
}

impl Default for BadgeEvaluator {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl BadgeEvaluator {
    pub fn new(rules: Vec<BadgeRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[BadgeRule] {
        &self.rules
    }

    pub fn rule(&self, badge_id: &str) -> Option<&BadgeRule> {
        self.rules.iter().find(|r| r.id == badge_id)
    }

    fn visit_rules(&self) -> impl Iterator<Item = &BadgeRule> {
        self.rules.iter().filter(|r| r.category == BadgeCategory::Explorer)
    }

    /// Ids of every visit-driven badge whose requirement `total_visit_count` meets.
    ///
    /// Depends only on the count, never on how the visits accumulated, so the
    /// result only grows as the count grows.
    ///
    /// # Example
    ///
    /// ```rust
    /// use visit_engine::BadgeEvaluator;
    ///
    /// let evaluator = BadgeEvaluator::default();
    /// assert!(evaluator.evaluate(2).is_empty());
    /// assert!(evaluator.evaluate(3).contains("explorer-novice"));
    /// ```
    pub fn evaluate(&self, total_visit_count: u32) -> HashSet<String> {
        self.visit_rules()
            .filter(|r| r.is_met(total_visit_count))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Order badge ids for announcement: highest requirement first, so the most
    /// prestigious badge leads. Ties fall back to id. Unknown ids go last.
    pub fn announcement_order(&self, badge_ids: &mut [String]) {
        badge_ids.sort_by(|a, b| {
            let ra = self.rule(a).map(|r| r.requirement);
            let rb = self.rule(b).map(|r| r.requirement);
            rb.cmp(&ra).then_with(|| a.cmp(b))
        });
    }

    /// Sum of bonus points for the given badge ids.
    pub fn bonus_points<'a>(&self, badge_ids: impl IntoIterator<Item = &'a String>) -> u64 {
        badge_ids
            .into_iter()
            .filter_map(|id| self.rule(id))
            .map(|r| r.points)
            .sum()
    }

    /// Display name for a badge, falling back to its id.
    pub fn display_name<'a>(&'a self, badge_id: &'a str) -> &'a str {
        self.rule(badge_id).map(|r| r.name.as_str()).unwrap_or(badge_id)
    }

    /// Progress of every visit-driven badge at `total_visit_count`, in table order.
    pub fn progress(&self, total_visit_count: u32) -> Vec<BadgeProgress> {
        self.visit_rules()
            .map(|r| BadgeProgress {
                badge_id: r.id.clone(),
                name: r.name.clone(),
                current: total_visit_count.min(r.requirement),
                requirement: r.requirement,
                percent: r.progress_percent(total_visit_count),
                unlocked: r.is_met(total_visit_count),
            })
            .collect()
    }
}
