//! Monthly leaderboard built from ledger states.

use crate::ledger::LedgerState;

/// Number of entries shown on the leaderboard.
pub const DEFAULT_LEADERBOARD_SIZE: usize = 10;

/// One ranked row.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    /// Points earned this month
    pub points: u64,
    pub badges: u32,
    /// 1-based
    pub rank: u32,
}

/// A user's ledger plus the profile name shown next to it.
#[derive(Debug, Clone)]
pub struct Contender<'a> {
    pub user_id: &'a str,
    pub username: Option<&'a str>,
    pub ledger: &'a LedgerState,
}

/// Rank users by monthly points, highest first, keeping the top `limit`.
///
/// Ties are broken by user id so the ordering is stable between refreshes.
pub fn rank_leaderboard(contenders: &[Contender<'_>], limit: usize) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&Contender<'_>> = contenders.iter().collect();
    sorted.sort_by(|a, b| {
        b.ledger
            .monthly_points
            .cmp(&a.ledger.monthly_points)
            .then_with(|| a.user_id.cmp(b.user_id))
    });

    sorted
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, c)| LeaderboardEntry {
            user_id: c.user_id.to_string(),
            username: c.username.unwrap_or("Anonymous").to_string(),
            points: c.ledger.monthly_points,
            badges: c.ledger.earned_badges.len() as u32,
            rank: i as u32 + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(monthly_points: u64, badges: usize) -> LedgerState {
        LedgerState {
            monthly_points,
            points: monthly_points * 2,
            earned_badges: (0..badges).map(|i| format!("b{}", i)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ranks_by_monthly_points() {
        let (a, b, c) = (ledger(100, 1), ledger(300, 2), ledger(200, 0));
        let contenders = vec![
            Contender { user_id: "a", username: Some("Ana"), ledger: &a },
            Contender { user_id: "b", username: None, ledger: &b },
            Contender { user_id: "c", username: Some("Cy"), ledger: &c },
        ];

        let board = rank_leaderboard(&contenders, DEFAULT_LEADERBOARD_SIZE);
        let order: Vec<&str> = board.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(board[0].username, "Anonymous");
        assert_eq!(board[0].points, 300);
        assert_eq!(board[0].badges, 2);
        assert_eq!(board.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_limit_and_ties() {
        let same = ledger(50, 0);
        let contenders: Vec<Contender<'_>> = ["z", "m", "a"]
            .into_iter()
            .map(|id| Contender { user_id: id, username: None, ledger: &same })
            .collect();

        let board = rank_leaderboard(&contenders, 2);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, "a");
        assert_eq!(board[1].user_id, "m");
    }
}
