//! Simulated walk through Ipil past the preset landmarks.
//!
//! Run with: cargo run --example walk_simulation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use visit_engine::catalog::preset_landmarks;
use visit_engine::geo_utils::{distance_meters, offset_meters};
use visit_engine::{
    rank_leaderboard, BadgeEvaluator, Contender, Coordinate, EngineConfig, LedgerStore, MemoryLedgerStore,
    PositionError, PositionSource, ProgressLedger, StaticCatalog, SubmittedLandmark, ModerationStatus,
    VisitNotification, VisitNotifier, VisitPoller,
};

/// Replays a fixed route, one waypoint per position request.
struct Walk {
    route: Vec<Coordinate>,
    step: AtomicUsize,
}

impl PositionSource for Walk {
    async fn current_position(&self) -> Result<Coordinate, PositionError> {
        let i = self.step.fetch_add(1, Ordering::SeqCst);
        self.route
            .get(i.min(self.route.len().saturating_sub(1)))
            .copied()
            .ok_or_else(|| PositionError::PositionUnavailable("empty route".to_string()))
    }
}

struct Console;

impl VisitNotifier for Console {
    fn on_visits(&self, notification: &VisitNotification) {
        println!("  >> {}", notification.summary().replace('\n', " | "));
    }

    fn on_permission_denied(&self) {
        println!("  >> Location permission is required to track visits.");
    }
}

#[tokio::main]
async fn main() {
    let presets = preset_landmarks();

    // One approved user submission a little north of the sanctuary
    let plaza = SubmittedLandmark {
        id: "town-plaza".to_string(),
        name: "Town Plaza".to_string(),
        location: offset_meters(&presets[2].location, 150.0, 0.0),
        status: ModerationStatus::Approved,
        user_id: "contributor-7".to_string(),
    };
    let catalog = StaticCatalog::with_submissions(&[plaza.clone()]);

    // Start at the market, walk to the hall, then on to the sanctuary and plaza
    let route = vec![
        offset_meters(&presets[1].location, 0.0, -400.0),
        offset_meters(&presets[1].location, 20.0, 0.0),
        offset_meters(&presets[0].location, -30.0, 0.0),
        offset_meters(&presets[0].location, 60.0, 60.0),
        offset_meters(&plaza.location, -10.0, 0.0),
    ];

    println!("Visit Engine Walk Simulation\n");
    for (i, p) in route.iter().enumerate() {
        let nearest = presets
            .iter()
            .map(|l| (l.name.as_str(), distance_meters(p, &l.location)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((name, d)) = nearest {
            println!("Waypoint {}: {:.0}m from {}", i + 1, d, name);
        }
    }
    println!();

    let config = EngineConfig {
        poll_interval_ms: 200,
        ..EngineConfig::default()
    };
    let store = Arc::new(MemoryLedgerStore::new());
    let ledger = ProgressLedger::new(store.clone(), BadgeEvaluator::default(), &config);
    let walk = Walk { route, step: AtomicUsize::new(0) };

    let poller = Arc::new(VisitPoller::new("walker", walk, catalog, ledger, Console, config));
    let handle = Arc::clone(&poller).spawn();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    handle.notify_foreground();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let clean = handle.stop().await;
    println!("\nPoller stopped cleanly: {}", clean);

    let walker = match store.read("walker").await {
        Ok(Some(doc)) => doc.value,
        Ok(None) => {
            println!("No ledger written");
            return;
        }
        Err(e) => {
            println!("Failed to read ledger: {}", e);
            return;
        }
    };

    println!("Points: {} (monthly {})", walker.points, walker.monthly_points);
    println!("Visited: {:?}", walker.visited_landmarks);
    println!("Badges: {:?}", walker.earned_badges);

    for progress in poller.ledger().evaluator().progress(walker.visit_count()) {
        println!(
            "  {:<16} {:>3}/{:<3} {:>5.1}%{}",
            progress.name,
            progress.current,
            progress.requirement,
            progress.percent,
            if progress.unlocked { "  unlocked" } else { "" }
        );
    }

    let rival = visit_engine::LedgerState { monthly_points: 120, ..Default::default() };
    if let Err(e) = store.insert("rival", &rival) {
        println!("Failed to seed rival: {}", e);
        return;
    }
    let everyone = match store.all_ledgers() {
        Ok(all) => all,
        Err(e) => {
            println!("Failed to list ledgers: {}", e);
            return;
        }
    };
    let contenders: Vec<Contender<'_>> = everyone
        .iter()
        .map(|(id, state)| Contender {
            user_id: id,
            username: (id == "walker").then_some("Walker"),
            ledger: state,
        })
        .collect();
    let board = rank_leaderboard(&contenders, visit_engine::leaderboard::DEFAULT_LEADERBOARD_SIZE);
    println!("\nLeaderboard");
    for entry in board {
        println!("  #{} {:<10} {:>5} pts  {} badges", entry.rank, entry.username, entry.points, entry.badges);
    }
}
