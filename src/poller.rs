//! # Visit Poller
//!
//! Drives the scan-then-commit cycle for one signed-in user.
//!
//! Each tick moves through `Idle -> Scanning -> Committing -> Idle`, or straight
//! back to `Idle` when nothing new is in range. A tick that wakes while another
//! is in flight is skipped, never queued. Failures end the tick and are
//! reported to the host; the next tick recomputes detections from scratch, so
//! a failed commit is simply retried with fresh data.
//!
//! ```text
//! timer / foreground ──> tick ──> position ──> catalog + ledger ──> scan
//!                                                                   │
//!                              notify <── commit_visits <── hits ───┘
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::badges::BadgeEvaluator;
use crate::catalog::LandmarkCatalog;
use crate::error::{PositionError, TickError};
use crate::ledger::{CommitResult, ProgressLedger};
use crate::scanner::{hit_ids, scan};
use crate::store::LedgerStore;
use crate::{Coordinate, EngineConfig};

// ============================================================================
// Collaborators
// ============================================================================

/// Device geolocation.
pub trait PositionSource: Send + Sync {
    fn current_position(&self) -> impl Future<Output = Result<Coordinate, PositionError>> + Send;
}

/// User-facing events. Implement in the host UI.
pub trait VisitNotifier: Send + Sync {
    /// New landmarks were recorded.
    fn on_visits(&self, notification: &VisitNotification);

    /// Location access was refused. Called at most once per poller.
    fn on_permission_denied(&self) {}

    /// A tick failed and will be retried on the next wake.
    fn on_tick_error(&self, _error: &TickError) {}
}

impl<T: PositionSource> PositionSource for Arc<T> {
    fn current_position(&self) -> impl Future<Output = Result<Coordinate, PositionError>> + Send {
        (**self).current_position()
    }
}

impl<T: VisitNotifier> VisitNotifier for Arc<T> {
    fn on_visits(&self, notification: &VisitNotification) {
        (**self).on_visits(notification)
    }

    fn on_permission_denied(&self) {
        (**self).on_permission_denied()
    }

    fn on_tick_error(&self, error: &TickError) {
        (**self).on_tick_error(error)
    }
}

/// What the host shows after a successful commit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct VisitNotification {
    pub new_visit_count: u32,
    pub points_awarded: u64,
    pub badge_points: u64,
    /// Most prestigious first; the first entry is the headline badge
    pub unlocked_badges: Vec<String>,
    /// Display names, parallel to `unlocked_badges`
    pub badge_names: Vec<String>,
}

impl VisitNotification {
    pub fn from_commit(result: &CommitResult, evaluator: &BadgeEvaluator) -> Self {
        Self {
            new_visit_count: result.newly_visited_ids.len() as u32,
            points_awarded: result.points_awarded,
            badge_points: result.badge_points,
            unlocked_badges: result.newly_unlocked_badges.clone(),
            badge_names: result
                .newly_unlocked_badges
                .iter()
                .map(|id| evaluator.display_name(id).to_string())
                .collect(),
        }
    }

    /// Message text for an alert or toast.
    pub fn summary(&self) -> String {
        let plural = if self.new_visit_count == 1 { "" } else { "s" };
        let mut text = format!(
            "You've discovered {} new landmark{}!\n+{} points earned!",
            self.new_visit_count, plural, self.points_awarded
        );
        if !self.badge_names.is_empty() {
            text.push_str(&format!("\nNew badge earned: {}", self.badge_names.join(", ")));
        }
        text
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollerStatus {
    Idle = 0,
    Scanning = 1,
    Committing = 2,
}

impl PollerStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PollerStatus::Scanning,
            2 => PollerStatus::Committing,
            _ => PollerStatus::Idle,
        }
    }
}

/// How a tick ended.
#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick was already in flight.
    Skipped,
    /// The session is ending. No notification was sent; a commit already in
    /// flight when the session ended may still have been recorded.
    Cancelled,
    /// No unvisited landmark in range.
    NoDetections,
    /// New visits were recorded.
    Committed(CommitResult),
    /// Everything detected had already been recorded by another session.
    AlreadyRecorded,
    Failed(TickError),
}

/// Holds the status out of `Idle` for the duration of a tick. Dropping it,
/// including during unwinding or cancellation, returns the poller to `Idle`.
struct StatusGuard<'a> {
    status: &'a AtomicU8,
}

impl<'a> StatusGuard<'a> {
    fn acquire(status: &'a AtomicU8) -> Option<Self> {
        status
            .compare_exchange(
                PollerStatus::Idle as u8,
                PollerStatus::Scanning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { status })
    }

    fn advance(&self, next: PollerStatus) {
        self.status.store(next as u8, Ordering::Release);
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.status.store(PollerStatus::Idle as u8, Ordering::Release);
    }
}

/// Why the poller woke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    Foreground,
}

/// Scan-and-commit loop for one user session.
pub struct VisitPoller<P, C, S, N> {
    user_id: String,
    position: P,
    catalog: C,
    ledger: ProgressLedger<S>,
    notifier: N,
    config: EngineConfig,
    status: AtomicU8,
    stopping: Arc<AtomicBool>,
    permission_prompted: AtomicBool,
}

impl<P, C, S, N> VisitPoller<P, C, S, N>
where
    P: PositionSource,
    C: LandmarkCatalog,
    S: LedgerStore,
    N: VisitNotifier,
{
    pub fn new(
        user_id: impl Into<String>,
        position: P,
        catalog: C,
        ledger: ProgressLedger<S>,
        notifier: N,
        config: EngineConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            position,
            catalog,
            ledger,
            notifier,
            config,
            status: AtomicU8::new(PollerStatus::Idle as u8),
            stopping: Arc::new(AtomicBool::new(false)),
            permission_prompted: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn ledger(&self) -> &ProgressLedger<S> {
        &self.ledger
    }

    pub fn status(&self) -> PollerStatus {
        PollerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Run one scan-then-maybe-commit cycle.
    ///
    /// Never fails: errors are reported to the notifier and returned as
    /// [`TickOutcome::Failed`]. Returns [`TickOutcome::Skipped`] without doing
    /// anything if a tick is already running.
    pub async fn tick(&self) -> TickOutcome {
        if self.is_stopping() {
            return TickOutcome::Cancelled;
        }

        let Some(guard) = StatusGuard::acquire(&self.status) else {
            debug!("[VisitPoller] {} tick skipped, previous tick still running", self.user_id);
            return TickOutcome::Skipped;
        };

        match self.run_tick(&guard).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report_error(&e);
                TickOutcome::Failed(e)
            }
        }
    }

    async fn run_tick(&self, guard: &StatusGuard<'_>) -> Result<TickOutcome, TickError> {
        let timeout = self.config.position_timeout();
        let position = match tokio::time::timeout(timeout, self.position.current_position()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PositionError::PositionUnavailable(format!("no fix within {:?}", timeout)).into())
            }
        };

        let catalog = self.catalog.list_landmarks().await?;
        let ledger = self.ledger.load(&self.user_id).await?;

        let hits = scan(&position, &catalog, &ledger.visited_set(), self.config.visit_radius_meters);
        debug!(
            "[VisitPoller] {} at ({:.6}, {:.6}): {} of {} landmarks in range",
            self.user_id,
            position.latitude,
            position.longitude,
            hits.len(),
            catalog.len()
        );
        if hits.is_empty() {
            return Ok(TickOutcome::NoDetections);
        }

        if self.is_stopping() {
            info!("[VisitPoller] {} session ending, dropping {} detections", self.user_id, hits.len());
            return Ok(TickOutcome::Cancelled);
        }

        guard.advance(PollerStatus::Committing);
        let result = self.ledger.commit_visits(&self.user_id, &hit_ids(&hits)).await?;

        if result.is_empty() {
            return Ok(TickOutcome::AlreadyRecorded);
        }
        if self.is_stopping() {
            info!(
                "[VisitPoller] {} session ended during commit, {} visits recorded without notice",
                self.user_id,
                result.newly_visited_ids.len()
            );
            return Ok(TickOutcome::Cancelled);
        }

        let notification = VisitNotification::from_commit(&result, self.ledger.evaluator());
        self.notifier.on_visits(&notification);
        Ok(TickOutcome::Committed(result))
    }

    fn report_error(&self, err: &TickError) {
        match err {
            TickError::Position(PositionError::PermissionDenied) => {
                if !self.permission_prompted.swap(true, Ordering::AcqRel) {
                    warn!("[VisitPoller] {} location permission denied", self.user_id);
                    self.notifier.on_permission_denied();
                } else {
                    debug!("[VisitPoller] {} location permission still denied", self.user_id);
                }
            }
            _ => {
                warn!("[VisitPoller] {} tick failed: {}", self.user_id, err);
                self.notifier.on_tick_error(err);
            }
        }
    }
}

impl<P, C, S, N> VisitPoller<P, C, S, N>
where
    P: PositionSource + 'static,
    C: LandmarkCatalog + 'static,
    S: LedgerStore + 'static,
    N: VisitNotifier + 'static,
{
    /// Start ticking on the poll interval (first tick immediately) and on
    /// foreground events delivered through the returned handle.
    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (wake_tx, mut wake_rx) = mpsc::channel::<WakeReason>(1);
        let stopping = Arc::clone(&self.stopping);
        let grace = self.config.shutdown_grace();
        let period = self.config.poll_interval();

        let task = tokio::spawn(async move {
            info!("[VisitPoller] Started for {} (every {:?})", self.user_id, period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let reason = tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    Some(reason) = wake_rx.recv() => reason,
                    _ = interval.tick() => WakeReason::Timer,
                };
                debug!("[VisitPoller] {} woke: {:?}", self.user_id, reason);

                if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                    let msg = panic_message(panic.as_ref());
                    error!("[VisitPoller] {} tick panicked: {}", self.user_id, msg);
                    self.notifier.on_tick_error(&TickError::Panicked(msg));
                }

                // Wake-ups that arrived mid-tick are dropped, not queued
                while wake_rx.try_recv().is_ok() {}
            }

            info!("[VisitPoller] Stopped for {}", self.user_id);
        });

        PollerHandle {
            shutdown: shutdown_tx,
            wake: wake_tx,
            stopping,
            task,
            grace,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Controls a spawned poller. Dropping the handle also stops the loop, but
/// without waiting for an in-flight tick.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    wake: mpsc::Sender<WakeReason>,
    stopping: Arc<AtomicBool>,
    task: JoinHandle<()>,
    grace: Duration,
}

impl PollerHandle {
    /// The app came to the foreground: tick now unless a tick is running or
    /// already pending.
    pub fn notify_foreground(&self) {
        if self.wake.try_send(WakeReason::Foreground).is_err() {
            debug!("[VisitPoller] Foreground wake dropped, one already pending");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// End the session. An in-flight tick is allowed to finish for up to the
    /// shutdown grace period, after which it is abandoned. Once stopping is
    /// observed a tick starts no commit, and a commit already running lands
    /// without notifying. Returns `true` on a clean stop.
    pub async fn stop(self) -> bool {
        self.stopping.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);

        let mut task = self.task;
        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("[VisitPoller] Poller task failed: {}", e);
                false
            }
            Err(_) => {
                warn!("[VisitPoller] In-flight tick exceeded {:?}, abandoning it", self.grace);
                task.abort();
                false
            }
        }
    }
}
