//! Retention sweeper.
//!
//! [`sweep`] deletes expired rows from each expiring tier in turn. A failing
//! tier is logged and skipped; the next cycle retries it. Deletes are
//! idempotent, so a second sweep at the same instant removes nothing.
//!
//! [`RetentionSweeper::spawn`] runs sweeps on a timer inside a supervised tokio
//! task. If a cycle panics, the supervisor waits `restart_backoff_secs` and
//! starts a fresh worker.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::RetentionConfig;
use crate::db::Database;
use crate::error::Result;
use crate::memory::audit::{self, AuditEvent, AuditOperation, AuditOutcome, SWEEPER_IDENTITY};
use crate::memory::store;
use crate::memory::types::{now_timestamp, Tier};

/// Outcome for one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierSweep {
    pub tier: Tier,
    /// Rows past expiry when the tier was visited.
    pub eligible: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub swept_at: String,
    pub tiers: Vec<TierSweep>,
    pub total_deleted: usize,
}

impl SweepReport {
    pub fn has_failures(&self) -> bool {
        self.tiers.iter().any(|t| t.error.is_some())
    }

    pub fn deleted_in(&self, tier: Tier) -> usize {
        self.tiers
            .iter()
            .find(|t| t.tier == tier)
            .map(|t| t.deleted)
            .unwrap_or(0)
    }
}

/// Count and delete one tier's expired rows in a single transaction, so the
/// reported `eligible` and `deleted` describe the same set of rows.
fn sweep_tier(conn: &Connection, tier: Tier, now: &str, dry_run: bool) -> Result<(usize, usize)> {
    let behavior = if dry_run {
        TransactionBehavior::Deferred
    } else {
        TransactionBehavior::Immediate
    };
    let tx = Transaction::new_unchecked(conn, behavior)?;
    let eligible = store::count_expired(&tx, tier, now)?;
    let deleted = if dry_run {
        0
    } else {
        store::delete_expired(&tx, tier, now)?
    };
    tx.commit()?;
    Ok((eligible, deleted))
}

/// Sweep every expiring tier at `now`. `actor` is recorded in the audit log.
pub fn sweep(conn: &Connection, now: &str, dry_run: bool, actor: &str) -> SweepReport {
    let mut tiers = Vec::with_capacity(Tier::EXPIRING.len());

    for tier in Tier::EXPIRING {
        match sweep_tier(conn, tier, now, dry_run) {
            Ok((eligible, deleted)) => {
                if deleted > 0 {
                    tracing::info!(tier = %tier, deleted, "expired memories swept");
                }
                tiers.push(TierSweep {
                    tier,
                    eligible,
                    deleted,
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!(tier = %tier, error = %e, "sweep failed for tier; continuing");
                tiers.push(TierSweep {
                    tier,
                    eligible: 0,
                    deleted: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let report = SweepReport {
        dry_run,
        swept_at: now.to_string(),
        total_deleted: tiers.iter().map(|t| t.deleted).sum(),
        tiers,
    };

    if !dry_run {
        let outcome = if report.has_failures() {
            AuditOutcome::Failed
        } else {
            AuditOutcome::Success
        };
        let details = serde_json::to_value(&report.tiers).unwrap_or(serde_json::Value::Null);
        audit::record_best_effort(
            conn,
            &AuditEvent::success(AuditOperation::Sweep, actor)
                .outcome(outcome)
                .details(details),
        );
    }

    report
}

// ── Supervised task ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweeperState {
    Idle,
    Sweeping,
    Stopped,
}

impl SweeperState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Sweeping,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Sweeping => 1,
            Self::Stopped => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweeperStatus {
    pub state: SweeperState,
    pub cycles: u64,
    pub failures: u64,
    pub restarts: u64,
    pub last_deleted: u64,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    cycles: AtomicU64,
    failures: AtomicU64,
    restarts: AtomicU64,
    last_deleted: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SweeperState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// One sweep cycle against the database. Swappable so the supervisor can be
/// exercised with failing cycles.
pub type SweepCycle = Arc<dyn Fn(&Database) -> SweepReport + Send + Sync>;

/// The production cycle: sweep through the writer connection as the sweeper identity.
pub fn default_cycle() -> SweepCycle {
    Arc::new(|db: &Database| {
        let conn = db.writer();
        sweep(&conn, &now_timestamp(), false, SWEEPER_IDENTITY)
    })
}

#[derive(Debug, Clone)]
pub struct SweeperTiming {
    pub interval: Duration,
    pub restart_backoff: Duration,
}

impl SweeperTiming {
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            restart_backoff: Duration::from_secs(config.restart_backoff_secs),
        }
    }
}

pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Start the sweeper with the production cycle.
    pub fn spawn(db: Database, config: &RetentionConfig) -> SweeperHandle {
        Self::spawn_with(db, SweeperTiming::from_config(config), default_cycle())
    }

    pub fn spawn_with(db: Database, timing: SweeperTiming, cycle: SweepCycle) -> SweeperHandle {
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let restart = Arc::new(Notify::new());

        let supervisor = tokio::spawn(supervise(
            db,
            Arc::clone(&shared),
            timing.clone(),
            cycle,
            shutdown_rx,
            Arc::clone(&restart),
        ));

        tracing::info!(
            interval_secs = timing.interval.as_secs_f64(),
            "retention sweeper started"
        );

        SweeperHandle {
            shared,
            shutdown_tx,
            restart,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }
}

/// Control and status for a running sweeper.
pub struct SweeperHandle {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    restart: Arc<Notify>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SweeperHandle {
    pub fn state(&self) -> SweeperState {
        SweeperState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> SweeperStatus {
        SweeperStatus {
            state: self.state(),
            cycles: self.shared.cycles.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
            restarts: self.shared.restarts.load(Ordering::SeqCst),
            last_deleted: self.shared.last_deleted.load(Ordering::SeqCst),
        }
    }

    /// Replace the current worker with a fresh one, without backoff.
    pub fn restart(&self) {
        self.restart.notify_one();
    }

    /// Stop the sweeper and wait for the supervisor to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sweeper supervisor ended abnormally");
            }
        }
        self.shared.set_state(SweeperState::Stopped);
        tracing::info!("retention sweeper stopped");
    }
}

async fn supervise(
    db: Database,
    shared: Arc<Shared>,
    timing: SweeperTiming,
    cycle: SweepCycle,
    mut shutdown_rx: watch::Receiver<bool>,
    restart: Arc<Notify>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        shared.set_state(SweeperState::Idle);

        let mut worker = tokio::spawn(run_worker(
            db.clone(),
            Arc::clone(&shared),
            timing.interval,
            Arc::clone(&cycle),
            shutdown_rx.clone(),
        ));

        let backoff = tokio::select! {
            result = &mut worker => match result {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    shared.failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(
                        backoff_secs = timing.restart_backoff.as_secs_f64(),
                        "sweeper worker panicked; restarting after backoff"
                    );
                    true
                }
                Err(_) => break,
            },
            _ = restart.notified() => {
                worker.abort();
                let _ = worker.await;
                tracing::info!("sweeper worker restarted on request");
                false
            }
        };

        shared.restarts.fetch_add(1, Ordering::SeqCst);

        if backoff {
            tokio::select! {
                _ = tokio::time::sleep(timing.restart_backoff) => {}
                _ = shutdown_rx.changed() => break,
            }
        }
    }
    shared.set_state(SweeperState::Stopped);
}

async fn run_worker(
    db: Database,
    shared: Arc<Shared>,
    interval: Duration,
    cycle: SweepCycle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        shared.set_state(SweeperState::Sweeping);
        let db = db.clone();
        let cycle = Arc::clone(&cycle);
        let result = tokio::task::spawn_blocking(move || cycle(&db)).await;
        shared.set_state(SweeperState::Idle);

        match result {
            Ok(report) => {
                shared.cycles.fetch_add(1, Ordering::SeqCst);
                shared
                    .last_deleted
                    .store(report.total_deleted as u64, Ordering::SeqCst);
                if report.has_failures() {
                    shared.failures.fetch_add(1, Ordering::SeqCst);
                }
                tracing::debug!(deleted = report.total_deleted, "sweep cycle complete");
            }
            // A panicking cycle takes the worker down with it; the supervisor restarts it.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::warn!(error = %e, "sweep cycle cancelled");
                return;
            }
        }
    }
}
