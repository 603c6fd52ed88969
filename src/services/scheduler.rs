//! Periodic background jobs: POS stock sync and stale-order sweep.
//!
//! Each job runs on its own `tokio::time::interval`. A tick that arrives while
//! a run is still going is skipped rather than queued. Shutdown is observed
//! only while waiting for a tick, so a run is never cancelled part-way.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::services::cleanup::CleanupService;
use crate::services::inventory_sync::InventorySyncService;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Zero disables the job.
    pub stock_sync_interval: Duration,
    pub stale_sweep_interval: Duration,
    pub stale_order_days: i64,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            stock_sync_interval: Duration::from_secs(cfg.stock_sync_interval_secs),
            stale_sweep_interval: Duration::from_secs(cfg.stale_sweep_interval_secs),
            stale_order_days: i64::from(cfg.stale_order_days),
        }
    }
}

#[derive(Debug)]
pub struct SchedulerHandles {
    shutdown: CancellationToken,
    pub stock_sync: Option<JoinHandle<()>>,
    pub stale_sweep: Option<JoinHandle<()>>,
}

impl SchedulerHandles {
    /// Stops both loops at their next wait and lets a run in progress finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in [self.stock_sync, self.stale_sweep].into_iter().flatten() {
            if let Err(e) = handle.await {
                error!(error = %e, "background job ended abnormally");
            }
        }
    }
}

/// Waits for the next tick. `false` once shutdown has been requested.
async fn next_tick(interval: &mut Interval, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = interval.tick() => true,
        _ = shutdown.cancelled() => false,
    }
}

fn ticker(every: Duration) -> Interval {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

pub async fn run_stock_sync(
    sync: InventorySyncService,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "starting periodic stock sync");
    let mut interval = ticker(every);
    while next_tick(&mut interval, &shutdown).await {
        match sync.sync_stock().await {
            Ok(report) => info!(
                updated = report.updated,
                created = report.created,
                "scheduled stock sync complete"
            ),
            Err(e) => error!(error = %e, "scheduled stock sync failed"),
        }
    }
    info!("periodic stock sync stopped");
}

pub async fn run_stale_sweep(
    cleanup: CleanupService,
    every: Duration,
    days: i64,
    shutdown: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), days, "starting stale order sweep");
    let mut interval = ticker(every);
    while next_tick(&mut interval, &shutdown).await {
        match cleanup.sweep_stale(days).await {
            Ok(report) => info!(deleted = report.orders_deleted, "scheduled sweep complete"),
            Err(e) => error!(error = %e, "scheduled sweep failed"),
        }
    }
    info!("stale order sweep stopped");
}

/// Spawns the enabled jobs onto the current runtime.
pub fn spawn(
    config: SchedulerConfig,
    sync: InventorySyncService,
    cleanup: CleanupService,
) -> SchedulerHandles {
    let shutdown = CancellationToken::new();
    let stock_sync = (!config.stock_sync_interval.is_zero()).then(|| {
        tokio::spawn(run_stock_sync(
            sync,
            config.stock_sync_interval,
            shutdown.child_token(),
        ))
    });
    let stale_sweep = (!config.stale_sweep_interval.is_zero()).then(|| {
        tokio::spawn(run_stale_sweep(
            cleanup,
            config.stale_sweep_interval,
            config.stale_order_days,
            shutdown.child_token(),
        ))
    });
    if stock_sync.is_none() {
        info!("periodic stock sync disabled");
    }
    if stale_sweep.is_none() {
        info!("stale order sweep disabled");
    }
    SchedulerHandles {
        shutdown,
        stock_sync,
        stale_sweep,
    }
}
