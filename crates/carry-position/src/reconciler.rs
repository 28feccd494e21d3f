//! Background reconciliation sweep.
//!
//! Periodically repairs whatever a crash or venue outage left behind:
//! stale transaction intents, positions stuck in `Closing`, and
//! snapshots that failed to persist. Every repair is idempotent, so an
//! overlap with normal operation is harmless.

use crate::manager::PositionManager;
use carry_core::{ExitReason, PositionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Reconciler {
    manager: Arc<PositionManager>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(manager: Arc<PositionManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run sweeps until cancelled. Startup recovery happens before this
    /// task is spawned, so the immediate first tick is consumed.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "reconciler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One reconciliation pass.
    pub async fn sweep(&self) {
        match self.manager.resolve_stale_intents().await {
            Ok(0) => {}
            Ok(count) => info!(count, "sweep resolved stale intents"),
            Err(e) => warn!(error = %e, "stale intent resolution failed"),
        }

        for position in self.manager.open_positions() {
            if position.status != PositionStatus::Closing {
                continue;
            }
            let reason = position.exit_reason.unwrap_or(ExitReason::Manual);
            info!(
                position = %position.position_id,
                reason = %reason,
                "re-driving interrupted close"
            );
            if let Err(e) = self
                .manager
                .close_position(&position.position_id, reason)
                .await
            {
                warn!(
                    position = %position.position_id,
                    error = %e,
                    "re-driven close failed, will retry next sweep"
                );
            }
        }

        let dirty = self.manager.flush_dirty();
        if dirty > 0 {
            debug!(dirty, "positions still awaiting persistence");
        }
    }
}
