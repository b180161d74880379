//! Periodic network sync and local poll
//!
//! Two independent timers drive the orchestrator:
//!
//! - network sync (default 500 ms): each tick spawns one sync cycle unless
//!   the previous one is still running. Late ticks are skipped, never queued.
//! - local poll (default 1000 ms): a change-detection pass, unconditionally.
//!
//! Stopping the scheduler stops both timers. A sync cycle that is already
//! running finishes on its own.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::orchestrator::Orchestrator;

pub struct SyncScheduler {
    sync_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start both timers. The first tick of each fires one period from now.
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> Self {
        let sync_period = orchestrator.config().sync_interval();
        let poll_period = orchestrator.config().poll_interval();
        info!(?sync_period, ?poll_period, "Starting sync scheduler");

        let orch = Arc::clone(&orchestrator);
        let sync_task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + sync_period, sync_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if orch.sync_in_flight() {
                    debug!("Previous sync still running, skipping tick");
                    continue;
                }
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    orch.run_sync_cycle().await;
                });
            }
        });

        let orch = orchestrator;
        let poll_task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + poll_period, poll_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                orch.run_poll_cycle().await;
            }
        });

        Self {
            sync_task,
            poll_task,
        }
    }

    /// Stop both timers
    pub fn stop(&self) {
        self.sync_task.abort();
        self.poll_task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.sync_task.is_finished() || !self.poll_task.is_finished()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
