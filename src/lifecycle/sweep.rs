//! Maintenance sweep
//!
//! One background task owned by the engine discards timed-out upload
//! sessions and evicts stale copies from ephemeral tiers. Each interval
//! gets bounded random jitter so sweeps from several instances don't line
//! up against live traffic. The task is created at engine start and
//! cancelled promptly at shutdown.

use crate::storage::ShareBackend;
use crate::upload::SessionTable;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info};

/// What one sweep pass cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Upload sessions discarded for missing their deadline
    pub sessions_discarded: usize,
    /// Cache entries evicted across ephemeral tiers
    pub cache_evicted: usize,
}

/// Periodic cleanup task for sessions and ephemeral tiers
pub struct MaintenanceSweeper {
    sessions: Arc<SessionTable>,
    tiers: Vec<Arc<dyn ShareBackend>>,
    interval: Duration,
    max_jitter: Duration,
    shutdown: Arc<Notify>,
}

impl MaintenanceSweeper {
    /// Create a sweeper over the session table and storage tiers
    pub fn new(
        sessions: Arc<SessionTable>,
        tiers: Vec<Arc<dyn ShareBackend>>,
        interval: Duration,
        max_jitter: Duration,
    ) -> Self {
        MaintenanceSweeper {
            sessions,
            tiers,
            interval,
            max_jitter,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting shutdown from elsewhere
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is requested
    ///
    /// Spawn this on the runtime; it yields between passes and reacts to
    /// the shutdown notification immediately, even mid-sleep.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Maintenance sweeper started"
        );

        loop {
            let pause = self.interval + self.jitter();

            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.shutdown.notified() => {
                    info!("Maintenance sweeper stopped");
                    return;
                }
            }

            let report = self.sweep_once();
            if report != SweepReport::default() {
                debug!(
                    sessions = report.sessions_discarded,
                    cache = report.cache_evicted,
                    "Sweep pass finished"
                );
            }
        }
    }

    /// One synchronous sweep pass
    pub fn sweep_once(&self) -> SweepReport {
        let now = Utc::now();

        let sessions_discarded = self.sessions.sweep(now);
        let cache_evicted = self.tiers.iter().map(|tier| tier.sweep(now)).sum();

        SweepReport {
            sessions_discarded,
            cache_evicted,
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
