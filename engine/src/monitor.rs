//! Periodic lifecycle maintenance.
//!
//! On each tick the monitor runs three independent sweeps: archival of
//! aged completed tasks, compaction of long-retired archives, and
//! deadlock detection. A failing sweep is logged and the others still
//! run; only cancellation stops a tick early.

use std::time::Duration;

use cadre_core::error::Result;
use tokio_util::sync::CancellationToken;

use crate::{archive::ArchivalEngine, deadlock::{DeadlockDetector, DeadlockReport}};

/// Sweep thresholds and cadence.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Seconds between ticks
    pub interval: Duration,
    /// Completed tasks older than this many days are archived
    pub archive_after_days: i64,
    /// Archived tasks completed longer ago than this are compacted
    pub compress_after_days: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            archive_after_days: 7,
            compress_after_days: 90,
        }
    }
}

/// Outcome of a single tick. A `None` field means that sweep failed and
/// was skipped; details are in the log.
#[derive(Debug, Default)]
pub struct MonitorReport {
    pub archived: Option<usize>,
    pub compressed: Option<usize>,
    pub deadlocks: Option<DeadlockReport>,
}

/// Cooperative periodic driver for the archival and deadlock sweeps.
pub struct LifecycleMonitor {
    archival: ArchivalEngine,
    detector: DeadlockDetector,
    settings: MonitorSettings,
}

impl LifecycleMonitor {
    pub fn new(
        archival: ArchivalEngine,
        detector: DeadlockDetector,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            archival,
            detector,
            settings,
        }
    }

    /// Run one maintenance pass. Sub-step failures are isolated; only
    /// cancellation aborts the pass.
    pub async fn run_once(&self, ct: &CancellationToken) -> Result<MonitorReport> {
        let mut report = MonitorReport::default();

        match self
            .archival
            .archive_old(self.settings.archive_after_days, ct)
            .await
        {
            Ok(count) => report.archived = Some(count),
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => tracing::error!(error = %err, "archival sweep failed"),
        }

        match self
            .archival
            .compress_old(self.settings.compress_after_days, ct)
            .await
        {
            Ok(count) => report.compressed = Some(count),
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => tracing::error!(error = %err, "compaction sweep failed"),
        }

        match self.detector.sweep(ct).await {
            Ok(deadlocks) => report.deadlocks = Some(deadlocks),
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => tracing::error!(error = %err, "deadlock sweep failed"),
        }

        Ok(report)
    }

    /// Current sweep settings.
    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Tick until the token is cancelled.
    pub async fn run(&self, ct: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    tracing::info!("lifecycle monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once(&ct).await {
                        Ok(report) => tracing::debug!(?report, "monitor tick finished"),
                        Err(err) => {
                            tracing::info!(error = %err, "monitor tick interrupted");
                            break;
                        }
                    }
                }
            }
        }
    }
}
