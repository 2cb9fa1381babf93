//! Automatic resolution sweeper
//!
//! Periodic task that force-completes confirmed advisories whose window
//! elapsed more than the grace period ago, releasing their escrow through
//! the engine's own finalize path. One advisory failing never aborts the
//! rest of the sweep.

use crate::engine::{Actor, BookingEngine};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub examined: usize,
    pub finalized: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

pub struct ResolutionSweeper {
    engine: Arc<BookingEngine>,
    interval: Duration,
    grace: chrono::Duration,
}

impl ResolutionSweeper {
    pub fn new(engine: Arc<BookingEngine>, interval: Duration, grace: chrono::Duration) -> Self {
        Self {
            engine,
            interval,
            grace,
        }
    }

    /// Build with the cadence and grace window from the engine's config
    pub fn from_config(engine: Arc<BookingEngine>) -> Self {
        let interval = Duration::from_secs(engine.config().sweep_interval_secs);
        let grace = chrono::Duration::hours(engine.config().sweep_grace_hours);
        Self::new(engine, interval, grace)
    }

    /// One pass over the stale candidates. Each advisory is processed
    /// independently; failures are reported, not thrown.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let candidates = self.engine.stale_confirmed(self.grace).await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        debug!(candidates = report.examined, "sweep pass starting");

        for advisory in candidates {
            match self
                .engine
                .finalize_advisory(advisory.advisory_id, Actor::System)
                .await
            {
                Ok(_) => {
                    info!(
                        advisory_id = ?advisory.advisory_id,
                        code = %advisory.code,
                        "stale advisory force-completed"
                    );
                    report.finalized.push(advisory.advisory_id);
                }
                Err(e) => {
                    warn!(
                        advisory_id = ?advisory.advisory_id,
                        error = %e,
                        "sweep finalize failed; continuing"
                    );
                    report.failed.push((advisory.advisory_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Spawn the periodic loop. Owned by the composition root; abort the
    /// handle to stop sweeping.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The immediate first tick would sweep at startup; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.sweep_once().await {
                    Ok(report) => {
                        if !report.finalized.is_empty() || !report.failed.is_empty() {
                            info!(
                                finalized = report.finalized.len(),
                                failed = report.failed.len(),
                                "sweep pass completed"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "sweep pass failed"),
                }
            }
        })
    }
}
