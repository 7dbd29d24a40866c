//! Overlap guard: at most one sweep at a time, across the timer and external
//! triggers alike.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use updater_core::{OverlapPolicy, SweepReport, SweepRequest, SweepStatus};

use crate::engine::UpdateEngine;
use crate::error::SweepError;

pub struct SweepGuard {
    engine: UpdateEngine,
    permit: Mutex<()>,
    policy: OverlapPolicy,
}

impl SweepGuard {
    /// Guard `engine` using the overlap policy from its configuration.
    pub fn new(engine: UpdateEngine) -> Self {
        let policy = engine.config().overlap_policy;
        Self {
            engine,
            permit: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Run one sweep over services whose image starts with one of `images`
    /// (all eligible services when empty).
    ///
    /// Under [`OverlapPolicy::Wait`] a concurrent call queues behind the
    /// running sweep; a cancellation while queued returns an empty cancelled
    /// report. Under [`OverlapPolicy::Reject`] it fails with
    /// [`SweepError::Busy`].
    pub async fn trigger_sweep(
        &self,
        images: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, SweepError> {
        let _permit = match self.policy {
            OverlapPolicy::Reject => self.permit.try_lock().map_err(|_| SweepError::Busy)?,
            OverlapPolicy::Wait => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(cancelled_before_start()),
                    permit = self.permit.lock() => permit,
                }
            }
        };

        let request = SweepRequest { images };
        tracing::debug!(images = ?request.images, "sweep started");
        let report = self.engine.run(&request, cancel).await?;
        tracing::info!(
            status = ?report.status,
            updated = report.updated(),
            current = report.current(),
            skipped = report.skipped(),
            failed = report.failed(),
            "sweep finished",
        );
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        self.permit.try_lock().is_err()
    }

    /// Wait until no sweep is running.
    pub async fn wait_idle(&self) {
        drop(self.permit.lock().await);
    }
}

fn cancelled_before_start() -> SweepReport {
    let now = chrono::Utc::now();
    SweepReport {
        status: SweepStatus::Cancelled,
        started_at: now,
        finished_at: now,
        services: Vec::new(),
    }
}
