//! Background certificate renewal
//!
//! Runs a renewal sweep shortly after startup and then once a day. Sweeps go
//! through the reconciler's pass mutex, so they coalesce naturally with
//! event-driven reconciliations. Not cron-aligned; wall-clock drift across
//! restarts is fine because sweeps are idempotent.

use std::sync::Arc;
use std::time::Duration;

use crate::defaults;
use crate::reconciler::Reconciler;

pub struct RenewalScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    startup_grace: Duration,
}

impl RenewalScheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            startup_grace: defaults::RENEWAL_STARTUP_GRACE,
        }
    }

    /// Override the startup grace period.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Scheduler loop; runs until the task is aborted at shutdown.
    pub async fn run(self) {
        tracing::info!(
            interval_hours = self.interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        tokio::time::sleep(self.startup_grace).await;

        loop {
            match self.reconciler.reconcile_renewal().await {
                Ok(outcome) => {
                    if outcome.issued.is_empty() && outcome.failed.is_empty() {
                        tracing::debug!("No certificates due for renewal");
                    } else {
                        tracing::info!(
                            renewed = outcome.issued.len(),
                            failed = outcome.failed.len(),
                            "Renewal sweep finished"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Renewal sweep failed");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
