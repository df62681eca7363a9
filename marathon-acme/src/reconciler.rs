//! Certificate reconciliation
//!
//! One pass computes `desired \ installed` from Marathon state and the
//! certificate store, drives issuance for the difference one domain at a
//! time, and signals marathon-lb when anything was installed. Passes are
//! serialised by a single mutex; triggers arriving while a pass runs coalesce
//! into at most one follow-up pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::acme::{CertIssuer, IssueError};
use crate::domains;
use crate::lb::LbClient;
use crate::marathon::{MarathonClient, MarathonError};
use crate::store::{CertStore, StoreError};

/// Handle for requesting a reconciliation pass.
///
/// Backed by a one-slot channel: while a pass is running, the first trigger
/// occupies the slot and guarantees a follow-up pass; further triggers are
/// dropped. This keeps memory constant under event storms while still
/// running at least one pass after the last trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

impl Trigger {
    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Create a trigger and the receiver the reconciler worker drains.
pub fn trigger_channel() -> (Trigger, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, rx)
}

/// Pass-level failures. Per-domain issuance failures never surface here;
/// they are collected in the [`Outcome`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("orchestrator unavailable: {0}")]
    Orchestrator(#[from] MarathonError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// What one reconciliation pass did.
#[derive(Debug, Default)]
pub struct Outcome {
    pub issued: Vec<String>,
    pub failed: Vec<(String, IssueError)>,
    pub reloaded: bool,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Only apps in this HAPROXY group get certificates.
    pub group: String,
    /// Issue one certificate per entry of a multi-valued domain label
    /// instead of only the first.
    pub allow_multiple_certs: bool,
    /// Reissue certificates expiring within this window.
    pub renew_before: Duration,
}

pub struct Reconciler {
    store: CertStore,
    marathon: Arc<MarathonClient>,
    lb: LbClient,
    issuer: Arc<dyn CertIssuer>,
    config: ReconcilerConfig,
    /// Serialises passes; also gives shutdown a way to wait for an
    /// in-flight pass.
    pass_lock: Mutex<()>,
    passes: AtomicU64,
}

impl Reconciler {
    pub fn new(
        store: CertStore,
        marathon: Arc<MarathonClient>,
        lb: LbClient,
        issuer: Arc<dyn CertIssuer>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            marathon,
            lb,
            issuer,
            config,
            pass_lock: Mutex::new(()),
            passes: AtomicU64::new(0),
        }
    }

    /// Number of passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Wait until no pass is in flight.
    pub async fn wait_idle(&self) {
        drop(self.pass_lock.lock().await);
    }

    /// Worker loop: one pass per received trigger. Ends when every trigger
    /// handle is dropped.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<()>) {
        while triggers.recv().await.is_some() {
            if let Err(e) = self.reconcile().await {
                tracing::error!(error = %e, "Reconciliation pass failed");
            }
        }
        tracing::debug!("Trigger channel closed, reconciler worker stopping");
    }

    /// Event-driven pass: re-read Marathon, diff against the store, issue
    /// what is missing.
    pub async fn reconcile(&self) -> Result<Outcome, ReconcileError> {
        let _guard = self.pass_lock.lock().await;
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;

        let apps = self.marathon.snapshot().await?;
        let desired = domains::extract(&apps, &self.config.group, self.config.allow_multiple_certs);
        let installed = self.store.list()?;
        let to_issue: Vec<String> = desired.difference(&installed).cloned().collect();

        tracing::info!(
            pass,
            desired = desired.len(),
            installed = installed.len(),
            to_issue = to_issue.len(),
            "Reconciling certificates"
        );

        Ok(self.issue_batch(to_issue).await)
    }

    /// Renewal pass: reissue installed certificates close to expiry. Does
    /// not consult the orchestrator.
    pub async fn reconcile_renewal(&self) -> Result<Outcome, ReconcileError> {
        let _guard = self.pass_lock.lock().await;
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;

        let installed = self.store.list()?;
        let deadline = SystemTime::now() + self.config.renew_before;

        let mut due = Vec::new();
        for domain in installed {
            match self.store.cert_expiry(&domain) {
                Ok(Some(not_after)) => {
                    if not_after < deadline {
                        tracing::info!(domain = %domain, "Certificate is due for renewal");
                        due.push(domain);
                    }
                }
                Ok(None) => {
                    tracing::warn!(
                        domain = %domain,
                        "Stored bundle has no parseable certificate, skipping renewal check"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        domain = %domain,
                        error = %e,
                        "Could not read stored certificate, skipping renewal check"
                    );
                }
            }
        }

        tracing::info!(pass, due = due.len(), "Certificate renewal sweep");
        Ok(self.issue_batch(due).await)
    }

    /// Issue certificates one domain at a time (bounded concurrency of one,
    /// out of respect for CA rate limits) and reload marathon-lb when at
    /// least one was installed.
    async fn issue_batch(&self, to_issue: Vec<String>) -> Outcome {
        let mut outcome = Outcome::default();

        for domain in to_issue {
            match self.issuer.issue(&domain).await {
                Ok(cert) => match self.store.put(&domain, &cert.bundle()) {
                    Ok(()) => outcome.issued.push(domain),
                    Err(e) => {
                        tracing::error!(
                            domain = %domain,
                            kind = "store_io",
                            error = %e,
                            "Failed to store issued certificate"
                        );
                        outcome.failed.push((domain, IssueError::Store(e)));
                    }
                },
                Err(e) => {
                    tracing::error!(
                        domain = %domain,
                        kind = e.kind(),
                        error = %e,
                        "Certificate issuance failed"
                    );
                    outcome.failed.push((domain, e));
                }
            }
        }

        if !outcome.issued.is_empty() {
            // Reload failures are logged by the lb client; the pass outcome
            // only records that a reload was triggered.
            self.lb.notify_reload().await;
            outcome.reloaded = true;
        }

        outcome
    }
}
