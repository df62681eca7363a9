//! marathon-acme - automatic ACME certificates for Marathon apps
//!
//! Watches Marathon for apps labelled with `MARATHON_ACME_{n}_DOMAIN`,
//! obtains certificates for their domains over ACME HTTP-01, writes them to
//! the directory marathon-lb reads, and signals marathon-lb to reload.

// Some runtime components are exercised only from tests.
#![allow(dead_code)]

mod acme;
mod defaults;
mod domains;
mod lb;
mod marathon;
mod reconciler;
mod renewal;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::acme::{AcmeClient, ChallengeMap};
use crate::lb::LbClient;
use crate::marathon::MarathonClient;
use crate::reconciler::{Reconciler, ReconcilerConfig, trigger_channel};
use crate::renewal::RenewalScheduler;
use crate::store::CertStore;

/// Exit code for configuration errors.
const EXIT_CONFIG: i32 = 1;
/// Exit code for unrecoverable storage errors at startup.
const EXIT_STORAGE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            // tracing has no level above error.
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Automatic ACME certificates for Marathon apps behind marathon-lb
#[derive(Debug, Parser)]
#[command(name = "marathon-acme")]
#[command(version)]
#[command(about = "Automatic ACME certificates for Marathon apps behind marathon-lb")]
struct Args {
    /// Directory shared with marathon-lb where certificates are stored
    storage_dir: PathBuf,

    /// ACME directory URL
    #[arg(long, default_value = defaults::LETS_ENCRYPT_DIRECTORY)]
    acme: String,

    /// Contact email for ACME account registration
    #[arg(long)]
    email: Option<String>,

    /// Marathon address(es), comma separated
    #[arg(long, value_delimiter = ',', default_value = "http://marathon.mesos:8080")]
    marathon: Vec<String>,

    /// marathon-lb address(es) to signal on certificate changes, comma separated
    #[arg(long, value_delimiter = ',', default_value = "http://marathon-lb.marathon.mesos:9090")]
    lb: Vec<String>,

    /// HAPROXY_GROUP to issue certificates for
    #[arg(long, default_value = "external")]
    group: String,

    /// Issue certificates for all entries of a multi-valued domain label
    #[arg(long)]
    allow_multiple_certs: bool,

    /// Listen address for the challenge/health HTTP endpoint
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: String,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Renew certificates expiring within this many days
    #[arg(long, default_value_t = 30)]
    renew_days: u32,

    /// Hours between renewal sweeps
    #[arg(long, default_value_t = 24)]
    renew_interval_hours: u64,
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_CONFIG);
        }
    }
}

fn install_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_filter())),
        )
        .with_target(false)
        .init();

    install_rustls_crypto_provider();

    for address in args.marathon.iter().chain(args.lb.iter()) {
        if !address.starts_with("http://") && !address.starts_with("https://") {
            tracing::error!(address = %address, "Addresses must be http(s) URLs");
            std::process::exit(EXIT_CONFIG);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("marathon-acme v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage directory: {}", args.storage_dir.display());
    tracing::info!("Marathon: {}", args.marathon.join(", "));
    tracing::info!("marathon-lb: {}", args.lb.join(", "));
    tracing::info!("Group: {}", args.group);

    // Storage first: everything else depends on the directory layout, and a
    // broken storage path is not worth retrying.
    let store = CertStore::new(&args.storage_dir);
    if let Err(e) = store.init() {
        tracing::error!(error = %e, "Failed to initialize certificate storage");
        std::process::exit(EXIT_STORAGE);
    }
    if let Err(e) = store.ensure_default() {
        tracing::error!(error = %e, "Failed to write fallback certificate");
        std::process::exit(EXIT_STORAGE);
    }

    // Challenge/health listener.
    let challenges = ChallengeMap::new();
    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(listen = %args.listen, error = %e, "Failed to bind listen address");
            std::process::exit(EXIT_CONFIG);
        }
    };
    tracing::info!(listen = %args.listen, "HTTP listener ready");

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(server::serve(listener, challenges.clone(), async move {
        let _ = server_shutdown_rx.await;
    }));

    // ACME account registration is idempotent; a CA outage at startup is
    // logged and registration is retried on the first issuance instead.
    let acme_client = Arc::new(AcmeClient::new(
        args.acme.clone(),
        args.email.clone(),
        store.clone(),
        challenges.clone(),
    ));
    if let Err(e) = acme_client.register().await {
        tracing::warn!(
            error = %e,
            "ACME account registration failed, will retry at first issuance"
        );
    }

    // Reconciler and its trigger sources.
    let marathon_client = Arc::new(MarathonClient::new(args.marathon.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store,
        marathon_client.clone(),
        LbClient::new(args.lb.clone()),
        acme_client,
        ReconcilerConfig {
            group: args.group.clone(),
            allow_multiple_certs: args.allow_multiple_certs,
            renew_before: Duration::from_secs(u64::from(args.renew_days) * 86400),
        },
    ));

    let (trigger, trigger_rx) = trigger_channel();
    let worker_task = tokio::spawn(reconciler.clone().run(trigger_rx));

    let events_task = tokio::spawn(marathon::events::run(
        marathon_client,
        trigger.clone(),
    ));

    // Initial sync; the event subscription fires another trigger once it
    // connects.
    trigger.fire();

    let scheduler = RenewalScheduler::new(
        reconciler.clone(),
        Duration::from_secs(args.renew_interval_hours * 3600),
    );
    let renewal_task = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    tracing::info!("Shutting down");

    // Stop trigger sources first, then wait out any in-flight pass.
    events_task.abort();
    renewal_task.abort();
    drop(trigger);

    if tokio::time::timeout(defaults::SHUTDOWN_GRACE, reconciler.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            grace_secs = defaults::SHUTDOWN_GRACE.as_secs(),
            "Reconciliation still in flight after the shutdown grace, abandoning it"
        );
    }
    worker_task.abort();

    let _ = server_shutdown_tx.send(());
    if let Ok(Err(e)) = server_task.await {
        tracing::warn!(error = %e, "HTTP listener shut down with an error");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
