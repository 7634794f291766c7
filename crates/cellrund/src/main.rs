//! cellrund — the cellrun worker daemon.
//!
//! Hosts one runtime loop over the built-in services:
//! - `delayed-messages` moves due delayed messages into their queues
//! - `heartbeat` writes a row per period into the `heartbeats` table
//!
//! # Usage
//!
//! ```text
//! cellrund run --config cellrun.toml --worker-name worker-01
//! cellrund check-config --config cellrun.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cellrun_runtime::{StaticServiceLoader, TracingObserver, WorkerConfig};
use cellrun_service::DelayedMessageService;
use cellrun_storage::StorageProviders;
use cellrund::{HeartbeatService, Host, TableReport};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,cellrund=debug,cellrun=debug";

#[derive(Parser)]
#[command(name = "cellrund", about = "cellrun worker daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker until Ctrl-C or until the runtime stops.
    Run {
        /// Worker configuration file (TOML). Defaults apply without one.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `worker_name` from the configuration.
        #[arg(long)]
        worker_name: Option<String>,
    },
    /// Parse a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            worker_name,
        } => run(config.as_deref(), worker_name).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::from_file(path),
        None => Ok(WorkerConfig::default()),
    }
}

async fn run(config_path: Option<&Path>, worker_name: Option<String>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(name) = worker_name {
        config.worker_name = name;
    }
    info!(worker = %config.worker_name, config = ?config_path, "cellrun worker starting");

    // ── Storage and services ───────────────────────────────────

    let storage = StorageProviders::in_memory();
    let loader = StaticServiceLoader::new()
        .with_service(Arc::new(DelayedMessageService))
        .with_service(Arc::new(HeartbeatService::default()))
        .with_overrides(config.services.clone());

    let host = Host::new(config, storage.clone(), Arc::new(loader))
        .with_observer(Arc::new(TracingObserver))
        .with_finalizer(Arc::new(TableReport::new(storage.tables.clone())));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        shutdown_tx.send_replace(true);
    });

    let summary = host.run(shutdown_rx).await;
    info!(
        executions = summary.executions,
        restarts = summary.restarts,
        triggered_restarts = summary.triggered_restarts,
        "cellrun worker stopped"
    );
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = WorkerConfig::from_file(path)?;
    println!("{}", config.to_toml_string()?);
    info!(path = %path.display(), "configuration is valid");
    Ok(())
}
