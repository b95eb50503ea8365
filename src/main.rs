// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! cve-sync daemon entry point.
//!
//! Startup order:
//! 1. Parse arguments and load configuration (file, then `CVE_SYNC_*` env).
//! 2. Initialise tracing (JSON with `--log-json`, plain text otherwise).
//! 3. Open the record store once.
//! 4. Run the requested command with Ctrl-C/SIGTERM wired to shutdown.
//! 5. Close the store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use cve_sync::{InMemoryRecordStore, RecordStore, SqlRecordStore, SyncConfig, SyncOrchestrator, TreeImporter};

#[derive(Parser, Debug)]
#[command(name = "cve-sync", version, about = "Incremental CVE catalog synchronization")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run sync cycles on the configured interval until interrupted (default)
    Run,
    /// Run a single sync cycle and exit
    Once,
    /// Import every record in the local tree, then exit
    Import,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = SyncConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    init_tracing(cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "cve-sync starting");

    let store = open_store(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let outcome = match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let orchestrator = SyncOrchestrator::from_config(config, Arc::clone(&store), shutdown_rx);
            orchestrator.run().await;
            Ok(())
        }
        Command::Once => {
            let orchestrator = SyncOrchestrator::from_config(config, Arc::clone(&store), shutdown_rx);
            orchestrator
                .run_cycle()
                .await
                .map(|report| {
                    info!(
                        entries = report.entries,
                        inserted = report.inserted,
                        updated = report.updated,
                        skipped = report.skipped_total(),
                        imported = report.import.as_ref().map_or(0, |i| i.imported),
                        "Single cycle finished"
                    );
                })
                .context("sync cycle failed")
        }
        Command::Import => {
            let importer = TreeImporter::new(config.record_root(), config.id_prefix.clone(), Arc::clone(&store), config.batch_size);
            importer
                .run(Some(shutdown_rx))
                .await
                .map(|report| {
                    info!(imported = report.imported, skipped = report.skipped_total(), "Import finished");
                })
                .context("import failed")
        }
    };

    store.close().await;
    info!("cve-sync stopped");
    outcome
}

fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn open_store(config: &SyncConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    match config.sql_url.as_deref() {
        Some(url) => {
            let store = SqlRecordStore::new(url)
                .await
                .with_context(|| format!("failed to open record store at {}", redact(url)))?;
            info!(url = %redact(url), "Record store ready");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No sql_url configured, records are kept in memory and lost on exit");
            Ok(Arc::new(InMemoryRecordStore::new()))
        }
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => format!("{}://***{}", &url[..scheme_end], &url[at..]),
        _ => url.to_string(),
    }
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, finishing current record");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_credentials() {
        assert_eq!(redact("mysql://user:secret@db:3306/cve"), "mysql://***@db:3306/cve");
        assert_eq!(redact("sqlite://catalog.db?mode=rwc"), "sqlite://catalog.db?mode=rwc");
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["cve-sync"]);
        assert!(cli.command.is_none());
        assert!(!cli.log_json);

        let cli = Cli::parse_from(["cve-sync", "--log-json", "-c", "sync.toml", "once"]);
        assert_eq!(cli.command, Some(Command::Once));
        assert_eq!(cli.config, Some(PathBuf::from("sync.toml")));
    }
}
