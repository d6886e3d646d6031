mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ms_core::store::{CorrespondenceStore, FileStore};
use ms_integrations::default_registry;
use ms_sync::{SyncEngine, SyncOutcome};
use ms_telemetry::LogFormat;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Cli, Settings};

/// Exit status for a pass stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            LogFormat::from_json_flag(cli.json).init("mirrorsync", "info");
            error!(error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    let settings = cli.settings(config);
    LogFormat::from_json_flag(settings.json).init("mirrorsync", &settings.log_level);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current issue");
            on_signal.cancel();
        }
    });

    match run(&cli, &settings, &cancel).await {
        Ok(outcome) => {
            if settings.json {
                match serde_json::to_string(&outcome) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!(error = %e, "cannot encode report"),
                }
            }
            if outcome.is_cancelled() {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("sync failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: &Cli,
    settings: &Settings,
    cancel: &CancellationToken,
) -> anyhow::Result<SyncOutcome> {
    let registry = default_registry()?;
    let primary = registry
        .open(&cli.primary)
        .with_context(|| format!("primary tracker {:?}", cli.primary))?;
    let secondary = registry
        .open(&cli.secondary)
        .with_context(|| format!("secondary tracker {:?}", cli.secondary))?;

    let store = if settings.init_db {
        FileStore::create(&settings.db)
    } else {
        FileStore::open(&settings.db)
    }
    .with_context(|| format!("opening store {}", settings.db.display()))?;
    let store: Arc<dyn CorrespondenceStore> = Arc::new(store);
    info!(db = %settings.db.display(), watermark = ?settings.watermark, "store opened");

    let engine = SyncEngine::new(Arc::clone(&store), primary, secondary)
        .with_watermark(settings.watermark);
    let outcome = finish(engine.run(cancel).await, store.close())?;
    if outcome.is_cancelled() {
        warn!(issues_seen = outcome.report().issues_seen, "sync pass cancelled");
    }
    Ok(outcome)
}

/// Combine the pass result with closing the store. A failed pass is reported
/// as such; a close failure after it is only logged.
fn finish(
    outcome: ms_sync::Result<SyncOutcome>,
    closed: ms_core::store::Result<()>,
) -> anyhow::Result<SyncOutcome> {
    match (outcome, closed) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(anyhow::Error::new(e).context("closing store")),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(close)) => {
            error!(error = %close, "cannot close store after failed pass");
            Err(e.into())
        }
    }
}
