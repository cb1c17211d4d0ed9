pub mod config;
pub mod error;
pub mod error_codes;
pub mod filter;
pub mod history;
pub mod identify;
pub mod input_validation;
pub mod logging;
pub mod metadata;
pub mod notification;
pub mod path_validation;
pub mod pipeline;
pub mod scheduler;
pub mod sidecar;
pub mod transfer;
pub mod watcher;


use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::AppConfig;
use error::{IngestError, IngestResult};
use pipeline::{event_channel, Pipeline};
use watcher::WatcherManager;

/// Runs the daemon until Ctrl-C: one watcher per directory feeding the
/// ingestion actor.
pub async fn run(config: AppConfig) -> IngestResult<()> {
    let pipeline = Pipeline::from_config(&config)?;
    let dirs = pipeline.dirs().to_vec();
    if dirs.is_empty() {
        warn!("no watched directories configured");
    }

    let (tx, rx) = event_channel(config.channel_capacity);
    let mut watchers = WatcherManager::new(config.debounce(), config.poll_interval());
    let started = watchers.start_all(&dirs, &tx);
    info!(started, total = dirs.len(), "watchers started");

    let shutdown = CancellationToken::new();
    let actor = tokio::spawn(pipeline.run(rx, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| IngestError::io("signal.ctrl_c", "", e))?;
    info!("shutdown requested");

    // Stop producers first; the actor finishes the event in hand.
    watchers.stop_all();
    drop(tx);
    shutdown.cancel();
    if let Err(e) = actor.await {
        warn!("ingestion task ended abnormally: {e}");
    }
    Ok(())
}
