//! Run command handler
//!
//! Wires the Dolphin port, the bridge and the Archipelago session together
//! and runs both loops until Ctrl-C or a fatal error.

use crate::archipelago::{self, Backoff, SessionSettings};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::memory::DolphinProcess;
use crate::sync::{self, SyncSettings};
use anyhow::{Context, Result};
use kar_bridge::{Bridge, FileWatermarkStore, ItemApplyEngine, SessionContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::timeout;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub async fn handle(args: &RunArgs) -> Result<()> {
    let mut config = Config::load()?;
    config.apply_args(args);

    let slot = config
        .slot
        .clone()
        .context("No slot name configured. Use --slot or `kar-client configure --set slot=NAME`")?;

    let table = config.address_table()?;
    let store = FileWatermarkStore::new(&Config::data_dir()?, &config.server, &slot);
    info!(path = %store.path().display(), "watermark file");

    let engine = ItemApplyEngine::new(Arc::new(table.clone()));
    let memory = DolphinProcess::new(table.game_id());
    let bridge = Bridge::new(table, config.bridge_config(), Box::new(store))
        .context("Failed to load the applied-items watermark")?;

    let mut ctx = SessionContext::new(bridge.persisted_watermark());
    ctx.death_link = config.death_link;
    ctx.goal.add_locations(config.goals.clone());
    info!(
        slot = %slot,
        server = %config.server,
        profile = bridge.table().profile(),
        watermark = ctx.watermark(),
        death_link = ctx.death_link,
        "starting bridge"
    );

    let ctx = sync::shared_context(ctx);
    let handle = sync::shared_bridge(bridge, Box::new(memory));
    let notify = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_settings = SyncSettings {
        poll_interval: config.poll_interval(),
        tick_timeout: config.tick_timeout(),
        reattach_interval: config.reattach_interval(),
    };
    let session_settings = SessionSettings {
        url: config.server_url(),
        slot,
        password: config.password.clone(),
        force_death_link: args.death_link,
        backoff: Backoff::new(
            Duration::from_millis(config.backoff.initial_ms),
            Duration::from_millis(config.backoff.max_ms),
        ),
    };

    let mut sampling = tokio::spawn(sync::run(
        handle,
        ctx.clone(),
        notify.clone(),
        sync_settings,
        shutdown_rx.clone(),
    ));
    let mut session = tokio::spawn(archipelago::run(
        session_settings,
        engine,
        ctx.clone(),
        notify,
        shutdown_rx,
    ));

    let outcome: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("shutting down");
            Ok(())
        }
        joined = &mut sampling => joined
            .context("Sampling loop panicked")?
            .context("Sampling loop failed"),
        joined = &mut session => joined
            .context("Session loop panicked")?
            .context("Archipelago session ended"),
    };

    let _ = shutdown_tx.send(true);
    if !sampling.is_finished() && timeout(SHUTDOWN_GRACE, sampling).await.is_err() {
        warn!("sampling loop did not stop in time");
    }
    if !session.is_finished() && timeout(SHUTDOWN_GRACE, session).await.is_err() {
        warn!("session loop did not stop in time");
    }

    if let Ok(ctx) = ctx.try_lock() {
        if !ctx.queue.is_empty() {
            warn!(pending = ctx.queue.len(), "items still waiting for a City Trial run");
        }
    }
    outcome
}
