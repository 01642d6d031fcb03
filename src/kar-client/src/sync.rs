//! Sampling loop
//!
//! Drives [`Bridge::tick_with`] on a fixed interval. Each tick runs on the
//! blocking pool under a timeout. The session lock is only taken between
//! memory accesses, so a hung read leaves the session loop free.

use anyhow::{bail, Result};
use kar_bridge::{Bridge, BridgeError, ProcessMemory, SamplerStatus, SessionContext, TickReport};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Session state shared with the session loop
pub type SharedContext = Arc<tokio::sync::Mutex<SessionContext>>;

/// The bridge and the port it ticks against
pub struct BridgeHandle {
    pub bridge: Bridge,
    pub memory: Box<dyn ProcessMemory>,
}

pub type SharedBridge = Arc<Mutex<BridgeHandle>>;

pub fn shared_context(ctx: SessionContext) -> SharedContext {
    Arc::new(tokio::sync::Mutex::new(ctx))
}

pub fn shared_bridge(bridge: Bridge, memory: Box<dyn ProcessMemory>) -> SharedBridge {
    Arc::new(Mutex::new(BridgeHandle { bridge, memory }))
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub tick_timeout: Duration,
    pub reattach_interval: Duration,
}

/// Run one tick. Blocks on the context lock, so call it off the runtime.
pub fn tick_once(handle: &SharedBridge, ctx: &SharedContext) -> Result<TickReport, BridgeError> {
    // A panicked tick leaves nothing half-written that a retry can't fix
    let mut handle = handle.lock().unwrap_or_else(PoisonError::into_inner);
    let BridgeHandle { bridge, memory } = &mut *handle;
    bridge.tick_with(memory.as_mut(), || ctx.blocking_lock())
}

fn log_report(report: &TickReport) {
    if report.run_started {
        info!("City Trial run started");
    }
    if report.run_ended {
        info!("City Trial run ended");
    }
    for id in &report.new_checks {
        info!(location = id, "checklist box completed");
    }
    if report.local_death {
        info!("death sent");
    }
    if report.goal_reached {
        info!("goal reached");
    }
}

fn has_outbound(report: &TickReport) -> bool {
    !report.new_checks.is_empty() || report.local_death || report.goal_reached
}

/// Tick until shutdown. Returns an error only for configuration problems.
pub async fn run(
    handle: SharedBridge,
    ctx: SharedContext,
    notify: Arc<Notify>,
    settings: SyncSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<Result<TickReport, BridgeError>>> = None;
    let mut retry_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        if let Some(at) = retry_at {
            if Instant::now() < at {
                continue;
            }
        }

        let mut task = match in_flight.take() {
            Some(task) if !task.is_finished() => {
                debug!("previous tick still running");
                in_flight = Some(task);
                continue;
            }
            // Finished after timing out; its result is stale
            Some(_) | None => {
                let handle = handle.clone();
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || tick_once(&handle, &ctx))
            }
        };

        let joined = match timeout(settings.tick_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(timeout_ms = settings.tick_timeout.as_millis() as u64, "tick timed out");
                ctx.lock().await.sampler = SamplerStatus::Disconnected;
                in_flight = Some(task);
                continue;
            }
        };

        match joined {
            Ok(Ok(report)) => {
                if retry_at.take().is_some() {
                    info!("game process attached");
                }
                log_report(&report);
                if has_outbound(&report) {
                    notify.notify_one();
                }
            }
            Ok(Err(BridgeError::NotAttached)) => {
                if retry_at.is_none() {
                    warn!(
                        retry_ms = settings.reattach_interval.as_millis() as u64,
                        "game process not attached, retrying"
                    );
                }
                retry_at = Some(Instant::now() + settings.reattach_interval);
            }
            Ok(Err(err)) if !err.is_recoverable() => {
                bail!("Bridge configuration error: {}", err);
            }
            Ok(Err(err)) => warn!(error = %err, "tick failed"),
            Err(err) => warn!(error = %err, "tick panicked"),
        }
    }

    info!("sampling loop stopped");
    Ok(())
}
