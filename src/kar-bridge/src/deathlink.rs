//! DeathLink Bridge
//!
//! Two one-way channels:
//! - Local deaths seen by the sampler become one outbound event per life
//! - Remote deaths zero the ridden machine's HP, best effort

use crate::address::{AddressTable, Field, MACHINE_PTR_ADDR};
use crate::error::{BridgeError, MemoryError};
use crate::memory::ProcessMemory;
use crate::session::{OutboundEvent, SessionContext};
use crate::state::GameMode;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeathOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeathEvent {
    pub origin: DeathOrigin,
    pub tick: u64,
    /// Player name that died (remote) or our slot name (local, set by the client)
    pub source: Option<String>,
    pub cause: Option<String>,
}

impl DeathEvent {
    pub fn local(tick: u64) -> Self {
        Self {
            origin: DeathOrigin::Local,
            tick,
            source: None,
            cause: None,
        }
    }

    pub fn remote(source: Option<String>, cause: Option<String>) -> Self {
        Self {
            origin: DeathOrigin::Remote,
            tick: 0,
            source,
            cause,
        }
    }
}

/// Ticks after a remote death write during which a local death is its echo
pub const REMOTE_ECHO_TICKS: u64 = 8;

pub struct DeathLinkBridge {
    table: Arc<AddressTable>,
}

impl DeathLinkBridge {
    pub fn new(table: Arc<AddressTable>) -> Self {
        Self { table }
    }

    /// Queue an outbound death unless one was already sent for this life
    pub fn on_local_death(&self, ctx: &mut SessionContext, tick: u64) -> bool {
        if ctx.run.death_sent {
            debug!(tick, "death already sent for this life");
            return false;
        }
        if let Some(until) = ctx.run.echo_until.take() {
            if tick <= until {
                // Our own remote write took effect
                ctx.run.death_sent = true;
                debug!(tick, "death caused by remote DeathLink, not echoed");
                return false;
            }
        }
        if !ctx.death_link {
            debug!(tick, "death detected, DeathLink disabled");
            return false;
        }

        ctx.run.death_sent = true;
        info!(tick, "local death, notifying other players");
        ctx.push_outbound(OutboundEvent::Death(DeathEvent::local(tick)));
        true
    }

    /// A new life begins; the next death may be sent again
    pub fn on_revive(&self, ctx: &mut SessionContext) {
        ctx.run.death_sent = false;
    }

    /// Open the echo window after a remote death landed at `tick`.
    ///
    /// The write may have no effect on some machines, so the window closes
    /// on its own and a later death is sent normally.
    pub fn expect_echo(&self, ctx: &mut SessionContext, tick: u64) {
        ctx.run.echo_until = Some(tick + REMOTE_ECHO_TICKS);
    }

    /// Write machine HP to zero for a remote death.
    ///
    /// Only possible during a run and while riding a machine that exposes
    /// its HP; anything else is `WriteRejected`.
    pub fn apply_remote(
        &self,
        port: &mut dyn ProcessMemory,
        mode: GameMode,
        event: &DeathEvent,
    ) -> Result<(), BridgeError> {
        let entry = match self.table.resolve(Field::MachineHp) {
            Ok(entry) => *entry,
            Err(err) => {
                return Err(BridgeError::WriteRejected {
                    address: MACHINE_PTR_ADDR,
                    reason: err.to_string(),
                })
            }
        };

        if !mode.is_running() {
            return Err(BridgeError::WriteRejected {
                address: entry.address,
                reason: format!("no run in progress ({mode})"),
            });
        }

        match port.write_entry_f32(&entry, 0.0) {
            Ok(address) => {
                info!(
                    address,
                    source = event.source.as_deref().unwrap_or("unknown"),
                    "remote death applied"
                );
                Ok(())
            }
            Err(MemoryError::NotAttached) => Err(BridgeError::NotAttached),
            Err(err) => Err(BridgeError::rejected(entry.address, &err)),
        }
    }
}
