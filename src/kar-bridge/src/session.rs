//! Session context shared by the sampling loop and the session loop.
//!
//! One `SessionContext` lives for one bridge session. Both loops take the
//! same lock around it, so every field here is serialized by the caller.

use crate::deathlink::DeathEvent;
use crate::engine::{PendingQueue, PermanentPatchSet};
use crate::goal::GoalTracker;
use crate::sampler::SamplerStatus;
use crate::state::GameState;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Events waiting for the session loop to send
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    LocationChecked(i64),
    Death(DeathEvent),
    Goal,
}

/// State scoped to a single City Trial run.
///
/// Replaced wholesale when a run starts instead of clearing flags one by one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunScope {
    /// Runs started this session; 0 until the first run start is seen
    pub index: u64,
    pub started_tick: u64,
    /// Boxes already reported during this run
    pub reported: BTreeSet<i64>,
    /// A death has been sent (or received) for the current life
    pub death_sent: bool,
    /// A remote death was written; a local death up to this tick is its echo
    pub echo_until: Option<u64>,
    /// Permanent patches still have to be written for this run
    pub restore_pending: bool,
}

impl RunScope {
    pub fn new(index: u64, started_tick: u64) -> Self {
        Self {
            index,
            started_tick,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct SessionContext {
    pub connection: ConnectionStatus,
    pub sampler: SamplerStatus,
    pub death_link: bool,
    pub queue: PendingQueue,
    pub permanent: PermanentPatchSet,
    pub run: RunScope,
    pub goal: GoalTracker,
    /// Most recent snapshot, for status display
    pub last_state: Option<GameState>,
    watermark: u64,
    checked: BTreeSet<i64>,
    outbox: VecDeque<OutboundEvent>,
    remote_deaths: VecDeque<DeathEvent>,
}

impl SessionContext {
    /// Fresh session resuming from a persisted watermark
    pub fn new(watermark: u64) -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            sampler: SamplerStatus::Disconnected,
            death_link: false,
            queue: PendingQueue::default(),
            permanent: PermanentPatchSet::default(),
            run: RunScope::default(),
            goal: GoalTracker::default(),
            last_state: None,
            watermark,
            checked: BTreeSet::new(),
            outbox: VecDeque::new(),
            remote_deaths: VecDeque::new(),
        }
    }

    /// Open a new run scope
    pub fn begin_run(&mut self, tick: u64) {
        let index = self.run.index + 1;
        self.run = RunScope {
            restore_pending: true,
            ..RunScope::new(index, tick)
        };
    }

    /// Highest sequence number whose effect has been committed
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub(crate) fn advance_watermark(&mut self, sequence: u64) {
        self.watermark = self.watermark.max(sequence);
    }

    /// Drop item bookkeeping ahead of a full redelivery from the service.
    ///
    /// The watermark survives, so redelivered items are sorted back into
    /// "already applied" and "still pending" instead of stacking again.
    pub fn reset_items(&mut self) {
        self.queue = PendingQueue::default();
        self.permanent = PermanentPatchSet::default();
    }

    /// Record a completed box; queues an outbound check the first time
    /// this session sees it
    pub fn record_check(&mut self, id: i64) -> bool {
        let new = self.checked.insert(id);
        if new {
            self.outbox.push_back(OutboundEvent::LocationChecked(id));
        }
        new
    }

    /// Every box reported this session, for resending after a reconnect
    pub fn checked_locations(&self) -> &BTreeSet<i64> {
        &self.checked
    }

    /// Check the goal against every box reported so far; true once
    pub fn evaluate_goal(&mut self) -> bool {
        self.goal.evaluate(&self.checked)
    }

    pub fn push_outbound(&mut self, event: OutboundEvent) {
        self.outbox.push_back(event);
    }

    pub fn drain_outbound(&mut self) -> Vec<OutboundEvent> {
        self.outbox.drain(..).collect()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn push_remote_death(&mut self, event: DeathEvent) {
        self.remote_deaths.push_back(event);
    }

    pub fn take_remote_deaths(&mut self) -> Vec<DeathEvent> {
        self.remote_deaths.drain(..).collect()
    }
}
