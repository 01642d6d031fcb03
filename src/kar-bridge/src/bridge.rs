//! Per-tick orchestration.
//!
//! One [`Bridge::tick`] call is one pass of the sampling loop:
//! sample, report checks, evaluate the goal, translate deaths, restore
//! permanent patches on a new run, drain the item queue, apply remote deaths.
//!
//! Process memory is only touched while the session is unlocked. A tick
//! takes the session twice: once to turn the sample into a plan and once
//! to settle what the writes did. A read that hangs never blocks the
//! session loop.

use crate::address::AddressTable;
use crate::deathlink::{DeathEvent, DeathLinkBridge};
use crate::engine::{BatchResult, Intake, ItemApplyEngine, PermanentPatchSet};
use crate::error::BridgeError;
use crate::items::ReceivedItem;
use crate::memory::ProcessMemory;
use crate::sampler::{HealthBand, Sample, SamplerStatus, StateSampler, Transition};
use crate::session::{OutboundEvent, SessionContext};
use crate::state::GameMode;
use crate::tracker::ProgressTracker;
use crate::watermark::WatermarkStore;
use std::cell::{RefCell, RefMut};
use std::ops::DerefMut;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeConfig {
    pub band: HealthBand,
    /// Ticks after a run start during which deaths are ignored and items wait
    pub grace_ticks: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            band: HealthBand::default(),
            grace_ticks: 24,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub mode: GameMode,
    pub run_started: bool,
    pub run_ended: bool,
    pub new_checks: Vec<i64>,
    pub applied: Vec<u64>,
    pub restored_stats: usize,
    pub local_death: bool,
    pub remote_deaths_applied: usize,
    pub remote_deaths_rejected: usize,
    pub goal_reached: bool,
}

/// Session-side decisions carried across the unlocked write phase
struct TickPlan {
    report: TickReport,
    tick: u64,
    restore: Option<PermanentPatchSet>,
    batch: Vec<ReceivedItem>,
    remote: Vec<DeathEvent>,
}

#[derive(Default)]
struct Writes {
    restored: Option<usize>,
    batch: BatchResult,
    remote: Vec<Result<(), BridgeError>>,
    error: Option<BridgeError>,
}

pub struct Bridge {
    table: Arc<AddressTable>,
    sampler: StateSampler,
    tracker: ProgressTracker,
    engine: ItemApplyEngine,
    deathlink: DeathLinkBridge,
    store: Box<dyn WatermarkStore>,
    persisted: u64,
}

impl Bridge {
    pub fn new(
        table: AddressTable,
        config: BridgeConfig,
        store: Box<dyn WatermarkStore>,
    ) -> Result<Self, BridgeError> {
        let persisted = store.load()?;
        let table = Arc::new(table);
        Ok(Self {
            sampler: StateSampler::new(table.clone(), config.band, config.grace_ticks),
            tracker: ProgressTracker::new(),
            engine: ItemApplyEngine::new(table.clone()),
            deathlink: DeathLinkBridge::new(table.clone()),
            table,
            store,
            persisted,
        })
    }

    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    /// Watermark last written to the store
    pub fn persisted_watermark(&self) -> u64 {
        self.persisted
    }

    /// Hand an inbound item to the engine
    pub fn receive(&self, ctx: &mut SessionContext, item: ReceivedItem) -> Intake {
        self.engine.receive(ctx, item)
    }

    /// Run one sampling tick against `port` with the session owned by the caller
    pub fn tick(
        &mut self,
        ctx: &mut SessionContext,
        port: &mut dyn ProcessMemory,
    ) -> Result<TickReport, BridgeError> {
        let cell = RefCell::new(ctx);
        self.tick_with(port, || RefMut::map(cell.borrow_mut(), |ctx| &mut **ctx))
    }

    /// Run one sampling tick, locking the session through `session`.
    ///
    /// Reattaches first if the port is detached. `NotAttached` marks the
    /// sampler `Disconnected`; every other error leaves the session intact.
    /// The guard returned by `session` is never held across a memory access.
    pub fn tick_with<F, G>(
        &mut self,
        port: &mut dyn ProcessMemory,
        mut session: F,
    ) -> Result<TickReport, BridgeError>
    where
        F: FnMut() -> G,
        G: DerefMut<Target = SessionContext>,
    {
        if !port.is_attached() {
            if let Err(err) = port.attach() {
                session().sampler = SamplerStatus::Disconnected;
                return Err(err.into());
            }
            info!(profile = self.table.profile(), "attached to game process");
            self.sampler.reset();
        }

        let staged = match self.sampler.sample(&*port) {
            Ok(sample) => {
                let plan = {
                    let mut ctx = session();
                    self.plan(&mut ctx, sample)
                };
                let writes = self.write(port, &plan);
                Ok((plan, writes))
            }
            Err(err) => Err(err),
        };

        let mut ctx = session();
        let result = staged.and_then(|(plan, writes)| self.settle(&mut ctx, plan, writes));
        match &result {
            Ok(_) => ctx.sampler = SamplerStatus::Attached,
            Err(BridgeError::NotAttached) => {
                if ctx.sampler == SamplerStatus::Attached {
                    warn!("game process went away");
                }
                ctx.sampler = SamplerStatus::Disconnected;
            }
            Err(_) => {}
        }
        let watermark = ctx.watermark();
        drop(ctx);

        if matches!(result, Err(BridgeError::NotAttached)) {
            port.detach();
        }
        if let Err(err) = self.persist(watermark) {
            warn!(error = %err, "failed to persist watermark");
        }
        result
    }

    fn plan(&self, ctx: &mut SessionContext, sample: Sample) -> TickPlan {
        let tick = sample.current.tick;
        let mode = sample.current.mode;
        let mut report = TickReport {
            mode,
            run_started: sample.has(Transition::RunStarted),
            run_ended: sample.has(Transition::RunEnded),
            ..Default::default()
        };

        if report.run_started {
            ctx.begin_run(tick);
        }

        for id in self
            .tracker
            .advance(&mut ctx.run, sample.previous.as_ref(), &sample.current)
        {
            if ctx.record_check(id) {
                report.new_checks.push(id);
            }
        }
        if ctx.evaluate_goal() {
            ctx.push_outbound(OutboundEvent::Goal);
            report.goal_reached = true;
        }

        for transition in &sample.transitions {
            match transition {
                Transition::Died => {
                    report.local_death |= self.deathlink.on_local_death(ctx, tick);
                }
                Transition::Revived => self.deathlink.on_revive(ctx),
                _ => {}
            }
        }

        let writable = mode.is_running() && !self.sampler.in_grace();
        let restore = (writable && ctx.run.restore_pending).then(|| ctx.permanent.clone());
        let batch = if writable {
            self.engine.take_batch(ctx)
        } else {
            Vec::new()
        };
        let remote = ctx.take_remote_deaths();
        ctx.last_state = Some(sample.current);

        TickPlan {
            report,
            tick,
            restore,
            batch,
            remote,
        }
    }

    fn write(&self, port: &mut dyn ProcessMemory, plan: &TickPlan) -> Writes {
        let mut writes = Writes::default();

        if let Some(permanent) = &plan.restore {
            match self.engine.on_run_start(permanent, port) {
                Ok(count) => writes.restored = Some(count),
                Err(err) => {
                    writes.error = Some(err);
                    return writes;
                }
            }
        }

        writes.batch = self.engine.apply_batch(port, &plan.batch);
        if writes.batch.failed.is_some() {
            return writes;
        }

        for event in &plan.remote {
            let result = self.deathlink.apply_remote(port, plan.report.mode, event);
            let detached = matches!(result, Err(BridgeError::NotAttached));
            writes.remote.push(result);
            if detached {
                break;
            }
        }
        writes
    }

    fn settle(
        &self,
        ctx: &mut SessionContext,
        plan: TickPlan,
        writes: Writes,
    ) -> Result<TickReport, BridgeError> {
        let TickPlan {
            mut report,
            tick,
            remote,
            ..
        } = plan;
        let mut failure = writes.error;

        if let Some(count) = writes.restored {
            report.restored_stats = count;
            ctx.run.restore_pending = false;
        }
        match self.engine.settle(ctx, writes.batch) {
            Ok(applied) => report.applied = applied,
            Err(err) => {
                failure.get_or_insert(err);
            }
        }

        let mut results = writes.remote.into_iter();
        for event in remote {
            match results.next() {
                Some(Ok(())) => {
                    self.deathlink.expect_echo(ctx, tick);
                    report.remote_deaths_applied += 1;
                }
                Some(Err(BridgeError::NotAttached)) => {
                    ctx.push_remote_death(event);
                    failure.get_or_insert(BridgeError::NotAttached);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "remote death could not be applied");
                    report.remote_deaths_rejected += 1;
                }
                // Not attempted after an earlier failure
                None => ctx.push_remote_death(event),
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn persist(&mut self, watermark: u64) -> Result<(), BridgeError> {
        if watermark > self.persisted {
            self.store.store(watermark)?;
            self.persisted = watermark;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Field, CHECKLIST_BASE_ADDR, PATCH_BOOST_ADDR};
    use crate::deathlink::DeathEvent;
    use crate::goal::Goal;
    use crate::items::PatchKind;
    use crate::deathlink::REMOTE_ECHO_TICKS;
    use crate::error::MemoryError;
    use crate::memory::MockProcessMemory;
    use crate::state::{Stat, CITY_TRIAL_STAGE_ID};
    use crate::watermark::{FileWatermarkStore, MemoryWatermarkStore};
    use std::cell::Cell;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Port that notes any access made while the session is locked
    struct LockWatchingMemory {
        inner: MockProcessMemory,
        ctx: Arc<Mutex<SessionContext>>,
        accessed_while_locked: Cell<bool>,
    }

    impl LockWatchingMemory {
        fn check(&self) {
            if self.ctx.try_lock().is_err() {
                self.accessed_while_locked.set(true);
            }
        }
    }

    impl ProcessMemory for LockWatchingMemory {
        fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
            self.check();
            self.inner.read_bytes(address, len)
        }

        fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
            self.check();
            self.inner.write_bytes(address, data)
        }

        fn is_attached(&self) -> bool {
            self.inner.is_attached()
        }

        fn attach(&mut self) -> Result<(), MemoryError> {
            self.inner.attach()
        }

        fn detach(&mut self) {
            self.inner.detach()
        }
    }

    fn bridge(grace_ticks: u64) -> (Bridge, MockProcessMemory, SessionContext) {
        let table = AddressTable::builtin("gkye01").unwrap();
        let mem = MockProcessMemory::for_table(&table);
        let config = BridgeConfig {
            band: HealthBand::default(),
            grace_ticks,
        };
        let bridge = Bridge::new(table, config, Box::new(MemoryWatermarkStore::default())).unwrap();
        let ctx = SessionContext::new(bridge.persisted_watermark());
        (bridge, mem, ctx)
    }

    fn boost(sequence: u64, magnitude: f32, permanent: bool) -> ReceivedItem {
        ReceivedItem {
            item_id: if permanent { 48 } else { 30 },
            kind: PatchKind::Stat(Stat::Boost),
            magnitude,
            permanent,
            sequence,
        }
    }

    fn set_running(bridge: &Bridge, mem: &mut MockProcessMemory, running: bool) {
        let stage = if running { CITY_TRIAL_STAGE_ID } else { 0 };
        mem.set_field_u16(bridge.table(), Field::StageId, stage);
    }

    fn boost_offset(bridge: &Bridge, mem: &MockProcessMemory) -> f32 {
        mem.field_f32(bridge.table(), Field::Patch(Stat::Boost)) - Stat::Boost.baseline()
    }

    #[test]
    fn test_item_queued_in_menu_applied_in_run() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        bridge.receive(&mut ctx, boost(1, 5.0, false));

        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(report.mode, GameMode::Menu);
        assert!(report.applied.is_empty());
        assert_eq!(ctx.queue.len(), 1);

        set_running(&bridge, &mut mem, true);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(report.run_started);
        assert_eq!(report.applied, vec![1]);
        assert_eq!(boost_offset(&bridge, &mem), 5.0);
        assert!(ctx.queue.is_empty());

        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(boost_offset(&bridge, &mem), 5.0);
    }

    #[test]
    fn test_items_wait_out_grace_period() {
        let (mut bridge, mut mem, mut ctx) = bridge(2);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        bridge.receive(&mut ctx, boost(1, 1.0, false));

        set_running(&bridge, &mut mem, true);
        assert!(bridge.tick(&mut ctx, &mut mem).unwrap().applied.is_empty());
        assert!(bridge.tick(&mut ctx, &mut mem).unwrap().applied.is_empty());
        assert_eq!(bridge.tick(&mut ctx, &mut mem).unwrap().applied, vec![1]);
    }

    #[test]
    fn test_permanent_patch_set_not_stacked_across_runs() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        bridge.receive(&mut ctx, boost(1, 3.0, true));

        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(boost_offset(&bridge, &mem), 3.0);

        // Run ends; memory keeps last run's values
        set_running(&bridge, &mut mem, false);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(report.run_ended);

        bridge.receive(&mut ctx, boost(2, 5.0, false));
        set_running(&bridge, &mut mem, true);
        mem.writes.clear();
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(report.run_started);
        assert_eq!(report.restored_stats, 1);
        assert_eq!(report.applied, vec![2]);

        // Restore to baseline + 3 first, then the new +5
        let values: Vec<f32> = mem
            .writes
            .iter()
            .filter(|(addr, _)| *addr == PATCH_BOOST_ADDR)
            .map(|(_, bytes)| bridge.table().endian().read_f32(bytes))
            .collect();
        assert_eq!(values, vec![1.0, 6.0]);
        assert_eq!(boost_offset(&bridge, &mem), 8.0);
    }

    #[test]
    fn test_permanent_restored_after_game_reset() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        bridge.receive(&mut ctx, boost(1, 3.0, true));
        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        set_running(&bridge, &mut mem, false);
        bridge.tick(&mut ctx, &mut mem).unwrap();

        // The game puts patches back to baseline for a new run
        mem.set_field_f32(bridge.table(), Field::Patch(Stat::Boost), Stat::Boost.baseline());
        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(boost_offset(&bridge, &mem), 3.0);
    }

    #[test]
    fn test_checks_reported_once_with_goal() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        ctx.goal.set_goal(Goal::ChecklistCount(2));
        bridge.tick(&mut ctx, &mut mem).unwrap();

        mem.set_bytes(CHECKLIST_BASE_ADDR, &[0x02]);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(report.new_checks, vec![1]);
        assert!(!report.goal_reached);

        mem.set_bytes(CHECKLIST_BASE_ADDR + 4, &[0x02]);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(report.new_checks, vec![5]);
        assert!(report.goal_reached);

        assert!(bridge.tick(&mut ctx, &mut mem).unwrap().new_checks.is_empty());
        assert_eq!(
            ctx.drain_outbound(),
            vec![
                OutboundEvent::LocationChecked(1),
                OutboundEvent::LocationChecked(5),
                OutboundEvent::Goal,
            ]
        );
    }

    #[test]
    fn test_oscillating_health_sends_one_death() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        ctx.death_link = true;
        mem.set_field_f32(bridge.table(), Field::CurrentHp, 100.0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();

        for hp in [0.0, 0.4, 0.0, 1.5, 0.2, 3.0, 0.0] {
            mem.set_field_f32(bridge.table(), Field::CurrentHp, hp);
            bridge.tick(&mut ctx, &mut mem).unwrap();
        }

        let deaths = ctx
            .drain_outbound()
            .into_iter()
            .filter(|e| matches!(e, OutboundEvent::Death(_)))
            .count();
        assert_eq!(deaths, 1);
    }

    #[test]
    fn test_remote_death_applied_next_tick() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        ctx.death_link = true;
        let table = bridge.table().clone();
        mem.place_machine(&table, 0x8100_0000, 80.0);
        mem.set_field_f32(&table, Field::CurrentHp, 80.0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();

        ctx.push_remote_death(DeathEvent::remote(Some("Meta".into()), None));
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(report.remote_deaths_applied, 1);
        assert_eq!(mem.field_f32(&table, Field::MachineHp), 0.0);

        // The game mirrors the HP drop; no death is echoed back
        mem.set_field_f32(&table, Field::CurrentHp, 0.0);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(!report.local_death);
        assert!(!ctx.has_outbound());
    }

    #[test]
    fn test_remote_death_in_menu_is_rejected() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        ctx.push_remote_death(DeathEvent::remote(None, None));

        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(report.remote_deaths_rejected, 1);
        assert!(ctx.take_remote_deaths().is_empty());
    }

    #[test]
    fn test_detach_marks_disconnected_then_recovers() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(ctx.sampler, SamplerStatus::Attached);

        mem.set_available(false);
        let err = bridge.tick(&mut ctx, &mut mem).unwrap_err();
        assert!(matches!(err, BridgeError::NotAttached));
        assert!(err.is_recoverable());
        assert_eq!(ctx.sampler, SamplerStatus::Disconnected);

        // Items keep queueing while detached
        bridge.receive(&mut ctx, boost(1, 1.0, false));
        assert_eq!(ctx.queue.len(), 1);

        mem.set_available(true);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(ctx.sampler, SamplerStatus::Attached);
    }

    #[test]
    fn test_watermark_survives_restart() {
        let dir = TempDir::new().unwrap();
        let table = AddressTable::builtin("gkye01").unwrap();
        let store = FileWatermarkStore::new(dir.path(), "localhost:38281", "Kirby");

        let mut first = Bridge::new(table.clone(), BridgeConfig { grace_ticks: 0, ..Default::default() }, Box::new(store.clone())).unwrap();
        let mut mem = MockProcessMemory::for_table(&table);
        let mut ctx = SessionContext::new(first.persisted_watermark());
        set_running(&first, &mut mem, true);
        first.receive(&mut ctx, boost(1, 3.0, true));
        first.receive(&mut ctx, boost(2, 1.0, false));
        first.tick(&mut ctx, &mut mem).unwrap();
        assert_eq!(first.persisted_watermark(), 2);
        let offset = boost_offset(&first, &mem);

        // Client restarts and the server replays everything
        let second = Bridge::new(table, BridgeConfig::default(), Box::new(store)).unwrap();
        let mut ctx = SessionContext::new(second.persisted_watermark());
        assert_eq!(second.receive(&mut ctx, boost(1, 3.0, true)), Intake::Restored);
        assert_eq!(second.receive(&mut ctx, boost(2, 1.0, false)), Intake::AlreadyApplied);
        assert_eq!(second.receive(&mut ctx, boost(3, 1.0, false)), Intake::Queued);

        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.permanent.total(Stat::Boost), 3.0);
        assert_eq!(boost_offset(&second, &mem), offset);
    }

    #[test]
    fn test_ignored_remote_write_does_not_hide_next_death() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        ctx.death_link = true;
        let table = bridge.table().clone();
        mem.place_machine(&table, 0x8100_0000, 80.0);
        mem.set_field_f32(&table, Field::CurrentHp, 80.0);
        bridge.tick(&mut ctx, &mut mem).unwrap();
        set_running(&bridge, &mut mem, true);
        bridge.tick(&mut ctx, &mut mem).unwrap();

        ctx.push_remote_death(DeathEvent::remote(Some("Meta".into()), None));
        assert_eq!(bridge.tick(&mut ctx, &mut mem).unwrap().remote_deaths_applied, 1);

        // This machine ignores the write and the player stays alive
        for _ in 0..=REMOTE_ECHO_TICKS {
            let report = bridge.tick(&mut ctx, &mut mem).unwrap();
            assert!(!report.local_death);
        }

        mem.set_field_f32(&table, Field::CurrentHp, 0.0);
        let report = bridge.tick(&mut ctx, &mut mem).unwrap();
        assert!(report.local_death);
        let deaths = ctx
            .drain_outbound()
            .into_iter()
            .filter(|e| matches!(e, OutboundEvent::Death(_)))
            .count();
        assert_eq!(deaths, 1);
    }

    #[test]
    fn test_memory_untouched_while_session_locked() {
        let table = AddressTable::builtin("gkye01").unwrap();
        let config = BridgeConfig {
            grace_ticks: 0,
            ..Default::default()
        };
        let mut bridge = Bridge::new(table.clone(), config, Box::new(MemoryWatermarkStore::default())).unwrap();
        let ctx = Arc::new(Mutex::new(SessionContext::new(0)));
        let mut port = LockWatchingMemory {
            inner: MockProcessMemory::for_table(&table),
            ctx: ctx.clone(),
            accessed_while_locked: Cell::new(false),
        };
        port.inner.place_machine(&table, 0x8100_0000, 80.0);

        bridge.tick_with(&mut port, || ctx.lock().unwrap()).unwrap();
        {
            let mut session = ctx.lock().unwrap();
            bridge.receive(&mut session, boost(1, 2.0, true));
            session.push_remote_death(DeathEvent::remote(None, None));
        }
        port.inner.set_field_u16(&table, Field::StageId, CITY_TRIAL_STAGE_ID);
        let report = bridge.tick_with(&mut port, || ctx.lock().unwrap()).unwrap();

        assert_eq!(report.applied, vec![1]);
        assert_eq!(report.remote_deaths_applied, 1);
        assert!(!port.inner.writes.is_empty());
        assert!(!port.accessed_while_locked.get());
    }

    #[test]
    fn test_write_failure_keeps_remote_deaths() {
        let (mut bridge, mut mem, mut ctx) = bridge(0);
        let table = bridge.table().clone();
        mem.place_machine(&table, 0x8100_0000, 80.0);
        bridge.tick(&mut ctx, &mut mem).unwrap();

        let boost_entry = *table.resolve(Field::Patch(Stat::Boost)).unwrap();
        mem.protect(boost_entry.address..boost_entry.address + 4);
        bridge.receive(&mut ctx, boost(1, 1.0, false));
        ctx.push_remote_death(DeathEvent::remote(None, None));
        set_running(&bridge, &mut mem, true);

        let err = bridge.tick(&mut ctx, &mut mem).unwrap_err();
        assert!(matches!(err, BridgeError::WriteRejected { .. }));
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.take_remote_deaths().len(), 1);
        assert_eq!(mem.field_f32(&table, Field::MachineHp), 80.0);
    }
}
