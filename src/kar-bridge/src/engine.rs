//! Item Apply Engine
//!
//! Owns the rules for turning received items into memory writes:
//! - Items wait in the [`PendingQueue`] until a City Trial run is active
//! - Each tick drains the queue in sequence order, one item at a time
//! - Permanent items are kept in the [`PermanentPatchSet`] and written again
//!   at the start of every run, before anything new drains
//!
//! A write that lands does not mean the game shows it yet: patch counts only
//! take visible effect once the player has picked up a patch in the current
//! run. The engine treats the committed write as "applied".

use crate::address::{AddressEntry, AddressTable, Field};
use crate::error::{BridgeError, MemoryError};
use crate::items::{HealthTarget, PatchKind, ReceivedItem};
use crate::memory::ProcessMemory;
use crate::session::SessionContext;
use crate::state::{GameMode, Stat};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Received, waiting for a run
    Queued,
    /// A run is active and this item is being written
    Eligible,
    /// Write committed; the item has left the queue
    Applied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub item: ReceivedItem,
    pub state: ItemState,
}

/// Received-but-unapplied items ordered by sequence number
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    items: VecDeque<PendingItem>,
}

impl PendingQueue {
    /// Insert in sequence order; returns false for a sequence already queued
    pub fn push(&mut self, item: ReceivedItem) -> bool {
        if self.contains(item.sequence) {
            return false;
        }
        let pos = self
            .items
            .iter()
            .position(|p| p.item.sequence > item.sequence)
            .unwrap_or(self.items.len());
        self.items.insert(
            pos,
            PendingItem {
                item,
                state: ItemState::Queued,
            },
        );
        true
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.items.iter().any(|p| p.item.sequence == sequence)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingItem> {
        self.items.iter()
    }

    /// Mark every queued item `Eligible` and hand out copies in order
    fn mark_eligible(&mut self) -> Vec<ReceivedItem> {
        self.items
            .iter_mut()
            .map(|pending| {
                pending.state = ItemState::Eligible;
                pending.item
            })
            .collect()
    }

    fn remove(&mut self, sequence: u64) -> Option<PendingItem> {
        let pos = self.items.iter().position(|p| p.item.sequence == sequence)?;
        self.items.remove(pos)
    }

    /// Anything not committed goes back to waiting
    fn requeue_eligible(&mut self) {
        for pending in self.items.iter_mut() {
            if pending.state == ItemState::Eligible {
                pending.state = ItemState::Queued;
            }
        }
    }
}

/// Permanent items re-applied at every run start
#[derive(Debug, Clone, Default)]
pub struct PermanentPatchSet {
    items: BTreeMap<u64, ReceivedItem>,
}

impl PermanentPatchSet {
    /// Returns false if this sequence is already recorded
    pub fn insert(&mut self, item: ReceivedItem) -> bool {
        self.items.insert(item.sequence, item).is_none()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceivedItem> {
        self.items.values()
    }

    /// Summed permanent offset for one stat
    pub fn total(&self, stat: Stat) -> f32 {
        self.items
            .values()
            .filter(|item| item.kind.stats().contains(&stat))
            .map(|item| item.magnitude)
            .sum()
    }

    /// Stats with any permanent contribution
    pub fn stats(&self) -> BTreeSet<Stat> {
        self.items.values().flat_map(|item| item.kind.stats()).collect()
    }
}

/// Result of offering an item to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    Queued,
    /// Already queued or recorded under this sequence
    Duplicate,
    /// At or below the watermark; dropped
    AlreadyApplied,
    /// Permanent item below the watermark, recorded for the next run start
    Restored,
}

#[derive(Debug, Clone, Copy)]
struct PlannedWrite {
    entry: AddressEntry,
    old: f32,
    new: f32,
}

/// Writes done for one batch of queued items
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Items whose effect was committed, in order
    pub applied: Vec<ReceivedItem>,
    /// The item that stopped the batch and why
    pub failed: Option<(u64, BridgeError)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Written,
    NoEffect,
    Skipped(String),
}

pub struct ItemApplyEngine {
    table: Arc<AddressTable>,
}

impl ItemApplyEngine {
    pub fn new(table: Arc<AddressTable>) -> Self {
        Self { table }
    }

    /// Accept an inbound item, deduplicating against the watermark and queue
    pub fn receive(&self, ctx: &mut SessionContext, item: ReceivedItem) -> Intake {
        if item.sequence <= ctx.watermark() {
            if !item.permanent {
                return Intake::AlreadyApplied;
            }
            return if ctx.permanent.insert(item) {
                Intake::Restored
            } else {
                Intake::Duplicate
            };
        }

        if ctx.queue.push(item) {
            debug!(sequence = item.sequence, item = item.name(), "item queued");
            Intake::Queued
        } else {
            Intake::Duplicate
        }
    }

    /// Rewrite every stat with a permanent contribution to baseline + total.
    ///
    /// Absolute writes, so two run starts in a row land on the same values.
    pub fn on_run_start(
        &self,
        permanent: &PermanentPatchSet,
        port: &mut dyn ProcessMemory,
    ) -> Result<usize, BridgeError> {
        let mut plan = Vec::new();
        for stat in permanent.stats() {
            let entry = *self.table.resolve(Field::Patch(stat))?;
            let old = port.read_entry_f32(&entry)?;
            let new = self.clamp(stat.baseline() + permanent.total(stat));
            plan.push(PlannedWrite { entry, old, new });
        }

        commit(port, &plan)?;
        if !plan.is_empty() {
            info!(
                stats = plan.len(),
                items = permanent.len(),
                "permanent patches re-applied"
            );
        }
        Ok(plan.len())
    }

    /// Apply queued items in sequence order while a run is active.
    ///
    /// Returns the sequence numbers applied. On error the failing item is
    /// left `Queued` and everything before it stays applied.
    pub fn drain(
        &self,
        ctx: &mut SessionContext,
        port: &mut dyn ProcessMemory,
        mode: GameMode,
    ) -> Result<Vec<u64>, BridgeError> {
        if !mode.is_running() {
            return Ok(Vec::new());
        }
        let batch = self.take_batch(ctx);
        let result = self.apply_batch(port, &batch);
        self.settle(ctx, result)
    }

    /// Hand out everything queued for writing. Items stay in the queue as
    /// `Eligible` until [`settle`](Self::settle) records the outcome.
    pub fn take_batch(&self, ctx: &mut SessionContext) -> Vec<ReceivedItem> {
        ctx.queue.mark_eligible()
    }

    /// Write a batch without touching the session; stops at the first failure
    pub fn apply_batch(&self, port: &mut dyn ProcessMemory, batch: &[ReceivedItem]) -> BatchResult {
        let mut result = BatchResult::default();
        for item in batch {
            match self.apply(port, item) {
                Ok(outcome) => {
                    match outcome {
                        Outcome::Written => {
                            info!(sequence = item.sequence, item = item.name(), "item applied")
                        }
                        Outcome::NoEffect => {
                            debug!(sequence = item.sequence, item = item.name(), "item has no memory effect")
                        }
                        Outcome::Skipped(reason) => warn!(
                            sequence = item.sequence,
                            item = item.name(),
                            %reason,
                            "item effect could not be written, dropping"
                        ),
                    }
                    result.applied.push(*item);
                }
                Err(err) => {
                    warn!(sequence = item.sequence, error = %err, "item application failed");
                    result.failed = Some((item.sequence, err));
                    break;
                }
            }
        }
        result
    }

    /// Commit a batch result to the session.
    ///
    /// Applied items leave the queue by sequence number, so a redelivery
    /// that replaced the queue meanwhile does not bring them back.
    pub fn settle(&self, ctx: &mut SessionContext, result: BatchResult) -> Result<Vec<u64>, BridgeError> {
        let mut applied = Vec::with_capacity(result.applied.len());
        for item in result.applied {
            ctx.queue.remove(item.sequence);
            if item.permanent {
                ctx.permanent.insert(item);
            }
            ctx.advance_watermark(item.sequence);
            applied.push(item.sequence);
        }
        ctx.queue.requeue_eligible();

        match result.failed {
            Some((_, err)) => Err(err),
            None => Ok(applied),
        }
    }

    fn apply(&self, port: &mut dyn ProcessMemory, item: &ReceivedItem) -> Result<Outcome, BridgeError> {
        match item.kind {
            PatchKind::Stat(_) | PatchKind::AllStats => {
                let mut plan = Vec::new();
                for stat in item.kind.stats() {
                    let entry = *self.table.resolve(Field::Patch(stat))?;
                    let old = port.read_entry_f32(&entry)?;
                    let new = self.clamp(old + item.magnitude);
                    plan.push(PlannedWrite { entry, old, new });
                }
                commit(port, &plan)?;
                Ok(Outcome::Written)
            }
            PatchKind::MachineHealth(target) => self.apply_health(port, target),
            PatchKind::CheckboxReward | PatchKind::Unrecognized => Ok(Outcome::NoEffect),
        }
    }

    fn apply_health(
        &self,
        port: &mut dyn ProcessMemory,
        target: HealthTarget,
    ) -> Result<Outcome, BridgeError> {
        let entry = match self.table.resolve(Field::MachineHp) {
            Ok(entry) => *entry,
            Err(err) => return Ok(Outcome::Skipped(err.to_string())),
        };

        let value = match target {
            HealthTarget::One => 1.0,
            HealthTarget::Full => {
                let max = match self.table.resolve(Field::MaxHp) {
                    Ok(entry) => *entry,
                    Err(err) => return Ok(Outcome::Skipped(err.to_string())),
                };
                port.read_entry_f32(&max)?
            }
        };

        match port.write_entry_f32(&entry, value) {
            Ok(_) => Ok(Outcome::Written),
            Err(MemoryError::NotAttached) => Err(BridgeError::NotAttached),
            Err(err) => Ok(Outcome::Skipped(err.to_string())),
        }
    }

    fn clamp(&self, value: f32) -> f32 {
        match self.table.stat_range() {
            Some((lo, hi)) => value.clamp(lo, hi),
            None => value,
        }
    }
}

/// Write a plan; on failure put back what was already written
fn commit(port: &mut dyn ProcessMemory, plan: &[PlannedWrite]) -> Result<(), BridgeError> {
    for (i, write) in plan.iter().enumerate() {
        if let Err(err) = port.write_entry_f32(&write.entry, write.new) {
            for done in plan[..i].iter().rev() {
                if let Err(undo) = port.write_entry_f32(&done.entry, done.old) {
                    warn!(address = done.entry.address, error = %undo, "rollback write failed");
                }
            }
            return Err(match err {
                MemoryError::NotAttached => BridgeError::NotAttached,
                other => BridgeError::rejected(write.entry.address, &other),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PATCH_BOOST_ADDR;
    use crate::memory::MockProcessMemory;

    fn setup() -> (Arc<AddressTable>, ItemApplyEngine, MockProcessMemory, SessionContext) {
        let table = Arc::new(AddressTable::builtin("gkye01").unwrap());
        let engine = ItemApplyEngine::new(table.clone());
        let mem = MockProcessMemory::for_table(&table);
        (table, engine, mem, SessionContext::new(0))
    }

    fn item(sequence: u64, stat: Stat, magnitude: f32, permanent: bool) -> ReceivedItem {
        ReceivedItem {
            item_id: 30,
            kind: PatchKind::Stat(stat),
            magnitude,
            permanent,
            sequence,
        }
    }

    fn boost_offset(table: &AddressTable, mem: &MockProcessMemory) -> f32 {
        mem.field_f32(table, Field::Patch(Stat::Boost)) - Stat::Boost.baseline()
    }

    #[test]
    fn test_item_waits_for_run_then_applies_once() {
        let (table, engine, mut mem, mut ctx) = setup();
        assert_eq!(engine.receive(&mut ctx, item(1, Stat::Boost, 5.0, false)), Intake::Queued);

        for _ in 0..3 {
            let applied = engine.drain(&mut ctx, &mut mem, GameMode::Menu).unwrap();
            assert!(applied.is_empty());
        }
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.queue.iter().next().unwrap().state, ItemState::Queued);

        let applied = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(applied, vec![1]);
        assert_eq!(boost_offset(&table, &mem), 5.0);
        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.watermark(), 1);

        let again = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(boost_offset(&table, &mem), 5.0);
    }

    #[test]
    fn test_drain_in_sequence_order() {
        let (_, engine, mut mem, mut ctx) = setup();
        engine.receive(&mut ctx, item(3, Stat::Turn, 1.0, false));
        engine.receive(&mut ctx, item(1, Stat::Glide, 1.0, false));
        engine.receive(&mut ctx, item(2, Stat::Boost, 1.0, false));

        let applied = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(applied, vec![1, 2, 3]);
    }

    #[test]
    fn test_permanent_reapplied_not_accumulated() {
        let (table, engine, mut mem, mut ctx) = setup();
        engine.receive(&mut ctx, item(1, Stat::Boost, 3.0, true));

        // First run: nothing permanent yet, then the item drains
        engine.on_run_start(&ctx.permanent, &mut mem).unwrap();
        engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(boost_offset(&table, &mem), 3.0);
        assert_eq!(ctx.permanent.len(), 1);

        // Two further run starts without the game resetting memory
        engine.on_run_start(&ctx.permanent, &mut mem).unwrap();
        assert_eq!(boost_offset(&table, &mem), 3.0);
        engine.on_run_start(&ctx.permanent, &mut mem).unwrap();
        assert_eq!(boost_offset(&table, &mem), 3.0);
    }

    #[test]
    fn test_run_start_writes_before_new_items() {
        let (table, engine, mut mem, mut ctx) = setup();
        ctx.permanent.insert(item(1, Stat::Boost, 3.0, true));
        ctx.advance_watermark(1);
        engine.receive(&mut ctx, item(2, Stat::Boost, 5.0, false));

        engine.on_run_start(&ctx.permanent, &mut mem).unwrap();
        engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();

        let boost_writes: Vec<f32> = mem
            .writes
            .iter()
            .filter(|(addr, _)| *addr == PATCH_BOOST_ADDR)
            .map(|(_, bytes)| table.endian().read_f32(bytes))
            .collect();
        assert_eq!(boost_writes, vec![1.0, 6.0]);
        assert_eq!(boost_offset(&table, &mem), 8.0);
    }

    #[test]
    fn test_redelivery_dedup_against_watermark() {
        let (_, engine, _, _) = setup();
        let mut ctx = SessionContext::new(2);

        assert_eq!(
            engine.receive(&mut ctx, item(1, Stat::Boost, 1.0, false)),
            Intake::AlreadyApplied
        );
        assert_eq!(
            engine.receive(&mut ctx, item(2, Stat::Turn, 1.0, true)),
            Intake::Restored
        );
        assert_eq!(
            engine.receive(&mut ctx, item(2, Stat::Turn, 1.0, true)),
            Intake::Duplicate
        );
        assert_eq!(
            engine.receive(&mut ctx, item(3, Stat::Glide, 1.0, false)),
            Intake::Queued
        );
        assert_eq!(
            engine.receive(&mut ctx, item(3, Stat::Glide, 1.0, false)),
            Intake::Duplicate
        );

        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.permanent.total(Stat::Turn), 1.0);
    }

    #[test]
    fn test_failed_multi_stat_write_rolls_back() {
        let (table, engine, mut mem, mut ctx) = setup();
        let defense = *table.resolve(Field::Patch(Stat::Defense)).unwrap();
        mem.protect(defense.address..defense.address + 4);

        engine.receive(&mut ctx, ReceivedItem::from_code(57, 1));
        let err = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap_err();
        assert!(matches!(err, BridgeError::WriteRejected { .. }));

        for stat in Stat::ALL {
            assert_eq!(mem.field_f32(&table, Field::Patch(stat)), stat.baseline());
        }
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.queue.iter().next().unwrap().state, ItemState::Queued);
        assert_eq!(ctx.watermark(), 0);
    }

    #[test]
    fn test_not_attached_keeps_item_queued() {
        let (_, engine, mut mem, mut ctx) = setup();
        engine.receive(&mut ctx, item(1, Stat::Boost, 1.0, false));
        mem.set_available(false);

        let err = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotAttached));
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_health_effects() {
        let (table, engine, mut mem, mut ctx) = setup();
        mem.place_machine(&table, 0x8100_0000, 80.0);
        mem.set_field_f32(&table, Field::MaxHp, 150.0);

        engine.receive(&mut ctx, ReceivedItem::from_code(97, 1));
        engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(mem.field_f32(&table, Field::MachineHp), 150.0);

        engine.receive(&mut ctx, ReceivedItem::from_code(96, 2));
        engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(mem.field_f32(&table, Field::MachineHp), 1.0);
    }

    #[test]
    fn test_health_effect_without_machine_is_dropped() {
        let (_, engine, mut mem, mut ctx) = setup();
        engine.receive(&mut ctx, ReceivedItem::from_code(96, 1));

        let applied = engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(applied, vec![1]);
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_clamped_to_platform_range() {
        let mut table = AddressTable::builtin("gkye01").unwrap();
        table.set_stat_range(Some((-2.0, 4.0)));
        let table = Arc::new(table);
        let engine = ItemApplyEngine::new(table.clone());
        let mut mem = MockProcessMemory::for_table(&table);
        let mut ctx = SessionContext::new(0);

        engine.receive(&mut ctx, item(1, Stat::Boost, 10.0, false));
        engine
            .drain(&mut ctx, &mut mem, GameMode::CityTrialRunning)
            .unwrap();
        assert_eq!(mem.field_f32(&table, Field::Patch(Stat::Boost)), 4.0);
    }

    #[test]
    fn test_settle_after_redelivery_does_not_reapply() {
        let (table, engine, mut mem, mut ctx) = setup();
        engine.receive(&mut ctx, item(1, Stat::Boost, 2.0, false));

        let batch = engine.take_batch(&mut ctx);
        assert_eq!(ctx.queue.iter().next().unwrap().state, ItemState::Eligible);
        let result = engine.apply_batch(&mut mem, &batch);

        // Full redelivery arrives while the write is in flight
        ctx.reset_items();
        engine.receive(&mut ctx, item(1, Stat::Boost, 2.0, false));
        engine.receive(&mut ctx, item(2, Stat::Turn, 1.0, false));

        assert_eq!(engine.settle(&mut ctx, result).unwrap(), vec![1]);
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.queue.iter().next().unwrap().item.sequence, 2);
        assert_eq!(ctx.queue.iter().next().unwrap().state, ItemState::Queued);
        assert_eq!(boost_offset(&table, &mem), 2.0);
    }
}
