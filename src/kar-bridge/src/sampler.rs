//! State Sampler
//!
//! Reads every mapped field once per tick, decodes it into a [`GameState`],
//! and diffs it against the previous snapshot to find transitions.

use crate::address::{AddressEntry, AddressTable, Field};
use crate::error::{AddressError, BridgeError};
use crate::memory::ProcessMemory;
use crate::state::{Checklist, GameMode, GameState, Stat, StatModifiers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// HP hysteresis band for death detection.
///
/// HP reads are noisy near zero, so a death needs HP at or below
/// `dead_below` and the next life needs HP back at or above `alive_above`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBand {
    pub dead_below: f32,
    pub alive_above: f32,
}

impl Default for HealthBand {
    fn default() -> Self {
        Self {
            dead_below: 0.5,
            alive_above: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SamplerStatus {
    Attached,
    #[default]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    ModeChanged { from: GameMode, to: GameMode },
    /// Any non-running mode to `CityTrialRunning`
    RunStarted,
    RunEnded,
    Died,
    Revived,
}

/// One sampling result
#[derive(Debug, Clone)]
pub struct Sample {
    pub previous: Option<GameState>,
    pub current: GameState,
    pub transitions: Vec<Transition>,
}

impl Sample {
    pub fn has(&self, transition: Transition) -> bool {
        self.transitions.contains(&transition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Life {
    Alive,
    Dead,
}

pub struct StateSampler {
    table: Arc<AddressTable>,
    band: HealthBand,
    grace_ticks: u64,
    tick: u64,
    previous: Option<GameState>,
    life: Life,
    run_started: Option<u64>,
}

impl StateSampler {
    pub fn new(table: Arc<AddressTable>, band: HealthBand, grace_ticks: u64) -> Self {
        Self {
            table,
            band,
            grace_ticks,
            tick: 0,
            previous: None,
            life: Life::Alive,
            run_started: None,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn previous(&self) -> Option<&GameState> {
        self.previous.as_ref()
    }

    /// Forget the previous snapshot, e.g. after the process went away.
    ///
    /// The next sample is treated as the first one: no run start is
    /// reported for it and every completed box counts as newly set.
    pub fn reset(&mut self) {
        self.previous = None;
        self.life = Life::Alive;
        self.run_started = None;
    }

    /// Take one snapshot and diff it against the last one
    pub fn sample(&mut self, port: &dyn ProcessMemory) -> Result<Sample, BridgeError> {
        self.tick += 1;
        let previous_mode = self
            .previous
            .as_ref()
            .map_or(GameMode::Unknown, |s| s.mode);

        let current = match self.read_state(port, previous_mode) {
            Ok(state) => state,
            Err(err) => {
                if matches!(err, BridgeError::NotAttached) {
                    self.reset();
                }
                return Err(err);
            }
        };

        let transitions = self.transitions(&current);
        let previous = self.previous.replace(current.clone());
        Ok(Sample {
            previous,
            current,
            transitions,
        })
    }

    fn transitions(&mut self, current: &GameState) -> Vec<Transition> {
        let mut out = Vec::new();

        match &self.previous {
            Some(prev) => {
                if prev.mode != current.mode {
                    debug!(from = %prev.mode, to = %current.mode, "mode changed");
                    out.push(Transition::ModeChanged {
                        from: prev.mode,
                        to: current.mode,
                    });
                    if !prev.mode.is_running() && current.mode.is_running() {
                        info!(tick = self.tick, "run started");
                        out.push(Transition::RunStarted);
                        self.run_started = Some(self.tick);
                        self.life = Life::Alive;
                    } else if prev.mode.is_running() && !current.mode.is_running() {
                        info!(tick = self.tick, "run ended");
                        out.push(Transition::RunEnded);
                        self.run_started = None;
                    }
                }
            }
            None => {
                // Attached mid-run: start the grace period now
                if current.mode.is_running() {
                    self.run_started = Some(self.tick);
                }
            }
        }

        if let Some(t) = self.life_transition(current) {
            out.push(t);
        }
        out
    }

    fn life_transition(&mut self, current: &GameState) -> Option<Transition> {
        if !current.mode.is_running() {
            self.life = Life::Alive;
            return None;
        }
        if self.in_grace() {
            return None;
        }

        match self.life {
            Life::Alive if current.health <= self.band.dead_below => {
                self.life = Life::Dead;
                Some(Transition::Died)
            }
            Life::Dead if current.health >= self.band.alive_above => {
                self.life = Life::Alive;
                Some(Transition::Revived)
            }
            _ => None,
        }
    }

    /// Deaths are ignored and items wait for a short while after a run start
    pub fn in_grace(&self) -> bool {
        match self.run_started {
            Some(start) => self.tick < start + self.grace_ticks,
            None => true,
        }
    }

    fn read_state(
        &self,
        port: &dyn ProcessMemory,
        previous_mode: GameMode,
    ) -> Result<GameState, BridgeError> {
        let table = &self.table;

        let menu = port.read_entry_u16(table.resolve(Field::MenuSelection)?)?;
        let stage = port.read_entry_u16(table.resolve(Field::StageId)?)?;
        let mode = GameMode::decode(menu, stage, previous_mode);

        let layout = table.checklist()?;
        let raw = port.read_exact(layout.base, usize::from(layout.count))?;
        let checklist = Checklist::from_raw(layout.first_location_id, &raw);

        let vehicle_id = match optional(table.resolve(Field::VehicleId))? {
            Some(entry) => Some(port.read_entry_u16(entry)?),
            None => None,
        };
        let max_health = match optional(table.resolve(Field::MaxHp))? {
            Some(entry) => Some(port.read_entry_f32(entry)?),
            None => None,
        };
        let health = port.read_entry_f32(table.resolve(Field::CurrentHp)?)?;

        let mut stats = StatModifiers::default();
        for stat in Stat::ALL {
            stats.set(stat, port.read_entry_f32(table.resolve(Field::Patch(stat))?)?);
        }

        Ok(GameState {
            tick: self.tick,
            mode,
            checklist,
            vehicle_id,
            health,
            max_health,
            stats,
        })
    }
}

/// Optional fields missing from the profile read as `None`
fn optional(
    resolved: Result<&AddressEntry, AddressError>,
) -> Result<Option<&AddressEntry>, AddressError> {
    match resolved {
        Ok(entry) => Ok(Some(entry)),
        Err(AddressError::UnsupportedPlatform { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CHECKLIST_BASE_ADDR;
    use crate::memory::MockProcessMemory;
    use crate::state::{CITY_TRIAL_STAGE_ID, MENU_AIR_RIDE};

    fn setup(grace: u64) -> (Arc<AddressTable>, StateSampler, MockProcessMemory) {
        let table = Arc::new(AddressTable::builtin("gkye01").unwrap());
        let sampler = StateSampler::new(table.clone(), HealthBand::default(), grace);
        let mem = MockProcessMemory::for_table(&table);
        (table, sampler, mem)
    }

    fn start_run(table: &AddressTable, mem: &mut MockProcessMemory) {
        mem.set_field_u16(table, Field::StageId, CITY_TRIAL_STAGE_ID);
    }

    #[test]
    fn test_first_sample_has_no_run_start() {
        let (table, mut sampler, mut mem) = setup(0);
        start_run(&table, &mut mem);

        let sample = sampler.sample(&mem).unwrap();
        assert!(sample.previous.is_none());
        assert_eq!(sample.current.mode, GameMode::CityTrialRunning);
        assert!(!sample.has(Transition::RunStarted));
    }

    #[test]
    fn test_run_start_and_end() {
        let (table, mut sampler, mut mem) = setup(0);
        sampler.sample(&mem).unwrap();

        start_run(&table, &mut mem);
        let started = sampler.sample(&mem).unwrap();
        assert!(started.has(Transition::RunStarted));
        assert!(started.has(Transition::ModeChanged {
            from: GameMode::Menu,
            to: GameMode::CityTrialRunning,
        }));

        mem.set_field_u16(&table, Field::StageId, 0);
        let ended = sampler.sample(&mem).unwrap();
        assert_eq!(ended.current.mode, GameMode::CityTrialEnded);
        assert!(ended.has(Transition::RunEnded));
    }

    #[test]
    fn test_other_mode_is_not_a_run() {
        let (table, mut sampler, mut mem) = setup(0);
        sampler.sample(&mem).unwrap();

        mem.set_field_u16(&table, Field::MenuSelection, MENU_AIR_RIDE);
        mem.set_field_u16(&table, Field::StageId, 3);
        let sample = sampler.sample(&mem).unwrap();
        assert_eq!(sample.current.mode, GameMode::OtherMinigame);
        assert!(!sample.has(Transition::RunStarted));
    }

    #[test]
    fn test_checkbox_flips_visible_in_sample() {
        let (_, mut sampler, mut mem) = setup(0);
        sampler.sample(&mem).unwrap();

        mem.set_bytes(CHECKLIST_BASE_ADDR + 9, &[0x02]);
        mem.set_bytes(CHECKLIST_BASE_ADDR + 2, &[0x03]);
        // Flagged for unlocking is not completed
        mem.set_bytes(CHECKLIST_BASE_ADDR + 4, &[0x01]);

        let sample = sampler.sample(&mem).unwrap();
        let previous = sample.previous.as_ref().map(|s| &s.checklist);
        assert_eq!(sample.current.checklist.newly_completed(previous), vec![3, 10]);
    }

    #[test]
    fn test_death_hysteresis() {
        let (table, mut sampler, mut mem) = setup(0);
        mem.set_field_f32(&table, Field::CurrentHp, 100.0);
        sampler.sample(&mem).unwrap();
        start_run(&table, &mut mem);
        sampler.sample(&mem).unwrap();

        let mut deaths = 0;
        let mut revives = 0;
        for hp in [0.0, 0.3, 2.0, 0.1, 4.9, 0.0, 60.0, 0.2] {
            mem.set_field_f32(&table, Field::CurrentHp, hp);
            let sample = sampler.sample(&mem).unwrap();
            deaths += sample.transitions.iter().filter(|t| **t == Transition::Died).count();
            revives += sample.transitions.iter().filter(|t| **t == Transition::Revived).count();
        }
        assert_eq!(deaths, 2);
        assert_eq!(revives, 1);
    }

    #[test]
    fn test_no_death_during_grace() {
        let (table, mut sampler, mut mem) = setup(3);
        sampler.sample(&mem).unwrap();
        start_run(&table, &mut mem);

        // HP reads 0 while walking to a machine
        for _ in 0..3 {
            let sample = sampler.sample(&mem).unwrap();
            assert!(!sample.has(Transition::Died));
        }
        let sample = sampler.sample(&mem).unwrap();
        assert!(sample.has(Transition::Died));
    }

    #[test]
    fn test_optional_fields() {
        let (table, mut sampler, mut mem) = setup(0);
        mem.set_field_f32(&table, Field::MaxHp, 120.0);

        let sample = sampler.sample(&mem).unwrap();
        assert_eq!(sample.current.vehicle_id, None);
        assert_eq!(sample.current.max_health, Some(120.0));
        assert_eq!(sample.current.stats.offset(Stat::Boost), 0.0);
    }

    #[test]
    fn test_not_attached_resets_history() {
        let (_, mut sampler, mut mem) = setup(0);
        sampler.sample(&mem).unwrap();
        assert!(sampler.previous().is_some());

        mem.set_available(false);
        let err = sampler.sample(&mem).unwrap_err();
        assert!(matches!(err, BridgeError::NotAttached));
        assert!(sampler.previous().is_none());
    }
}
