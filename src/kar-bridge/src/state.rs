//! Typed game state snapshots.
//!
//! A [`GameState`] is captured once per sampling tick and replaced on the
//! next one. Only the fields the bridge reads, tracks or mutates are modeled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Mode
// ============================================================================

/// Menu selection values (high byte of the menu word)
pub const MENU_AIR_RIDE: u16 = 0x0000;
pub const MENU_TOP_RIDE: u16 = 0x0100;
pub const MENU_CITY_TRIAL: u16 = 0x0200;
pub const MENU_OPTIONS: u16 = 0x0300;
pub const MENU_LAN: u16 = 0x0400;

/// Stage id of the City Trial city
pub const CITY_TRIAL_STAGE_ID: u16 = 0x0009;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    Unknown,
    Menu,
    CityTrialRunning,
    CityTrialEnded,
    Stadium,
    OtherMinigame,
}

impl GameMode {
    /// Decode the mode from the menu selection and current stage words.
    ///
    /// `previous` only matters for telling a finished run apart from the
    /// City Trial menu: both read as "City Trial selected, no stage".
    pub fn decode(menu: u16, stage: u16, previous: GameMode) -> GameMode {
        match menu {
            MENU_CITY_TRIAL => match stage {
                CITY_TRIAL_STAGE_ID => GameMode::CityTrialRunning,
                0 if matches!(
                    previous,
                    GameMode::CityTrialRunning | GameMode::CityTrialEnded
                ) =>
                {
                    GameMode::CityTrialEnded
                }
                0 => GameMode::Menu,
                _ => GameMode::Stadium,
            },
            MENU_AIR_RIDE | MENU_TOP_RIDE if stage != 0 => GameMode::OtherMinigame,
            MENU_AIR_RIDE | MENU_TOP_RIDE | MENU_OPTIONS | MENU_LAN => GameMode::Menu,
            _ => GameMode::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        self == GameMode::CityTrialRunning
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameMode::Unknown => "unknown",
            GameMode::Menu => "menu",
            GameMode::CityTrialRunning => "city trial (running)",
            GameMode::CityTrialEnded => "city trial (ended)",
            GameMode::Stadium => "stadium",
            GameMode::OtherMinigame => "other mode",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Machine stats that patches modify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Weight,
    Boost,
    TopSpeed,
    Turn,
    Charge,
    Glide,
    Offense,
    Defense,
    Hp,
}

impl Stat {
    pub const ALL: [Stat; 9] = [
        Stat::Weight,
        Stat::Boost,
        Stat::TopSpeed,
        Stat::Turn,
        Stat::Charge,
        Stat::Glide,
        Stat::Offense,
        Stat::Defense,
        Stat::Hp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::Weight => "weight",
            Stat::Boost => "boost",
            Stat::TopSpeed => "top_speed",
            Stat::Turn => "turn",
            Stat::Charge => "charge",
            Stat::Glide => "glide",
            Stat::Offense => "offense",
            Stat::Defense => "defense",
            Stat::Hp => "hp",
        }
    }

    pub fn from_name(name: &str) -> Option<Stat> {
        Stat::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Patch count the game writes at the start of every run.
    ///
    /// Every stat starts two patches below neutral except HP.
    pub fn baseline(self) -> f32 {
        match self {
            Stat::Hp => 0.0,
            _ => -2.0,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw patch counts as read from memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatModifiers {
    values: [f32; 9],
}

impl Default for StatModifiers {
    fn default() -> Self {
        let mut values = [0.0; 9];
        for stat in Stat::ALL {
            values[stat.index()] = stat.baseline();
        }
        Self { values }
    }
}

impl StatModifiers {
    pub fn get(&self, stat: Stat) -> f32 {
        self.values[stat.index()]
    }

    pub fn set(&mut self, stat: Stat, value: f32) {
        self.values[stat.index()] = value;
    }

    /// Offset from the run baseline
    pub fn offset(&self, stat: Stat) -> f32 {
        self.get(stat) - stat.baseline()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stat, f32)> + '_ {
        Stat::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}

// ============================================================================
// Checklist
// ============================================================================

/// Whether a raw checklist byte means "completed".
///
/// The game uses 0x00 (locked, hidden), 0x01 (flagged for unlocking) and
/// 0x10 (locked, visible) for boxes that are not filled in yet.
pub fn box_completed(raw: u8) -> bool {
    !matches!(raw, 0x00 | 0x01 | 0x10)
}

/// Checklist boxes keyed by their stable location id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    boxes: BTreeMap<i64, bool>,
}

impl Checklist {
    /// Build from raw bytes, one per box, starting at `first_id`
    pub fn from_raw(first_id: i64, raw: &[u8]) -> Self {
        let boxes = raw
            .iter()
            .enumerate()
            .map(|(i, &b)| (first_id + i as i64, box_completed(b)))
            .collect();
        Self { boxes }
    }

    pub fn is_complete(&self, id: i64) -> bool {
        self.boxes.get(&id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Completed box ids in ascending order
    pub fn completed(&self) -> impl Iterator<Item = i64> + '_ {
        self.boxes.iter().filter(|(_, &done)| done).map(|(&id, _)| id)
    }

    /// Boxes complete here but not in `previous`, ascending.
    ///
    /// With no previous snapshot every completed box counts as new.
    pub fn newly_completed(&self, previous: Option<&Checklist>) -> Vec<i64> {
        self.completed()
            .filter(|&id| previous.map_or(true, |p| !p.is_complete(id)))
            .collect()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Observable game fields at one sampling instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub tick: u64,
    pub mode: GameMode,
    pub checklist: Checklist,
    pub vehicle_id: Option<u16>,
    pub health: f32,
    pub max_health: Option<f32>,
    pub stats: StatModifiers,
}

impl GameState {
    /// A menu-state snapshot with baseline stats
    pub fn empty(tick: u64) -> Self {
        Self {
            tick,
            mode: GameMode::Menu,
            checklist: Checklist::default(),
            vehicle_id: None,
            health: 0.0,
            max_health: None,
            stats: StatModifiers::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_running() {
        let mode = GameMode::decode(MENU_CITY_TRIAL, CITY_TRIAL_STAGE_ID, GameMode::Menu);
        assert_eq!(mode, GameMode::CityTrialRunning);
        assert!(mode.is_running());
    }

    #[test]
    fn test_decode_city_trial_menu_vs_ended() {
        assert_eq!(
            GameMode::decode(MENU_CITY_TRIAL, 0, GameMode::Menu),
            GameMode::Menu
        );
        assert_eq!(
            GameMode::decode(MENU_CITY_TRIAL, 0, GameMode::CityTrialRunning),
            GameMode::CityTrialEnded
        );
        assert_eq!(
            GameMode::decode(MENU_CITY_TRIAL, 0, GameMode::CityTrialEnded),
            GameMode::CityTrialEnded
        );
    }

    #[test]
    fn test_decode_other_modes() {
        assert_eq!(
            GameMode::decode(MENU_CITY_TRIAL, 0x0021, GameMode::CityTrialEnded),
            GameMode::Stadium
        );
        assert_eq!(
            GameMode::decode(MENU_AIR_RIDE, 0x0003, GameMode::Menu),
            GameMode::OtherMinigame
        );
        assert_eq!(GameMode::decode(MENU_OPTIONS, 0, GameMode::Menu), GameMode::Menu);
        assert_eq!(GameMode::decode(0xFFFF, 0, GameMode::Menu), GameMode::Unknown);
    }

    #[test]
    fn test_box_completed_values() {
        assert!(!box_completed(0x00));
        assert!(!box_completed(0x01));
        assert!(!box_completed(0x10));
        assert!(box_completed(0x11));
        assert!(box_completed(0x02));
    }

    #[test]
    fn test_checklist_newly_completed_sorted() {
        let before = Checklist::from_raw(100, &[0x00, 0x11, 0x00, 0x00]);
        let after = Checklist::from_raw(100, &[0x11, 0x11, 0x00, 0x11]);

        assert_eq!(after.newly_completed(Some(&before)), vec![100, 103]);
        assert_eq!(after.newly_completed(None), vec![100, 101, 103]);
    }

    #[test]
    fn test_stat_baseline_and_offset() {
        let mut stats = StatModifiers::default();
        assert_eq!(stats.get(Stat::Boost), -2.0);
        assert_eq!(stats.get(Stat::Hp), 0.0);

        stats.set(Stat::Boost, 3.0);
        assert_eq!(stats.offset(Stat::Boost), 5.0);
    }

    #[test]
    fn test_stat_names_roundtrip() {
        for stat in Stat::ALL {
            assert_eq!(Stat::from_name(stat.name()), Some(stat));
        }
        assert_eq!(Stat::from_name("speed"), None);
    }
}
