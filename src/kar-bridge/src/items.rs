//! Received items and the catalog of their in-game effects.

use crate::state::Stat;
use serde::{Deserialize, Serialize};

/// Item codes at or above this are checklist box rewards (location id + 500)
pub const CHECKBOX_REWARD_BASE: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthTarget {
    /// Machine HP set to 1
    One,
    /// Machine HP set to the current max HP
    Full,
}

/// What an item does when applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    /// Additive change to one patch count
    Stat(Stat),
    /// Additive change to every patch count
    AllStats,
    /// Direct write of the ridden machine's HP
    MachineHealth(HealthTarget),
    /// Unlock reward for a checklist box; nothing to write
    CheckboxReward,
    /// Code the catalog does not know
    Unrecognized,
}

impl PatchKind {
    /// Stats an application of this kind touches
    pub fn stats(self) -> Vec<Stat> {
        match self {
            PatchKind::Stat(stat) => vec![stat],
            PatchKind::AllStats => Stat::ALL.to_vec(),
            _ => Vec::new(),
        }
    }
}

/// An item as delivered by the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceivedItem {
    pub item_id: i64,
    pub kind: PatchKind,
    pub magnitude: f32,
    pub permanent: bool,
    /// 1-based position in the slot's received-items list
    pub sequence: u64,
}

impl ReceivedItem {
    /// Build from a catalog code
    pub fn from_code(item_id: i64, sequence: u64) -> Self {
        match catalog_entry(item_id) {
            Some(entry) => Self {
                item_id,
                kind: entry.kind,
                magnitude: entry.magnitude,
                permanent: entry.permanent,
                sequence,
            },
            None if item_id >= CHECKBOX_REWARD_BASE => Self {
                item_id,
                kind: PatchKind::CheckboxReward,
                magnitude: 0.0,
                permanent: false,
                sequence,
            },
            None => Self {
                item_id,
                kind: PatchKind::Unrecognized,
                magnitude: 0.0,
                permanent: false,
                sequence,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match catalog_entry(self.item_id) {
            Some(entry) => entry.name,
            None if self.kind == PatchKind::CheckboxReward => "Checkbox Reward",
            None => "Unknown Item",
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    pub code: i64,
    pub name: &'static str,
    pub kind: PatchKind,
    pub magnitude: f32,
    pub permanent: bool,
}

const fn patch(code: i64, name: &'static str, stat: Stat, magnitude: f32) -> CatalogEntry {
    CatalogEntry {
        code,
        name,
        kind: PatchKind::Stat(stat),
        magnitude,
        permanent: false,
    }
}

const fn permanent(code: i64, name: &'static str, stat: Stat) -> CatalogEntry {
    CatalogEntry {
        code,
        name,
        kind: PatchKind::Stat(stat),
        magnitude: 1.0,
        permanent: true,
    }
}

/// Every item code the client knows how to apply
pub const ITEM_CATALOG: &[CatalogEntry] = &[
    patch(30, "Boost Up", Stat::Boost, 1.0),
    patch(31, "Boost Down", Stat::Boost, -1.0),
    patch(32, "Top Speed Up", Stat::TopSpeed, 1.0),
    patch(33, "Top Speed Down", Stat::TopSpeed, -1.0),
    patch(34, "Offense Up", Stat::Offense, 1.0),
    patch(35, "Offense Down", Stat::Offense, -1.0),
    patch(36, "Defense Up", Stat::Defense, 1.0),
    patch(37, "Defense Down", Stat::Defense, -1.0),
    patch(38, "Turn Up", Stat::Turn, 1.0),
    patch(39, "Turn Down", Stat::Turn, -1.0),
    patch(40, "Glide Up", Stat::Glide, 1.0),
    patch(41, "Glide Down", Stat::Glide, -1.0),
    patch(42, "Charge Up", Stat::Charge, 1.0),
    patch(43, "Charge Down", Stat::Charge, -1.0),
    patch(44, "Weight Up", Stat::Weight, 1.0),
    patch(45, "Weight Down", Stat::Weight, -1.0),
    patch(46, "HP Up", Stat::Hp, 1.0),
    patch(47, "HP Down", Stat::Hp, -1.0),
    permanent(48, "Boost Up: Permanent +1", Stat::Boost),
    permanent(49, "Top Speed Up: Permanent +1", Stat::TopSpeed),
    permanent(50, "Offense Up: Permanent +1", Stat::Offense),
    permanent(51, "Defense Up: Permanent +1", Stat::Defense),
    permanent(52, "Turn Up: Permanent +1", Stat::Turn),
    permanent(53, "Glide Up: Permanent +1", Stat::Glide),
    permanent(54, "Charge Up: Permanent +1", Stat::Charge),
    permanent(55, "Weight Up: Permanent +1", Stat::Weight),
    permanent(56, "HP Up: Permanent +1", Stat::Hp),
    CatalogEntry {
        code: 57,
        name: "All Up",
        kind: PatchKind::AllStats,
        magnitude: 1.0,
        permanent: false,
    },
    CatalogEntry {
        code: 96,
        name: "1 HP",
        kind: PatchKind::MachineHealth(HealthTarget::One),
        magnitude: 0.0,
        permanent: false,
    },
    CatalogEntry {
        code: 97,
        name: "Full Heal",
        kind: PatchKind::MachineHealth(HealthTarget::Full),
        magnitude: 0.0,
        permanent: false,
    },
];

/// Look up an item code
pub fn catalog_entry(code: i64) -> Option<&'static CatalogEntry> {
    ITEM_CATALOG.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_codes_unique() {
        for (i, a) in ITEM_CATALOG.iter().enumerate() {
            for b in &ITEM_CATALOG[i + 1..] {
                assert_ne!(a.code, b.code, "{} and {} share a code", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_patch_item_from_code() {
        let item = ReceivedItem::from_code(31, 4);
        assert_eq!(item.kind, PatchKind::Stat(Stat::Boost));
        assert_eq!(item.magnitude, -1.0);
        assert!(!item.permanent);
        assert_eq!(item.sequence, 4);
        assert_eq!(item.name(), "Boost Down");
    }

    #[test]
    fn test_permanent_items() {
        for code in 48..=56 {
            let item = ReceivedItem::from_code(code, 1);
            assert!(item.permanent, "code {} should be permanent", code);
            assert_eq!(item.magnitude, 1.0);
        }
    }

    #[test]
    fn test_all_up_touches_every_stat() {
        let item = ReceivedItem::from_code(57, 1);
        assert_eq!(item.kind.stats().len(), Stat::ALL.len());
    }

    #[test]
    fn test_checkbox_reward_and_unknown_codes() {
        let reward = ReceivedItem::from_code(512, 1);
        assert_eq!(reward.kind, PatchKind::CheckboxReward);
        assert!(reward.kind.stats().is_empty());

        let unknown = ReceivedItem::from_code(3, 1);
        assert_eq!(unknown.kind, PatchKind::Unrecognized);
        assert_eq!(unknown.name(), "Unknown Item");
    }
}
