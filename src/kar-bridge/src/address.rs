//! Address Table
//!
//! Per-platform map of symbolic game fields to console addresses, widths and
//! byte order. Pure data: nothing in here touches process memory.

use crate::error::AddressError;
use crate::state::Stat;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Known addresses (NTSC-U, GKYE01)
// ============================================================================

pub const GAME_ID_ADDR: u32 = 0x8000_0000;
/// Currently selected top-level menu
pub const MENU_SELECTION_ADDR: u32 = 0x8053_5A0C;
/// Low word of the current stage id (9 only while the city is loaded)
pub const STAGE_ID_ADDR: u32 = 0x8133_3A66;
/// Player 1 HP as shown on the HUD; 0 while off a machine
pub const CURRENT_HP_ADDR: u32 = 0x8055_AA24;
/// Player 1 max HP, rewritten by the game every frame
pub const MAX_HP_ADDR: u32 = 0x8055_AA28;
/// Pointer to the current machine; HP lives at `MACHINE_HP_OFFSET` past it
pub const MACHINE_PTR_ADDR: u32 = 0x8055_AA30;
pub const MACHINE_HP_OFFSET: u32 = 0xA78;

/// Player 1 patch counts
pub const PATCH_WEIGHT_ADDR: u32 = 0x8157_862C;
pub const PATCH_BOOST_ADDR: u32 = 0x8157_8630;
pub const PATCH_TOP_SPEED_ADDR: u32 = 0x8157_8634;
pub const PATCH_TURN_ADDR: u32 = 0x8157_8638;
pub const PATCH_CHARGE_ADDR: u32 = 0x8157_863C;
pub const PATCH_GLIDE_ADDR: u32 = 0x8157_8640;
pub const PATCH_OFFENSE_ADDR: u32 = 0x8157_8644;
pub const PATCH_DEFENSE_ADDR: u32 = 0x8157_8648;
pub const PATCH_HP_ADDR: u32 = 0x8157_864C;

/// City Trial checklist, one status byte per box.
// TODO: confirm against the location table of the generator; overridable via [checklist]
pub const CHECKLIST_BASE_ADDR: u32 = 0x8053_6A40;
pub const CHECKLIST_BOX_COUNT: u16 = 120;
pub const CHECKLIST_FIRST_LOCATION_ID: i64 = 1;

pub const NTSC_U_GAME_ID: &str = "GKYE01";

/// Names of the built-in platform profiles
pub const BUILTIN_PROFILES: &[&str] = &["gkye01", "gkye01-host"];

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            Endianness::Big => BigEndian::read_u16(bytes),
            Endianness::Little => LittleEndian::read_u16(bytes),
        }
    }

    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            Endianness::Big => BigEndian::read_u32(bytes),
            Endianness::Little => LittleEndian::read_u32(bytes),
        }
    }

    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Endianness::Big => BigEndian::read_f32(bytes),
            Endianness::Little => LittleEndian::read_f32(bytes),
        }
    }

    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        let mut buf = [0u8; 2];
        match self {
            Endianness::Big => BigEndian::write_u16(&mut buf, value),
            Endianness::Little => LittleEndian::write_u16(&mut buf, value),
        }
        buf
    }

    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        let mut buf = [0u8; 4];
        match self {
            Endianness::Big => BigEndian::write_u32(&mut buf, value),
            Endianness::Little => LittleEndian::write_u32(&mut buf, value),
        }
        buf
    }

    pub fn encode_f32(self, value: f32) -> [u8; 4] {
        let mut buf = [0u8; 4];
        match self {
            Endianness::Big => BigEndian::write_f32(&mut buf, value),
            Endianness::Little => LittleEndian::write_f32(&mut buf, value),
        }
        buf
    }
}

/// Symbolic state fields the bridge knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    GameId,
    MenuSelection,
    StageId,
    CurrentHp,
    MaxHp,
    /// Writable HP of the machine the player rides (pointer-chased)
    MachineHp,
    VehicleId,
    Patch(Stat),
    Checklist,
}

impl Field {
    /// Every field that can be named in configuration
    pub fn all() -> Vec<Field> {
        let mut fields = vec![
            Field::GameId,
            Field::MenuSelection,
            Field::StageId,
            Field::CurrentHp,
            Field::MaxHp,
            Field::MachineHp,
            Field::VehicleId,
        ];
        fields.extend(Stat::ALL.into_iter().map(Field::Patch));
        fields
    }

    pub fn name(self) -> String {
        match self {
            Field::GameId => "game_id".to_string(),
            Field::MenuSelection => "menu_selection".to_string(),
            Field::StageId => "stage_id".to_string(),
            Field::CurrentHp => "current_hp".to_string(),
            Field::MaxHp => "max_hp".to_string(),
            Field::MachineHp => "machine_hp".to_string(),
            Field::VehicleId => "vehicle_id".to_string(),
            Field::Patch(stat) => format!("patch_{}", stat.name()),
            Field::Checklist => "checklist".to_string(),
        }
    }

    /// Parse a configuration name
    pub fn parse(name: &str) -> Result<Field, AddressError> {
        Field::all()
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| AddressError::UnknownField(name.to_string()))
    }

    /// Width in bytes of the value stored at this field
    pub fn natural_width(self) -> usize {
        match self {
            Field::GameId => 6,
            Field::MenuSelection | Field::StageId | Field::VehicleId => 2,
            Field::CurrentHp | Field::MaxHp | Field::MachineHp | Field::Patch(_) => 4,
            Field::Checklist => CHECKLIST_BOX_COUNT as usize,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Where a field lives in console memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: u32,
    pub width: usize,
    pub endian: Endianness,
    /// When set, `address` holds a pointer and the value lives at `*address + deref`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deref: Option<u32>,
}

impl AddressEntry {
    pub fn direct(address: u32, width: usize, endian: Endianness) -> Self {
        Self {
            address,
            width,
            endian,
            deref: None,
        }
    }
}

/// Layout of the checklist status bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistLayout {
    pub base: u32,
    pub count: u16,
    pub first_location_id: i64,
}

impl Default for ChecklistLayout {
    fn default() -> Self {
        Self {
            base: CHECKLIST_BASE_ADDR,
            count: CHECKLIST_BOX_COUNT,
            first_location_id: CHECKLIST_FIRST_LOCATION_ID,
        }
    }
}

/// A field relocation supplied by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressOverride {
    pub address: u32,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub endian: Option<Endianness>,
    #[serde(default)]
    pub deref: Option<u32>,
}

// ============================================================================
// Table
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AddressTable {
    profile: String,
    game_id: String,
    endian: Endianness,
    fields: BTreeMap<Field, AddressEntry>,
    checklist: Option<ChecklistLayout>,
    stat_range: Option<(f32, f32)>,
}

impl AddressTable {
    /// An empty table; every lookup fails with `UnsupportedPlatform`
    pub fn empty(profile: &str, game_id: &str, endian: Endianness) -> Self {
        Self {
            profile: profile.to_string(),
            game_id: game_id.to_string(),
            endian,
            fields: BTreeMap::new(),
            checklist: None,
            stat_range: None,
        }
    }

    /// Load one of the [`BUILTIN_PROFILES`]
    pub fn builtin(profile: &str) -> Result<Self, AddressError> {
        match profile {
            "gkye01" => Ok(Self::ntsc_u(profile, Endianness::Big, true)),
            // Backends that hand back host-order words; they cannot chase
            // console pointers, so the machine HP is unavailable there.
            "gkye01-host" => Ok(Self::ntsc_u(profile, Endianness::Little, false)),
            other => Err(AddressError::UnknownProfile(other.to_string())),
        }
    }

    fn ntsc_u(profile: &str, endian: Endianness, with_pointers: bool) -> Self {
        let mut table = Self::empty(profile, NTSC_U_GAME_ID, endian);

        table.insert(Field::GameId, AddressEntry::direct(GAME_ID_ADDR, 6, endian));
        table.insert(
            Field::MenuSelection,
            AddressEntry::direct(MENU_SELECTION_ADDR, 2, endian),
        );
        table.insert(Field::StageId, AddressEntry::direct(STAGE_ID_ADDR, 2, endian));
        table.insert(Field::CurrentHp, AddressEntry::direct(CURRENT_HP_ADDR, 4, endian));
        table.insert(Field::MaxHp, AddressEntry::direct(MAX_HP_ADDR, 4, endian));

        if with_pointers {
            table.insert(
                Field::MachineHp,
                AddressEntry {
                    address: MACHINE_PTR_ADDR,
                    width: 4,
                    endian,
                    deref: Some(MACHINE_HP_OFFSET),
                },
            );
        }

        let patches = [
            (Stat::Weight, PATCH_WEIGHT_ADDR),
            (Stat::Boost, PATCH_BOOST_ADDR),
            (Stat::TopSpeed, PATCH_TOP_SPEED_ADDR),
            (Stat::Turn, PATCH_TURN_ADDR),
            (Stat::Charge, PATCH_CHARGE_ADDR),
            (Stat::Glide, PATCH_GLIDE_ADDR),
            (Stat::Offense, PATCH_OFFENSE_ADDR),
            (Stat::Defense, PATCH_DEFENSE_ADDR),
            (Stat::Hp, PATCH_HP_ADDR),
        ];
        for (stat, address) in patches {
            table.insert(Field::Patch(stat), AddressEntry::direct(address, 4, endian));
        }

        table.checklist = Some(ChecklistLayout::default());
        table
    }

    pub fn insert(&mut self, field: Field, entry: AddressEntry) {
        self.fields.insert(field, entry);
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// Resolve a field for this profile
    pub fn resolve(&self, field: Field) -> Result<&AddressEntry, AddressError> {
        self.fields
            .get(&field)
            .ok_or_else(|| AddressError::UnsupportedPlatform {
                field,
                profile: self.profile.clone(),
            })
    }

    /// Resolve a field by its configuration name
    pub fn resolve_name(&self, name: &str) -> Result<&AddressEntry, AddressError> {
        self.resolve(Field::parse(name)?)
    }

    pub fn checklist(&self) -> Result<&ChecklistLayout, AddressError> {
        self.checklist
            .as_ref()
            .ok_or_else(|| AddressError::UnsupportedPlatform {
                field: Field::Checklist,
                profile: self.profile.clone(),
            })
    }

    pub fn set_checklist(&mut self, layout: ChecklistLayout) {
        self.checklist = Some(layout);
    }

    /// Valid range for patch counts, if the platform clamps them
    pub fn stat_range(&self) -> Option<(f32, f32)> {
        self.stat_range
    }

    pub fn set_stat_range(&mut self, range: Option<(f32, f32)>) {
        self.stat_range = range;
    }

    /// Mapped fields in a stable order
    pub fn entries(&self) -> impl Iterator<Item = (Field, &AddressEntry)> {
        self.fields.iter().map(|(f, e)| (*f, e))
    }

    /// Apply configuration overrides keyed by field name.
    ///
    /// Missing width/endianness fall back to the field's natural width and
    /// the profile's byte order.
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, AddressOverride>,
    ) -> Result<(), AddressError> {
        for (name, over) in overrides {
            let field = Field::parse(name)?;
            let entry = AddressEntry {
                address: over.address,
                width: over.width.unwrap_or_else(|| field.natural_width()),
                endian: over.endian.unwrap_or(self.endian),
                deref: over.deref,
            };
            self.fields.insert(field, entry);
        }
        Ok(())
    }
}
