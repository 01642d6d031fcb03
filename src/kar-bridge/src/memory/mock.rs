//! Mock Process Memory
//!
//! In-memory console RAM for testing the sampler, engine and DeathLink.

use super::ProcessMemory;
use crate::address::{AddressEntry, AddressTable, Endianness, Field, MACHINE_HP_OFFSET};
use crate::error::MemoryError;
use crate::state::Stat;
use std::ops::Range;

/// Start of GameCube MEM1
pub const MEM1_BASE: u32 = 0x8000_0000;
/// Size of GameCube MEM1 (24 MiB)
pub const MEM1_SIZE: usize = 0x0180_0000;

/// A mock port backed by a contiguous buffer
pub struct MockProcessMemory {
    /// Raw memory data (contiguous, starting at base)
    pub data: Vec<u8>,
    /// Console address of `data[0]`
    pub base: u32,
    /// Ranges that refuse writes
    pub read_only: Vec<Range<u32>>,
    /// Every successful write, in order
    pub writes: Vec<(u32, Vec<u8>)>,
    attached: bool,
    available: bool,
}

impl MockProcessMemory {
    /// Attached mock with `size` zeroed bytes at `base`
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            data: vec![0; size],
            base,
            read_only: Vec::new(),
            writes: Vec::new(),
            attached: true,
            available: true,
        }
    }

    /// Full MEM1 seeded for a profile: game id, menu mode, baseline patches
    pub fn for_table(table: &AddressTable) -> Self {
        let mut mock = Self::new(MEM1_BASE, MEM1_SIZE);
        if let Ok(entry) = table.resolve(Field::GameId) {
            mock.set_bytes(entry.address, table.game_id().as_bytes());
        }
        mock.set_field_u16(table, Field::MenuSelection, crate::state::MENU_CITY_TRIAL);
        mock.set_field_u16(table, Field::StageId, 0);
        for stat in Stat::ALL {
            mock.set_field_f32(table, Field::Patch(stat), stat.baseline());
        }
        mock.writes.clear();
        mock
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, MemoryError> {
        if address < self.base {
            return Err(MemoryError::OutOfRange { address, len });
        }
        let offset = (address - self.base) as usize;
        if offset + len > self.data.len() {
            return Err(MemoryError::OutOfRange { address, len });
        }
        Ok(offset)
    }

    /// Poke bytes directly, bypassing attach state and protection
    pub fn set_bytes(&mut self, address: u32, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_u16(&mut self, address: u32, value: u16, endian: Endianness) {
        self.set_bytes(address, &endian.encode_u16(value));
    }

    pub fn set_u32(&mut self, address: u32, value: u32, endian: Endianness) {
        self.set_bytes(address, &endian.encode_u32(value));
    }

    pub fn set_f32(&mut self, address: u32, value: f32, endian: Endianness) {
        self.set_bytes(address, &endian.encode_f32(value));
    }

    pub fn get_f32(&self, address: u32, endian: Endianness) -> f32 {
        let offset = (address - self.base) as usize;
        endian.read_f32(&self.data[offset..offset + 4])
    }

    /// Final address of an entry, chasing its pointer without the attach check
    fn target(&self, entry: &AddressEntry) -> Option<u32> {
        match entry.deref {
            None => Some(entry.address),
            Some(offset) => {
                let offset_in_data = (entry.address - self.base) as usize;
                let ptr = entry.endian.read_u32(&self.data[offset_in_data..offset_in_data + 4]);
                (ptr != 0).then_some(ptr.wrapping_add(offset))
            }
        }
    }

    pub fn set_field_u16(&mut self, table: &AddressTable, field: Field, value: u16) {
        if let Ok(entry) = table.resolve(field) {
            if let Some(address) = self.target(entry) {
                self.set_u16(address, value, entry.endian);
            }
        }
    }

    pub fn set_field_f32(&mut self, table: &AddressTable, field: Field, value: f32) {
        if let Ok(entry) = table.resolve(field) {
            if let Some(address) = self.target(entry) {
                self.set_f32(address, value, entry.endian);
            }
        }
    }

    /// Current value of a field; NaN when unmapped or behind a null pointer
    pub fn field_f32(&self, table: &AddressTable, field: Field) -> f32 {
        match table.resolve(field) {
            Ok(entry) => match self.target(entry) {
                Some(address) => self.get_f32(address, entry.endian),
                None => f32::NAN,
            },
            Err(_) => f32::NAN,
        }
    }

    /// Point the machine pointer at `machine` so machine HP resolves
    pub fn place_machine(&mut self, table: &AddressTable, machine: u32, hp: f32) {
        if let Ok(entry) = table.resolve(Field::MachineHp) {
            let (address, endian) = (entry.address, entry.endian);
            self.set_u32(address, machine, endian);
            self.set_f32(machine + MACHINE_HP_OFFSET, hp, endian);
        }
    }

    /// Refuse writes inside `range`
    pub fn protect(&mut self, range: Range<u32>) {
        self.read_only.push(range);
    }

    /// Simulate the emulator going away (or coming back)
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
        if !available {
            self.attached = false;
        }
    }
}

impl ProcessMemory for MockProcessMemory {
    fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        if !self.attached {
            return Err(MemoryError::NotAttached);
        }
        let offset = self.offset(address, len)?;
        Ok(self.data[offset..offset + len].to_vec())
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        if !self.attached {
            return Err(MemoryError::NotAttached);
        }
        if self.read_only.iter().any(|r| r.contains(&address)) {
            return Err(MemoryError::ReadOnly { address });
        }
        let offset = self.offset(address, data.len())?;
        self.data[offset..offset + data.len()].copy_from_slice(data);
        self.writes.push((address, data.to_vec()));
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn attach(&mut self) -> Result<(), MemoryError> {
        if !self.available {
            return Err(MemoryError::NotAttached);
        }
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        self.attached = false;
    }
}
