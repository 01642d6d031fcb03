//! Memory Region Types
//!
//! Data structures for representing memory regions from /proc/pid/maps.

use anyhow::{Context, Result};
use std::fs;

/// Size of the shared mapping Dolphin uses for MEM1
pub const MEM1_MAPPING_SIZE: usize = 0x0200_0000;

/// A memory region from /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: usize,
    pub end: usize,
    pub perms: String,
    pub offset: usize,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn is_readable(&self) -> bool {
        self.perms.starts_with('r')
    }

    pub fn is_writable(&self) -> bool {
        self.perms.chars().nth(1) == Some('w')
    }

    /// Backed by Dolphin's emulated RAM (shm file or memfd)
    pub fn is_dolphin_ram(&self) -> bool {
        self.path
            .as_deref()
            .map(|p| p.contains("dolphin-emu"))
            .unwrap_or(false)
    }
}

/// Parse /proc/pid/maps to get memory regions
pub fn parse_maps(pid: u32) -> Result<Vec<MemoryRegion>> {
    let maps_path = format!("/proc/{}/maps", pid);
    let contents = fs::read_to_string(&maps_path)
        .with_context(|| format!("Failed to open {}. Do you have permission?", maps_path))?;
    Ok(parse_maps_str(&contents))
}

pub fn parse_maps_str(contents: &str) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();

    for line in contents.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(range) = parts.first() else {
            continue;
        };

        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (
            usize::from_str_radix(start, 16),
            usize::from_str_radix(end, 16),
        ) else {
            continue;
        };

        let perms = parts.get(1).unwrap_or(&"").to_string();
        let offset = parts
            .get(2)
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        let path = parts.get(5).map(|s| s.to_string());

        regions.push(MemoryRegion {
            start,
            end,
            perms,
            offset,
            path,
        });
    }

    regions
}

/// The host mapping of console MEM1: Dolphin RAM at file offset 0
pub fn find_mem1(regions: &[MemoryRegion]) -> Option<&MemoryRegion> {
    regions.iter().find(|r| {
        r.is_dolphin_ram()
            && r.offset == 0
            && r.size() >= MEM1_MAPPING_SIZE
            && r.is_readable()
            && r.is_writable()
    })
}
