//! Profiles command handler
//!
//! Lists the builtin address profiles, or one profile's field mappings.

use anyhow::{bail, Result};
use kar_bridge::address::BUILTIN_PROFILES;
use kar_bridge::AddressTable;
use std::fmt::Write;

pub fn handle(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            if !BUILTIN_PROFILES.contains(&name) {
                bail!(
                    "Unknown profile '{}'. Available: {}",
                    name,
                    BUILTIN_PROFILES.join(", ")
                );
            }
            print!("{}", describe(&AddressTable::builtin(name)?));
        }
        None => {
            for profile in BUILTIN_PROFILES {
                let table = AddressTable::builtin(profile)?;
                println!(
                    "{:<14} {}  {:?}-endian, {} fields",
                    profile,
                    table.game_id(),
                    table.endian(),
                    table.entries().count()
                );
            }
        }
    }
    Ok(())
}

fn describe(table: &AddressTable) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Profile {} ({}, {:?}-endian)",
        table.profile(),
        table.game_id(),
        table.endian()
    );

    for (field, entry) in table.entries() {
        let _ = write!(out, "  {:<16} {:#010x}  {} bytes", field.name(), entry.address, entry.width);
        if let Some(offset) = entry.deref {
            let _ = write!(out, "  -> +{:#x}", offset);
        }
        let _ = writeln!(out);
    }

    if let Ok(layout) = table.checklist() {
        let _ = writeln!(
            out,
            "  checklist        {:#010x}  {} boxes from location {}",
            layout.base, layout.count, layout.first_location_id
        );
    }
    if let Some((min, max)) = table.stat_range() {
        let _ = writeln!(out, "  patch range      {} to {}", min, max);
    }
    out
}
