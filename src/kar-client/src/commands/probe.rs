//! Probe command handler
//!
//! Attaches to Dolphin once and prints the decoded game state. Useful for
//! checking a profile's addresses before starting a session.

use crate::cli::RunArgs;
use crate::config::Config;
use crate::memory::DolphinProcess;
use anyhow::{Context, Result};
use kar_bridge::{GameState, StateSampler};
use std::fmt::Write;
use std::sync::Arc;

pub fn handle(args: &RunArgs, json: bool) -> Result<()> {
    let mut config = Config::load()?;
    config.apply_args(args);

    let table = Arc::new(config.address_table()?);
    let mut dolphin = DolphinProcess::new(table.game_id());
    dolphin.connect()?;

    let mut sampler = StateSampler::new(table.clone(), config.bridge_config().band, 0);
    let sample = sampler
        .sample(&dolphin)
        .context("Failed to read game state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sample.current)?);
    } else {
        if let Some(pid) = dolphin.pid() {
            println!("Dolphin PID: {}", pid);
        }
        println!("Profile: {} ({})", table.profile(), table.game_id());
        print!("{}", format_state(&sample.current));
    }

    Ok(())
}

fn format_state(state: &GameState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Mode: {}", state.mode);

    match state.max_health {
        Some(max) => {
            let _ = writeln!(out, "HP: {:.1} / {:.1}", state.health, max);
        }
        None => {
            let _ = writeln!(out, "HP: {:.1}", state.health);
        }
    }
    if let Some(vehicle) = state.vehicle_id {
        let _ = writeln!(out, "Vehicle: {:#06x}", vehicle);
    }

    let _ = writeln!(out, "Patches:");
    for (stat, value) in state.stats.iter() {
        let _ = writeln!(out, "  {:<10} {:>6.1}", stat, value);
    }

    let completed: Vec<i64> = state.checklist.completed().collect();
    let _ = writeln!(
        out,
        "Checklist: {} / {} boxes",
        completed.len(),
        state.checklist.len()
    );
    if !completed.is_empty() {
        let ids: Vec<String> = completed.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(out, "  {}", ids.join(", "));
    }
    out
}
