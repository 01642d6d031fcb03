//! Configuration command handlers
//!
//! Handles the `configure` subcommand for setting kar-client defaults.

use crate::cli::ConfigureArgs;
use crate::config::Config;
use anyhow::{Context, Result};

/// Handle the configure command
pub fn handle(args: &ConfigureArgs) -> Result<()> {
    let mut config = Config::load()?;

    if args.show {
        show_config(&config)?;
        return Ok(());
    }

    if args.values.is_empty() {
        show_usage();
        return Ok(());
    }

    apply_values(&mut config, &args.values)?;
    config.save()?;

    for value in &args.values {
        println!("Set {}", value);
    }
    if let Ok(path) = Config::config_path() {
        println!("Config saved to: {}", path.display());
    }

    Ok(())
}

/// Apply `KEY=VALUE` pairs in order; stops at the first bad one
fn apply_values(config: &mut Config, values: &[String]) -> Result<()> {
    for pair in values {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        config.set(key.trim(), value.trim())?;
    }
    Ok(())
}

/// Display current configuration
fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.password.is_some() {
        shown.password = Some("********".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?);

    if let Ok(path) = Config::config_path() {
        println!("\nConfig file: {}", path.display());
    }
    if let Ok(dir) = Config::data_dir() {
        println!("Data directory: {}", dir.display());
    }

    Ok(())
}

/// Show usage help for the configure command
fn show_usage() {
    println!("Usage: kar-client configure --set KEY=VALUE [--set KEY=VALUE ...]");
    println!("       kar-client configure --show");
    println!();
    println!("Keys: server, slot, password, platform, poll_interval_ms, death_link");
    println!();
    println!("Address overrides and the checklist layout are edited in the config file.");
}
