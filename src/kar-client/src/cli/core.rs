//! Core CLI definitions

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kar-client")]
#[command(about = "Archipelago client for Kirby Air Ride", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,

    /// Log filter, e.g. "kar_bridge=debug" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Overrides for values from the config file
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Archipelago server as host:port
    #[arg(long = "connect", global = true, env = "KAR_SERVER")]
    pub server: Option<String>,

    /// Slot name to connect as
    #[arg(long, global = true, env = "KAR_SLOT")]
    pub slot: Option<String>,

    /// Room password
    #[arg(long, global = true, env = "KAR_PASSWORD")]
    pub password: Option<String>,

    /// Address profile (see `kar-client profiles`)
    #[arg(long, global = true)]
    pub platform: Option<String>,

    /// Sampling interval in milliseconds
    #[arg(long = "poll-ms", global = true)]
    pub poll_ms: Option<u64>,

    /// Enable DeathLink regardless of config and slot data
    #[arg(long = "death-link", global = true)]
    pub death_link: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bridge the game and the server (default)
    #[command(visible_alias = "r")]
    Run,

    /// Configure default settings
    #[command(visible_alias = "c")]
    Configure(ConfigureArgs),

    /// Attach to Dolphin and print the decoded game state once
    #[command(visible_alias = "p")]
    Probe {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List address profiles and their field mappings
    Profiles {
        /// Only show this profile
        name: Option<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigureArgs {
    /// Set a value, e.g. `--set slot=Kirby` (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub values: Vec<String>,

    /// Show current configuration
    #[arg(long)]
    pub show: bool,
}
