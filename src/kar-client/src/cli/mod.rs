//! CLI argument definitions for kar-client
//!
//! This module contains all clap-derived structs and enums for CLI parsing.

mod core;

pub use core::{Cli, Commands, ConfigureArgs, RunArgs};
