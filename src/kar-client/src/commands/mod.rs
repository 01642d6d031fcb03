//! Command handlers for kar-client
//!
//! Each subcommand has its own module with a `handle` entry point.

pub mod configure;
pub mod probe;
pub mod profiles;
pub mod run;
