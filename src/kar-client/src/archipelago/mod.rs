//! Archipelago multiworld session

mod client;
pub mod protocol;

pub use client::{run, Backoff, SessionSettings};
