//! Dolphin process attachment
//!
//! - `region` - /proc/pid/maps parsing
//! - `dolphin` - the live `ProcessMemory` backed by Dolphin's emulated RAM

mod dolphin;
mod region;

pub use dolphin::DolphinProcess;
