//! Error taxonomy for the bridge.
//!
//! Configuration faults (`AddressError`) abort startup. Everything else is
//! contained by the sampling loop and surfaced as status.

use crate::address::Field;
use thiserror::Error;

/// Address table lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field {field} is not mapped for platform profile {profile}")]
    UnsupportedPlatform { field: Field, profile: String },

    #[error("Unknown platform profile: {0}")]
    UnknownProfile(String),
}

/// Process memory port failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Process not attached")]
    NotAttached,

    #[error("Access of {len} bytes at {address:#010x} is out of range")]
    OutOfRange { address: u32, len: usize },

    #[error("Address {address:#010x} is read-only")]
    ReadOnly { address: u32 },
}

/// Watermark persistence
#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Process not attached")]
    NotAttached,

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Memory access failed: {0}")]
    Memory(MemoryError),

    #[error("Write rejected at {address:#010x}: {reason}")]
    WriteRejected { address: u32, reason: String },

    #[error("Watermark store: {0}")]
    Watermark(#[from] WatermarkError),
}

impl From<MemoryError> for BridgeError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::NotAttached => BridgeError::NotAttached,
            other => BridgeError::Memory(other),
        }
    }
}

impl BridgeError {
    /// Whether the sampling loop should keep running after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BridgeError::Address(_))
    }

    /// Build a `WriteRejected` from a failed memory write
    pub fn rejected(address: u32, err: &MemoryError) -> Self {
        BridgeError::WriteRejected {
            address,
            reason: err.to_string(),
        }
    }
}
