//! # kar-bridge
//!
//! Live synchronization core between a running Kirby Air Ride process and a
//! multiworld coordination service.
//!
//! This library provides functionality to:
//! - Resolve symbolic game fields to console addresses per platform profile
//! - Read and write emulated memory through the [`ProcessMemory`] port
//! - Sample typed [`GameState`] snapshots and detect run/death transitions
//! - Report newly completed checklist boxes exactly once per run
//! - Queue received items and apply them while a City Trial run is active
//! - Translate deaths in both directions for DeathLink
//!
//! Nothing here performs network or async I/O. The client binary drives
//! [`Bridge::tick`] on a fixed interval and feeds the shared
//! [`SessionContext`] from its session loop.
//!
//! ## Example
//!
//! ```
//! use kar_bridge::{AddressTable, Endianness, Field, Stat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let table = AddressTable::builtin("gkye01")?;
//!
//! let boost = table.resolve(Field::Patch(Stat::Boost))?;
//! assert_eq!(boost.address, 0x8157_8630);
//! assert_eq!(boost.endian, Endianness::Big);
//!
//! // Fields can also be resolved by their configuration name
//! let hp = table.resolve_name("current_hp")?;
//! assert_eq!(hp.width, 4);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bridge;
pub mod deathlink;
pub mod engine;
pub mod error;
pub mod goal;
pub mod items;
pub mod memory;
pub mod sampler;
pub mod session;
pub mod state;
pub mod tracker;
pub mod watermark;

#[doc(inline)]
pub use address::{AddressEntry, AddressOverride, AddressTable, ChecklistLayout, Endianness, Field};
#[doc(inline)]
pub use bridge::{Bridge, BridgeConfig, TickReport};
#[doc(inline)]
pub use deathlink::{DeathEvent, DeathLinkBridge, DeathOrigin};
#[doc(inline)]
pub use engine::{Intake, ItemApplyEngine, ItemState, PendingQueue, PermanentPatchSet};
#[doc(inline)]
pub use error::{AddressError, BridgeError, MemoryError, WatermarkError};
#[doc(inline)]
pub use goal::{builtin_goal_locations, Goal, GoalTracker};
#[doc(inline)]
pub use items::{catalog_entry, HealthTarget, PatchKind, ReceivedItem, ITEM_CATALOG};
#[doc(inline)]
pub use memory::ProcessMemory;
#[doc(inline)]
pub use sampler::{HealthBand, Sample, SamplerStatus, StateSampler, Transition};
#[doc(inline)]
pub use session::{ConnectionStatus, OutboundEvent, RunScope, SessionContext};
#[doc(inline)]
pub use state::{Checklist, GameMode, GameState, Stat, StatModifiers};
#[doc(inline)]
pub use tracker::ProgressTracker;
#[doc(inline)]
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
