//! Process memory access
//!
//! - `ProcessMemory` - the port every component reads and writes through
//! - `MockProcessMemory` - in-memory console RAM for tests

#[cfg(any(test, feature = "testing"))]
mod mock;
mod traits;

#[cfg(any(test, feature = "testing"))]
pub use mock::MockProcessMemory;
pub use traits::ProcessMemory;
