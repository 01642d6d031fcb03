//! Live Dolphin Memory
//!
//! `ProcessMemory` implementation that reads and writes the GameCube's MEM1
//! through Dolphin's shared RAM mapping.

use super::region::{find_mem1, parse_maps};
use anyhow::{bail, Context, Result};
use kar_bridge::{MemoryError, ProcessMemory};
use process_memory::{CopyAddress, ProcessHandle, PutAddress, TryIntoProcessHandle};
use sysinfo::System;
use tracing::{debug, info};

/// Console address of the first MEM1 byte
pub const MEM1_CONSOLE_BASE: u32 = 0x8000_0000;
/// Size of MEM1 (24 MiB)
pub const MEM1_SIZE: u32 = 0x0180_0000;

struct Attachment {
    pid: u32,
    handle: ProcessHandle,
    /// Host address of console 0x80000000
    mem1: usize,
}

/// Dolphin running the expected game
pub struct DolphinProcess {
    game_id: String,
    attached: Option<Attachment>,
}

// SAFETY: Windows HANDLEs are process-wide and can be safely used from any thread.
unsafe impl Send for DolphinProcess {}

impl DolphinProcess {
    pub fn new(game_id: &str) -> Self {
        Self {
            game_id: game_id.to_string(),
            attached: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.attached.as_ref().map(|a| a.pid)
    }

    /// Attach, reporting why it failed
    pub fn connect(&mut self) -> Result<()> {
        let pid = find_dolphin_process()?;
        let handle = (pid as process_memory::Pid)
            .try_into_process_handle()
            .context("Failed to attach to Dolphin. Try running with sudo.")?;

        let maps = parse_maps(pid)?;
        let mem1 = find_mem1(&maps)
            .context("Dolphin has no emulated RAM mapped. Is a game running?")?
            .start;

        let mut id = vec![0u8; self.game_id.len()];
        handle
            .copy_address(mem1, &mut id)
            .context("Failed to read the game id")?;
        let found = String::from_utf8_lossy(&id);
        if found != self.game_id {
            bail!(
                "Wrong game loaded: found '{}', expected '{}'",
                found.trim_end_matches('\0'),
                self.game_id
            );
        }

        info!(pid, mem1 = format_args!("{:#x}", mem1), "attached to Dolphin");
        self.attached = Some(Attachment { pid, handle, mem1 });
        Ok(())
    }

    fn host_address(&self, address: u32, len: usize) -> Result<(&Attachment, usize), MemoryError> {
        let attachment = self.attached.as_ref().ok_or(MemoryError::NotAttached)?;
        let offset = mem1_offset(address, len)?;
        Ok((attachment, attachment.mem1 + offset))
    }
}

/// Offset of a console address range inside MEM1
pub fn mem1_offset(address: u32, len: usize) -> Result<usize, MemoryError> {
    let out_of_range = MemoryError::OutOfRange { address, len };
    if address < MEM1_CONSOLE_BASE {
        return Err(out_of_range);
    }
    let offset = (address - MEM1_CONSOLE_BASE) as usize;
    if offset + len > MEM1_SIZE as usize {
        return Err(out_of_range);
    }
    Ok(offset)
}

impl ProcessMemory for DolphinProcess {
    fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let (attachment, host) = self.host_address(address, len)?;
        let mut buffer = vec![0u8; len];
        attachment
            .handle
            .copy_address(host, &mut buffer)
            .map_err(|err| {
                debug!(address, error = %err, "read failed");
                MemoryError::NotAttached
            })?;
        Ok(buffer)
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let (attachment, host) = self.host_address(address, data.len())?;
        attachment.handle.put_address(host, data).map_err(|err| {
            debug!(address, error = %err, "write failed");
            MemoryError::NotAttached
        })
    }

    fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    fn attach(&mut self) -> Result<(), MemoryError> {
        self.connect().map_err(|err| {
            debug!(error = %err, "Dolphin not attached");
            MemoryError::NotAttached
        })
    }

    fn detach(&mut self) {
        if let Some(attachment) = self.attached.take() {
            info!(pid = attachment.pid, "detached from Dolphin");
        }
    }
}

/// Find a running Dolphin process
pub fn find_dolphin_process() -> Result<u32> {
    let mut system = System::new_all();
    system.refresh_all();

    let mut candidates: Vec<(u32, u64)> = system
        .processes()
        .values()
        .filter(|p| {
            let name = p.name().to_string_lossy().to_lowercase();
            name.contains("dolphin")
        })
        .map(|p| (p.pid().as_u32(), p.memory()))
        .collect();

    // The emulator owns the most memory; helper processes don't
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    match candidates.first() {
        Some((pid, _)) => Ok(*pid),
        None => bail!("Dolphin process not found. Is the emulator running?"),
    }
}
