//! Process Memory Port
//!
//! Core abstraction for reading and writing emulated console memory.

use crate::address::{AddressEntry, Endianness};
use crate::error::MemoryError;

/// Raw byte access to the target process.
///
/// No caching: every call reflects the live process. Writes are not
/// transactional and the game may overwrite them on its next frame.
pub trait ProcessMemory: Send {
    /// Read `len` bytes at a console address
    fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError>;

    /// Write bytes at a console address
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// Whether the target process is currently attached
    fn is_attached(&self) -> bool;

    /// Try to (re)attach to the target process
    fn attach(&mut self) -> Result<(), MemoryError>;

    /// Drop the attachment; later accesses fail with `NotAttached`
    fn detach(&mut self);

    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        let bytes = self.read_exact(address, 1)?;
        Ok(bytes[0])
    }

    fn read_u16(&self, address: u32, endian: Endianness) -> Result<u16, MemoryError> {
        let bytes = self.read_exact(address, 2)?;
        Ok(endian.read_u16(&bytes))
    }

    fn read_u32(&self, address: u32, endian: Endianness) -> Result<u32, MemoryError> {
        let bytes = self.read_exact(address, 4)?;
        Ok(endian.read_u32(&bytes))
    }

    fn read_f32(&self, address: u32, endian: Endianness) -> Result<f32, MemoryError> {
        let bytes = self.read_exact(address, 4)?;
        Ok(endian.read_f32(&bytes))
    }

    fn write_f32(&mut self, address: u32, value: f32, endian: Endianness) -> Result<(), MemoryError> {
        self.write_bytes(address, &endian.encode_f32(value))
    }

    /// Read and check that the backend returned the full width
    fn read_exact(&self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let bytes = self.read_bytes(address, len)?;
        if bytes.len() < len {
            return Err(MemoryError::OutOfRange { address, len });
        }
        Ok(bytes)
    }

    /// Final address of an entry, following its pointer if it has one
    fn locate(&self, entry: &AddressEntry) -> Result<u32, MemoryError> {
        match entry.deref {
            None => Ok(entry.address),
            Some(offset) => {
                let ptr = self.read_u32(entry.address, entry.endian)?;
                if ptr == 0 {
                    return Err(MemoryError::OutOfRange {
                        address: entry.address,
                        len: entry.width,
                    });
                }
                Ok(ptr.wrapping_add(offset))
            }
        }
    }

    fn read_entry(&self, entry: &AddressEntry) -> Result<Vec<u8>, MemoryError> {
        let address = self.locate(entry)?;
        self.read_exact(address, entry.width)
    }

    fn read_entry_u16(&self, entry: &AddressEntry) -> Result<u16, MemoryError> {
        let address = self.locate(entry)?;
        self.read_u16(address, entry.endian)
    }

    fn read_entry_f32(&self, entry: &AddressEntry) -> Result<f32, MemoryError> {
        let address = self.locate(entry)?;
        self.read_f32(address, entry.endian)
    }

    /// Write an f32 through an entry, returning the address written
    fn write_entry_f32(&mut self, entry: &AddressEntry, value: f32) -> Result<u32, MemoryError> {
        let address = self.locate(entry)?;
        self.write_f32(address, value, entry.endian)?;
        Ok(address)
    }
}
