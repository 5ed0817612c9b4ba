//! Target memory model: the flat address space the wire protocol assumes,
//! mapped onto the AVR's disjoint Flash/RAM/EEPROM/IO/register spaces.
//!
//! The offset convention (RAM based at `0x800000`, EEPROM at `0x810000`)
//! matches the one GNU `avr-gdb`/`avr-objcopy` toolchains use, so existing
//! `.gdbinit` setups and linker-script symbols resolve without translation
//! on the client side.

pub mod catalog;

use serde::{Deserialize, Serialize};

pub const RAM_OFFSET: u32 = 0x80_0000;
pub const EEPROM_OFFSET: u32 = 0x81_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemorySpace {
    Flash,
    Ram,
    Eeprom,
    Io,
    Registers,
    Fuses,
    Lockbits,
    Signatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceOffset {
    pub space: MemorySpace,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub gdb_index: u32,
    pub width_bytes: u8,
    pub source: RegisterSource,
}

/// Where a register's bytes actually live. The stack pointer on classic
/// AVRs is two IO registers (SPL/SPH); the program counter is not an IO
/// register at all but the probe's own PC latch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RegisterSource {
    GeneralPurpose(u8),
    Io(u8),
    TwoByteIo { low: u8, high: u8 },
    ProgramCounter,
    StatusRegister(u8),
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetDescriptor {
    pub name: String,
    pub signature: [u8; 3],
    pub flash_size: u32,
    pub flash_page_size: u32,
    pub ram_size: u32,
    pub eeprom_size: u32,
    pub hardware_breakpoint_slots: u8,
    pub registers: Vec<RegisterDescriptor>,
    pub status_register_io_address: u8,
}

impl TargetDescriptor {
    /// Splits a flat protocol address into its underlying memory space and
    /// offset within that space, per the RAM/EEPROM offset convention.
    pub fn decode_address(&self, flat_address: u32) -> Option<SpaceOffset> {
        if flat_address < self.flash_size {
            return Some(SpaceOffset {
                space: MemorySpace::Flash,
                offset: flat_address,
            });
        }
        if flat_address >= RAM_OFFSET && flat_address < RAM_OFFSET + self.ram_size {
            return Some(SpaceOffset {
                space: MemorySpace::Ram,
                offset: flat_address - RAM_OFFSET,
            });
        }
        if flat_address >= EEPROM_OFFSET && flat_address < EEPROM_OFFSET + self.eeprom_size {
            return Some(SpaceOffset {
                space: MemorySpace::Eeprom,
                offset: flat_address - EEPROM_OFFSET,
            });
        }
        None
    }

    /// Inverse of [`TargetDescriptor::decode_address`], for round-trip
    /// verification and for formatting addresses in monitor output.
    pub fn encode_address(&self, space_offset: SpaceOffset) -> u32 {
        match space_offset.space {
            MemorySpace::Flash => space_offset.offset,
            MemorySpace::Ram => RAM_OFFSET + space_offset.offset,
            MemorySpace::Eeprom => EEPROM_OFFSET + space_offset.offset,
            _ => space_offset.offset,
        }
    }

    /// Checks whether a `[address, address+length)` range fits entirely
    /// within a single declared memory space; used to reject the
    /// boundary-straddling reads the protocol has no way to express.
    pub fn decode_range(&self, flat_address: u32, length: u32) -> Option<SpaceOffset> {
        let start = self.decode_address(flat_address)?;
        if length == 0 {
            return Some(start);
        }
        let end = self.decode_address(flat_address + length - 1)?;
        if end.space != start.space {
            return None;
        }
        Some(start)
    }

    pub fn page_containing(&self, flash_offset: u32) -> u32 {
        flash_offset - (flash_offset % self.flash_page_size)
    }
}
