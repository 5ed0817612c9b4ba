//! A small built-in stand-in for the on-disk target-description catalog.
//!
//! The real catalog (a directory of XML/JSON chip descriptions, one of this
//! crate's declared external collaborators) is out of scope here. This
//! gives the controller's activation path something real to look up by
//! signature bytes so it can be exercised without one.

use crate::target::{RegisterDescriptor, RegisterSource, TargetDescriptor};

pub struct TargetCatalog {
    entries: Vec<TargetDescriptor>,
}

impl TargetCatalog {
    pub fn builtin() -> Self {
        TargetCatalog {
            entries: vec![atmega328p(), attiny85(), atmega4809()],
        }
    }

    pub fn lookup(&self, signature: [u8; 3]) -> Option<&TargetDescriptor> {
        self.entries.iter().find(|d| d.signature == signature)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.name.as_str())
    }
}

fn general_purpose_registers() -> Vec<RegisterDescriptor> {
    (0..32)
        .map(|i| RegisterDescriptor {
            name: Box::leak(format!("r{i}").into_boxed_str()),
            gdb_index: i as u32,
            width_bytes: 1,
            source: RegisterSource::GeneralPurpose(i as u8),
        })
        .collect()
}

fn atmega328p() -> TargetDescriptor {
    let mut registers = general_purpose_registers();
    registers.push(RegisterDescriptor {
        name: "sreg",
        gdb_index: 32,
        width_bytes: 1,
        source: RegisterSource::StatusRegister(0x3F),
    });
    registers.push(RegisterDescriptor {
        name: "sp",
        gdb_index: 33,
        width_bytes: 2,
        source: RegisterSource::TwoByteIo { low: 0x3D, high: 0x3E },
    });
    registers.push(RegisterDescriptor {
        name: "pc",
        gdb_index: 34,
        width_bytes: 4,
        source: RegisterSource::ProgramCounter,
    });
    TargetDescriptor {
        name: "atmega328p".into(),
        signature: [0x1E, 0x95, 0x0F],
        flash_size: 0x8000,
        flash_page_size: 128,
        ram_size: 0x800,
        eeprom_size: 0x400,
        hardware_breakpoint_slots: 1,
        registers,
        status_register_io_address: 0x3F,
    }
}

fn attiny85() -> TargetDescriptor {
    let mut registers = general_purpose_registers();
    registers.push(RegisterDescriptor {
        name: "sreg",
        gdb_index: 32,
        width_bytes: 1,
        source: RegisterSource::StatusRegister(0x3F),
    });
    registers.push(RegisterDescriptor {
        name: "sp",
        gdb_index: 33,
        width_bytes: 2,
        source: RegisterSource::TwoByteIo { low: 0x3D, high: 0x3E },
    });
    registers.push(RegisterDescriptor {
        name: "pc",
        gdb_index: 34,
        width_bytes: 4,
        source: RegisterSource::ProgramCounter,
    });
    TargetDescriptor {
        name: "attiny85".into(),
        signature: [0x1E, 0x93, 0x0B],
        flash_size: 0x2000,
        flash_page_size: 64,
        ram_size: 0x200,
        eeprom_size: 0x200,
        hardware_breakpoint_slots: 1,
        registers,
        status_register_io_address: 0x3F,
    }
}

fn atmega4809() -> TargetDescriptor {
    let mut registers = general_purpose_registers();
    registers.push(RegisterDescriptor {
        name: "sreg",
        gdb_index: 32,
        width_bytes: 1,
        source: RegisterSource::StatusRegister(0x34),
    });
    registers.push(RegisterDescriptor {
        name: "sp",
        gdb_index: 33,
        width_bytes: 2,
        source: RegisterSource::TwoByteIo { low: 0x3D, high: 0x3E },
    });
    registers.push(RegisterDescriptor {
        name: "pc",
        gdb_index: 34,
        width_bytes: 4,
        source: RegisterSource::ProgramCounter,
    });
    TargetDescriptor {
        name: "atmega4809".into(),
        signature: [0x1E, 0x96, 0x51],
        flash_size: 0xC000,
        flash_page_size: 128,
        ram_size: 0x1800,
        eeprom_size: 0x100,
        hardware_breakpoint_slots: 2,
        registers,
        status_register_io_address: 0x34,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_signature() {
        let catalog = TargetCatalog::builtin();
        let d = catalog.lookup([0x1E, 0x95, 0x0F]).unwrap();
        assert_eq!(d.name, "atmega328p");
    }

    #[test]
    fn unknown_signature_is_none() {
        let catalog = TargetCatalog::builtin();
        assert!(catalog.lookup([0, 0, 0]).is_none());
    }
}
