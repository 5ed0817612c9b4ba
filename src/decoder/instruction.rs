//! Decoded instruction representation.
//!
//! Keeps the fields an AVR opcode decode naturally produces per instruction
//! (mnemonic, size, flow/skip flags, decoded operands), trimmed to what the
//! debug server actually consumes: single-step planning and breakpoint
//! overlay bookkeeping never need the full operand set, only whether the
//! instruction can change flow or skip the next word.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: &'static str,
    /// 2 or 4.
    pub byte_size: u8,
    /// True for branches, calls, jumps, returns, skip instructions: anything
    /// a naive PC+size single-step would get wrong.
    pub may_change_flow: bool,
    /// True for CPSE/SBRC/SBRS/SBIC/SBIS: the instruction may skip the word
    /// immediately following it.
    pub may_skip_next: bool,
    pub operands: Operands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Operands {
    pub destination_register: Option<u8>,
    pub source_register: Option<u8>,
    pub io_address: Option<u8>,
    pub immediate: Option<u32>,
    /// Target byte address for branches/calls/jumps, already resolved
    /// relative to the instruction's own address where the encoding is
    /// PC-relative.
    pub program_address: Option<u32>,
}
