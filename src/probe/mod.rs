//! Probe session layer: the capability set every concrete probe family
//! exposes to the target controller, plus two concrete implementations
//! (DebugWire, UPDI) built against a shared EDBG-style command transport.

mod debugwire;
mod transport;
mod updi;

pub use debugwire::DebugWireProbe;
pub use transport::{FakeTransport, Transport, TransportError};
pub use updi::UpdiProbe;

use crate::target::MemorySpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Break,
    HardwareBreakpoint,
    SoftwareBreakpoint,
    Step,
    ExternalHalt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Running,
    Stopped(StopCause),
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("operation timed out")]
    Timeout,
    #[error("unsupported on this probe family: {0}")]
    Unsupported(&'static str),
}

/// The capability set a concrete probe family realizes. Every method is
/// total: a probe that cannot perform an operation returns
/// [`ProbeError::Unsupported`] rather than silently no-opping.
pub trait ProbeSession {
    fn activate(&mut self) -> Result<(), ProbeError>;
    fn deactivate(&mut self) -> Result<(), ProbeError>;
    fn halt(&mut self) -> Result<(), ProbeError>;
    fn resume(&mut self, from: Option<u32>) -> Result<(), ProbeError>;
    fn step(&mut self) -> Result<(), ProbeError>;
    fn reset(&mut self) -> Result<(), ProbeError>;
    fn read(&mut self, space: MemorySpace, address: u32, length: u32) -> Result<Vec<u8>, ProbeError>;
    fn write(&mut self, space: MemorySpace, address: u32, data: &[u8]) -> Result<(), ProbeError>;
    fn read_pc(&mut self) -> Result<u32, ProbeError>;
    fn write_pc(&mut self, address: u32) -> Result<(), ProbeError>;
    fn set_hw_bp(&mut self, slot: u8, address: u32) -> Result<(), ProbeError>;
    fn clear_hw_bp(&mut self, slot: u8) -> Result<(), ProbeError>;
    fn poll_state(&mut self) -> Result<ProbeState, ProbeError>;
    fn sign_on(&mut self) -> Result<(), ProbeError>;
    fn device_id(&mut self) -> Result<[u8; 3], ProbeError>;
}
