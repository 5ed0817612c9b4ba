//! GDB remote-serial debug server for 8-bit AVR microcontrollers.
//!
//! Module layout mirrors the component split this crate is designed
//! around: a wire codec and command parser at the bottom, an opcode
//! decoder and target memory model beside them, a probe session layer
//! driving the physical debug interface, a controller serializing access
//! to it, and a per-connection engine tying the protocol to the
//! controller.

pub mod codec;
pub mod command;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod probe;
pub mod response;
pub mod server;
pub mod target;

pub use error::{ServerError, WireError};
