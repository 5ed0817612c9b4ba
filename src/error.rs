//! Error taxonomy for the debug server.
//!
//! Variants are split by where they are handled: [`ServerError::Protocol`]
//! never leaves the codec/engine boundary, the control-plane variants become
//! a wire-level error response, and [`ServerError::Transport`] /
//! [`ServerError::Config`] end a session outright.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed frame, bad checksum, or an unrecognized command. Handled
    /// locally with a NAK or an empty response; never surfaced to the user.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A flat address did not fall into any declared memory space.
    #[error("address {address:#x} does not map to a known memory space")]
    AddressDecode { address: u32 },

    /// The probe refused a control operation (resume/step/halt/reset).
    #[error("target control operation failed: {0}")]
    TargetControl(String),

    /// Hardware breakpoint budget exhausted and overlay placement was not
    /// possible.
    #[error("no breakpoint resource available for address {address:#x}")]
    BreakpointResource { address: u32 },

    /// USB/probe transport failed. Fatal to the session.
    #[error("probe transport error: {0}")]
    Transport(String),

    /// A controller call exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No target descriptor matches the reported signature, or the on-disk
    /// configuration could not be parsed. Fatal at activation time.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Maps an error to the wire-level response the engine should send, if
    /// the session should continue. Returns `None` when the session must be
    /// torn down instead (transport failure or mid-resume timeout).
    pub fn wire_response(&self, mid_resume: bool) -> Option<WireError> {
        match self {
            ServerError::Protocol(_) => None,
            ServerError::AddressDecode { .. } => Some(WireError::Code(1)),
            ServerError::TargetControl(_) => Some(WireError::Code(3)),
            ServerError::BreakpointResource { .. } => Some(WireError::Code(2)),
            ServerError::Timeout(_) => {
                if mid_resume {
                    None
                } else {
                    Some(WireError::Code(4))
                }
            }
            ServerError::Transport(_) => None,
            ServerError::Config(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Transport(_) | ServerError::Config(_))
    }
}

/// A wire-visible error: either an `E<NN>` two-digit code or the terminal
/// `X09` kill notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    Code(u8),
    Killed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Code(n) => write!(f, "E{n:02X}"),
            WireError::Killed => write!(f, "X09"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
