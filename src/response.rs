//! Response formatting: turns engine results into the bytes that go back
//! over the wire, ahead of [`crate::codec::encode_packet`] framing them.

use crate::error::WireError;

/// GDB register index for the AVR program counter, matching the `pc` entry
/// in the target descriptor's register list.
pub const PC_GDB_INDEX: u32 = 34;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error(WireError),
    Empty,
    Raw(Vec<u8>),
    StopReply {
        signal: u8,
        program_counter: Option<u32>,
        reason: Option<StopReason>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SoftwareBreak,
    HardwareBreak,
    Step,
}

impl Response {
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok => b"OK".to_vec(),
            Response::Error(e) => e.to_string().into_bytes(),
            Response::Empty => Vec::new(),
            Response::Raw(bytes) => bytes.clone(),
            Response::StopReply {
                signal,
                program_counter,
                reason,
            } => {
                let mut out = format!("T{signal:02x}");
                if let Some(pc) = program_counter {
                    out.push_str(&format!("{PC_GDB_INDEX:02x}:{:08x};", pc.swap_bytes()));
                }
                match reason {
                    Some(StopReason::SoftwareBreak) => out.push_str("swbreak:;"),
                    Some(StopReason::HardwareBreak) => out.push_str("hwbreak:;"),
                    Some(StopReason::Step) => {}
                    None => {}
                }
                out.into_bytes()
            }
        }
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_is_literal_ok() {
        assert_eq!(Response::Ok.to_wire_bytes(), b"OK");
    }

    #[test]
    fn error_response_formats_as_two_digit_hex_code() {
        assert_eq!(Response::Error(WireError::Code(1)).to_wire_bytes(), b"E01");
    }

    #[test]
    fn stop_reply_includes_swbreak_marker() {
        let response = Response::StopReply {
            signal: 5,
            program_counter: None,
            reason: Some(StopReason::SoftwareBreak),
        };
        assert_eq!(response.to_wire_bytes(), b"T05swbreak:;");
    }

    #[test]
    fn hex_encode_round_trips_bytes() {
        assert_eq!(hex_encode(&[0xDE, 0xAD]), "dead");
    }
}
