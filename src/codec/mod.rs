//! Frame/escape/checksum codec for the debugger wire protocol.
//!
//! Hand-rolled rather than delegated to a packaged protocol crate: framing,
//! escaping, run-length decoding, and the checksum are the core subject
//! this server exists to implement. The reader accumulates one frame at a
//! time off a synchronous, blocking connection rather than an async one.

use std::io::{self, BufRead, Write};

use memchr::memchr3;

const ESCAPE: u8 = b'}';
const ESCAPE_XOR: u8 = 0x20;
const RUN_LENGTH: u8 = b'*';
const FRAME_START: u8 = b'$';
const FRAME_END: u8 = b'#';
const NOTIFICATION_START: u8 = b'%';
const ACK: u8 = b'+';
const NACK: u8 = b'-';
const INTERRUPT: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Packet(Vec<u8>),
    Ack,
    Nack,
    Interrupt,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("checksum mismatch: got {got:02x}, expected {expected:02x}")]
    BadChecksum { got: u8, expected: u8 },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one complete frame's raw (escaped, not yet unescaped) payload from
/// `reader`, scanning past any leading garbage (GDB clients occasionally
/// send stray bytes between sessions).
///
/// Returns `Ok(None)` on clean EOF.
pub fn read_next(reader: &mut impl BufRead) -> Result<Option<Inbound>, CodecError> {
    loop {
        let byte = match read_byte(reader)? {
            Some(b) => b,
            None => return Ok(None),
        };
        match byte {
            ACK => return Ok(Some(Inbound::Ack)),
            NACK => return Ok(Some(Inbound::Nack)),
            INTERRUPT => return Ok(Some(Inbound::Interrupt)),
            FRAME_START | NOTIFICATION_START => {
                let (payload, checksum) = read_until_checksum(reader)?;
                let expected = checksum_of(&payload);
                if expected != checksum {
                    return Err(CodecError::BadChecksum {
                        got: checksum,
                        expected,
                    });
                }
                return Ok(Some(Inbound::Packet(unescape(&payload))));
            }
            _ => continue,
        }
    }
}

fn read_byte(reader: &mut impl BufRead) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_until_checksum(reader: &mut impl BufRead) -> Result<(Vec<u8>, u8), CodecError> {
    let mut payload = Vec::new();
    loop {
        let byte = read_byte(reader)?.ok_or(CodecError::Malformed("eof before '#'"))?;
        if byte == FRAME_END {
            break;
        }
        payload.push(byte);
    }
    let hi = read_byte(reader)?.ok_or(CodecError::Malformed("eof reading checksum"))?;
    let lo = read_byte(reader)?.ok_or(CodecError::Malformed("eof reading checksum"))?;
    let checksum = hex_pair(hi, lo).ok_or(CodecError::Malformed("non-hex checksum"))?;
    Ok((payload, checksum))
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

fn checksum_of(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Expands `}X` escapes and `c*n` run-length sequences into their literal
/// bytes.
fn unescape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        let b = payload[i];
        if b == ESCAPE && i + 1 < payload.len() {
            out.push(payload[i + 1] ^ ESCAPE_XOR);
            i += 2;
        } else if i + 1 < payload.len() && payload[i + 1] == RUN_LENGTH && i + 2 < payload.len() {
            let repeat_count = (payload[i + 2] as usize).wrapping_sub(29);
            out.extend(std::iter::repeat(b).take(repeat_count.saturating_add(1)));
            i += 3;
        } else {
            out.push(b);
            i += 1;
        }
    }
    out
}

pub fn write_ack(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&[ACK])
}

pub fn write_nack(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&[NACK])
}

/// Encodes `payload` as one `$...#cc` frame, escaping any byte that would
/// otherwise be misread as framing syntax. The checksum is computed over
/// the escaped wire bytes actually placed between `$` and `#`, matching
/// what a receiver sums on the way back in.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(payload.len() + 2);
    let mut remaining = payload;
    while !remaining.is_empty() {
        match memchr3(FRAME_END, ESCAPE, RUN_LENGTH, remaining)
            .into_iter()
            .chain(memchr::memchr(FRAME_START, remaining))
            .min()
        {
            Some(pos) => {
                wire.extend_from_slice(&remaining[..pos]);
                wire.push(ESCAPE);
                wire.push(remaining[pos] ^ ESCAPE_XOR);
                remaining = &remaining[pos + 1..];
            }
            None => {
                wire.extend_from_slice(remaining);
                remaining = &[];
            }
        }
    }
    let checksum = checksum_of(&wire);
    let mut out = Vec::with_capacity(wire.len() + 4);
    out.push(FRAME_START);
    out.extend_from_slice(&wire);
    out.push(FRAME_END);
    out.extend_from_slice(format!("{checksum:02x}").as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(payload: &[u8]) -> Vec<u8> {
        encode_packet(payload)
    }

    #[test]
    fn round_trips_plain_payload() {
        let payload = b"qSupported";
        let framed = frame(payload);
        let mut cursor = Cursor::new(framed);
        match read_next(&mut cursor).unwrap().unwrap() {
            Inbound::Packet(p) => assert_eq!(p, payload),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn escapes_special_bytes() {
        let payload = b"a}b#c$d*e";
        let framed = frame(payload);
        let mut cursor = Cursor::new(framed);
        match read_next(&mut cursor).unwrap().unwrap() {
            Inbound::Packet(p) => assert_eq!(p, payload),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn checksum_mismatch_errors() {
        let mut framed = frame(b"OK");
        let len = framed.len();
        framed[len - 1] = b'0';
        framed[len - 2] = b'0';
        let mut cursor = Cursor::new(framed);
        assert!(matches!(
            read_next(&mut cursor),
            Err(CodecError::BadChecksum { .. })
        ));
    }

    #[test]
    fn skips_leading_garbage() {
        let mut bytes = b"\x00\x00garbage".to_vec();
        bytes.extend(frame(b"OK"));
        let mut cursor = Cursor::new(bytes);
        match read_next(&mut cursor).unwrap().unwrap() {
            Inbound::Packet(p) => assert_eq!(p, b"OK"),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn recognizes_ack_nack_and_interrupt() {
        let mut cursor = Cursor::new(vec![ACK]);
        assert_eq!(read_next(&mut cursor).unwrap(), Some(Inbound::Ack));
        let mut cursor = Cursor::new(vec![NACK]);
        assert_eq!(read_next(&mut cursor).unwrap(), Some(Inbound::Nack));
        let mut cursor = Cursor::new(vec![INTERRUPT]);
        assert_eq!(read_next(&mut cursor).unwrap(), Some(Inbound::Interrupt));
    }

    #[test]
    fn eof_returns_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert_eq!(read_next(&mut cursor).unwrap(), None);
    }

    #[test]
    fn run_length_expands() {
        // "0*"" followed by char with value 29+3=32 (' ') means 3 extra repeats -> "0000"
        let mut payload = b"0*".to_vec();
        payload.push(29 + 3);
        let unescaped = unescape(&payload);
        assert_eq!(unescaped, b"0000");
    }
}
