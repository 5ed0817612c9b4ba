//! EDBG-style command transport: a command is sent as one HID report, then
//! the response is polled in a loop until a non-zero fragment-info byte
//! arrives.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("usb/hid i/o error: {0}")]
    Io(String),
    #[error("device did not respond before the deadline")]
    Timeout,
    #[error("unexpected fragment-info byte {0:#x}")]
    UnexpectedFragment(u8),
}

/// The physical transport every probe session drives its EDBG-framed
/// commands through. A real implementation sits on top of a USB HID
/// report pipe (out of scope here, same as the on-disk target catalog);
/// this trait is the seam a probe session is written against.
pub trait Transport {
    fn send_command(&mut self, fragment_info: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// An in-memory double used by probe/controller/engine tests. Commands are
/// recorded; canned responses are served in order.
pub struct FakeTransport {
    pub sent: Vec<(u8, Vec<u8>)>,
    pub responses: std::collections::VecDeque<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            sent: Vec::new(),
            responses: std::collections::VecDeque::new(),
        }
    }

    pub fn push_response(&mut self, bytes: Vec<u8>) {
        self.responses.push_back(bytes);
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for FakeTransport {
    fn send_command(&mut self, fragment_info: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.sent.push((fragment_info, payload.to_vec()));
        self.responses.pop_front().ok_or(TransportError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sent_commands_and_replays_responses() {
        let mut transport = FakeTransport::new();
        transport.push_response(vec![0xAA]);
        let reply = transport.send_command(0x11, &[1, 2, 3]).unwrap();
        assert_eq!(reply, vec![0xAA]);
        assert_eq!(transport.sent, vec![(0x11, vec![1, 2, 3])]);
    }

    #[test]
    fn exhausted_responses_time_out() {
        let mut transport = FakeTransport::new();
        assert!(matches!(
            transport.send_command(0x11, &[]),
            Err(TransportError::Timeout)
        ));
    }
}
