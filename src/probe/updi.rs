//! UPDI probe session: single-wire UPDI, used by the 0/1/2-series AVRs.
//! Shares the EDBG fragment-loop transport with [`super::DebugWireProbe`]
//! but under a different fragment-info tag and without any fuse-restore
//! dance on disconnect (UPDI has no DWEN-equivalent to manage).

use super::{ProbeError, ProbeSession, ProbeState, StopCause, Transport, TransportError};
use crate::target::MemorySpace;

const FRAGMENT_INFO: u8 = 0x21;

mod op {
    pub const ACTIVATE: u8 = 0x01;
    pub const DEACTIVATE: u8 = 0x02;
    pub const HALT: u8 = 0x03;
    pub const RESUME: u8 = 0x04;
    pub const STEP: u8 = 0x05;
    pub const RESET: u8 = 0x06;
    pub const READ: u8 = 0x07;
    pub const WRITE: u8 = 0x08;
    pub const READ_PC: u8 = 0x09;
    pub const WRITE_PC: u8 = 0x0A;
    pub const SET_HW_BP: u8 = 0x0B;
    pub const CLEAR_HW_BP: u8 = 0x0C;
    pub const POLL_STATE: u8 = 0x0D;
    pub const SIGN_ON: u8 = 0x0E;
    pub const DEVICE_ID: u8 = 0x0F;
}

fn space_tag(space: MemorySpace) -> u8 {
    match space {
        MemorySpace::Flash => 0,
        MemorySpace::Ram => 1,
        MemorySpace::Eeprom => 2,
        MemorySpace::Io => 3,
        MemorySpace::Registers => 4,
        MemorySpace::Fuses => 5,
        MemorySpace::Lockbits => 6,
        MemorySpace::Signatures => 7,
    }
}

pub struct UpdiProbe<T: Transport> {
    transport: T,
    activated: bool,
}

impl<T: Transport> UpdiProbe<T> {
    pub fn new(transport: T) -> Self {
        UpdiProbe {
            transport,
            activated: false,
        }
    }

    fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let mut message = vec![opcode];
        message.extend_from_slice(payload);
        let response = self.transport.send_command(FRAGMENT_INFO, &message)?;
        match response.first() {
            Some(0) => Ok(response[1..].to_vec()),
            Some(code) => Err(ProbeError::Protocol(format!("probe returned status {code:#x}"))),
            None => Err(ProbeError::Transport(TransportError::Io(
                "empty response".into(),
            ))),
        }
    }
}

impl<T: Transport> ProbeSession for UpdiProbe<T> {
    fn activate(&mut self) -> Result<(), ProbeError> {
        self.send(op::ACTIVATE, &[])?;
        self.activated = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), ProbeError> {
        self.send(op::DEACTIVATE, &[])?;
        self.activated = false;
        Ok(())
    }

    fn halt(&mut self) -> Result<(), ProbeError> {
        self.send(op::HALT, &[])?;
        Ok(())
    }

    fn resume(&mut self, from: Option<u32>) -> Result<(), ProbeError> {
        let payload = from.map(|a| a.to_be_bytes().to_vec()).unwrap_or_default();
        self.send(op::RESUME, &payload)?;
        Ok(())
    }

    fn step(&mut self) -> Result<(), ProbeError> {
        self.send(op::STEP, &[])?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ProbeError> {
        self.send(op::RESET, &[])?;
        Ok(())
    }

    fn read(&mut self, space: MemorySpace, address: u32, length: u32) -> Result<Vec<u8>, ProbeError> {
        let mut payload = vec![space_tag(space)];
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        self.send(op::READ, &payload)
    }

    fn write(&mut self, space: MemorySpace, address: u32, data: &[u8]) -> Result<(), ProbeError> {
        let mut payload = vec![space_tag(space)];
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(data);
        self.send(op::WRITE, &payload)?;
        Ok(())
    }

    fn read_pc(&mut self) -> Result<u32, ProbeError> {
        let bytes = self.send(op::READ_PC, &[])?;
        let mut buf = [0u8; 4];
        let n = bytes.len().min(4);
        buf[4 - n..].copy_from_slice(&bytes[..n]);
        Ok(u32::from_be_bytes(buf))
    }

    fn write_pc(&mut self, address: u32) -> Result<(), ProbeError> {
        self.send(op::WRITE_PC, &address.to_be_bytes())?;
        Ok(())
    }

    fn set_hw_bp(&mut self, slot: u8, address: u32) -> Result<(), ProbeError> {
        let mut payload = vec![slot];
        payload.extend_from_slice(&address.to_be_bytes());
        self.send(op::SET_HW_BP, &payload)?;
        Ok(())
    }

    fn clear_hw_bp(&mut self, slot: u8) -> Result<(), ProbeError> {
        self.send(op::CLEAR_HW_BP, &[slot])?;
        Ok(())
    }

    fn poll_state(&mut self) -> Result<ProbeState, ProbeError> {
        let bytes = self.send(op::POLL_STATE, &[])?;
        Ok(match bytes.first() {
            Some(0) => ProbeState::Running,
            Some(1) => ProbeState::Stopped(StopCause::Break),
            Some(2) => ProbeState::Stopped(StopCause::HardwareBreakpoint),
            Some(3) => ProbeState::Stopped(StopCause::SoftwareBreakpoint),
            Some(4) => ProbeState::Stopped(StopCause::Step),
            Some(5) => ProbeState::Stopped(StopCause::ExternalHalt),
            _ => ProbeState::Running,
        })
    }

    fn sign_on(&mut self) -> Result<(), ProbeError> {
        self.send(op::SIGN_ON, &[])?;
        Ok(())
    }

    fn device_id(&mut self) -> Result<[u8; 3], ProbeError> {
        let bytes = self.send(op::DEVICE_ID, &[])?;
        if bytes.len() < 3 {
            return Err(ProbeError::Protocol("short device id response".into()));
        }
        Ok([bytes[0], bytes[1], bytes[2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FakeTransport;

    #[test]
    fn activate_uses_updi_fragment_info() {
        let mut transport = FakeTransport::new();
        transport.push_response(vec![0]);
        let mut probe = UpdiProbe::new(transport);
        probe.activate().unwrap();
        assert_eq!(probe.transport.sent[0].0, FRAGMENT_INFO);
    }

    #[test]
    fn device_id_requires_three_bytes() {
        let mut transport = FakeTransport::new();
        transport.push_response(vec![0, 0x1E]);
        let mut probe = UpdiProbe::new(transport);
        assert!(probe.device_id().is_err());
    }
}
