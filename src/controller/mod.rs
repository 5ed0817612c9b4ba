//! Target controller: serializes every probe interaction through one
//! worker thread, so at most one probe operation is ever in flight
//! regardless of how many callers are active. A `RuntimeTarget::process`-
//! style two-stage dispatch generalized into a queue a caller submits to
//! and blocks on, rather than something polled externally.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ServerError;
use crate::probe::{ProbeError, ProbeSession, ProbeState, StopCause};
use crate::target::catalog::TargetCatalog;
use crate::target::{MemorySpace, TargetDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Suspended,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unknown,
    Running,
    Stopped(StopCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    StateChanged(TargetState),
}

pub enum Op {
    Activate,
    Deactivate,
    Stop,
    Resume(Option<u32>),
    Step,
    Reset,
    ReadRegisters { indices: Vec<u8> },
    WriteRegisters { pairs: Vec<(u8, u8)> },
    ReadMemory { space: MemorySpace, address: u32, length: u32 },
    WriteMemory { space: MemorySpace, address: u32, data: Vec<u8> },
    SetBreakpoint { address: u32 },
    ClearBreakpoint { slot: u8 },
    SetProgramCounter(u32),
    ReadProgramCounter,
    QueryState,
    Describe,
}

pub enum Reply {
    Unit,
    Bytes(Vec<u8>),
    U32(u32),
    Slot(u8),
    State(TargetState),
    Descriptor(Box<TargetDescriptor>),
}

type PendingReply = Sender<Result<Reply, ServerError>>;

struct Request {
    op: Op,
    reply_to: PendingReply,
}

/// A lightweight, cloneable handle callers submit requests through. The
/// worker thread is the only place a probe call actually happens.
#[derive(Clone)]
pub struct ControllerHandle {
    requests: Sender<Request>,
    timeout: Duration,
    /// Cheap, lock-guarded read of the last-known target state, so the
    /// engine's running-episode poll loop doesn't have to round-trip
    /// through the request queue just to check for a halt.
    state_cache: Arc<Mutex<TargetState>>,
}

impl ControllerHandle {
    pub fn cached_state(&self) -> TargetState {
        *self.state_cache.lock()
    }
}

impl ControllerHandle {
    fn call(&self, op: Op) -> Result<Reply, ServerError> {
        let (tx, rx) = mpsc::channel();
        self.requests
            .send(Request { op, reply_to: tx })
            .map_err(|_| ServerError::Transport("controller worker is gone".into()))?;
        rx.recv_timeout(self.timeout)
            .map_err(|_| ServerError::Timeout(self.timeout))?
    }

    pub fn activate(&self) -> Result<(), ServerError> {
        self.call(Op::Activate).map(|_| ())
    }

    pub fn deactivate(&self) -> Result<(), ServerError> {
        self.call(Op::Deactivate).map(|_| ())
    }

    pub fn stop(&self) -> Result<(), ServerError> {
        self.call(Op::Stop).map(|_| ())
    }

    pub fn resume(&self, from: Option<u32>) -> Result<(), ServerError> {
        self.call(Op::Resume(from)).map(|_| ())
    }

    pub fn step(&self) -> Result<(), ServerError> {
        self.call(Op::Step).map(|_| ())
    }

    pub fn reset(&self) -> Result<(), ServerError> {
        self.call(Op::Reset).map(|_| ())
    }

    pub fn read_memory(&self, space: MemorySpace, address: u32, length: u32) -> Result<Vec<u8>, ServerError> {
        match self.call(Op::ReadMemory { space, address, length })? {
            Reply::Bytes(b) => Ok(b),
            _ => unreachable!("ReadMemory always replies with Bytes"),
        }
    }

    pub fn write_memory(&self, space: MemorySpace, address: u32, data: Vec<u8>) -> Result<(), ServerError> {
        self.call(Op::WriteMemory { space, address, data }).map(|_| ())
    }

    pub fn set_breakpoint(&self, address: u32) -> Result<u8, ServerError> {
        match self.call(Op::SetBreakpoint { address })? {
            Reply::Slot(s) => Ok(s),
            _ => unreachable!("SetBreakpoint always replies with Slot"),
        }
    }

    pub fn clear_breakpoint(&self, slot: u8) -> Result<(), ServerError> {
        self.call(Op::ClearBreakpoint { slot }).map(|_| ())
    }

    pub fn set_program_counter(&self, address: u32) -> Result<(), ServerError> {
        self.call(Op::SetProgramCounter(address)).map(|_| ())
    }

    pub fn read_program_counter(&self) -> Result<u32, ServerError> {
        match self.call(Op::ReadProgramCounter)? {
            Reply::U32(v) => Ok(v),
            _ => unreachable!("ReadProgramCounter always replies with U32"),
        }
    }

    pub fn query_state(&self) -> Result<TargetState, ServerError> {
        match self.call(Op::QueryState)? {
            Reply::State(s) => Ok(s),
            _ => unreachable!("QueryState always replies with State"),
        }
    }

    pub fn describe(&self) -> Result<TargetDescriptor, ServerError> {
        match self.call(Op::Describe)? {
            Reply::Descriptor(d) => Ok(*d),
            _ => unreachable!("Describe always replies with Descriptor"),
        }
    }
}

struct Worker<P: ProbeSession> {
    probe: P,
    catalog: TargetCatalog,
    state: ControllerState,
    target_state: TargetState,
    descriptor: Option<TargetDescriptor>,
    hw_slots_in_use: Vec<Option<u32>>,
    events: Sender<ControllerEvent>,
    state_cache: Arc<Mutex<TargetState>>,
}

impl<P: ProbeSession> Worker<P> {
    fn handle(&mut self, op: Op) -> Result<Reply, ServerError> {
        if self.state != ControllerState::Active && !matches!(op, Op::Activate) {
            return Err(ServerError::TargetControl("controller is suspended".into()));
        }
        match op {
            Op::Activate => {
                self.probe
                    .sign_on()
                    .map_err(probe_err_to_target_control)?;
                let signature = self.probe.device_id().map_err(probe_err_to_target_control)?;
                let descriptor = self
                    .catalog
                    .lookup(signature)
                    .cloned()
                    .ok_or_else(|| ServerError::Config(format!("unknown signature {signature:?}")))?;
                self.probe.activate().map_err(probe_err_to_target_control)?;
                self.hw_slots_in_use = vec![None; descriptor.hardware_breakpoint_slots as usize];
                self.descriptor = Some(descriptor);
                self.state = ControllerState::Active;
                self.target_state = TargetState::Unknown;
                Ok(Reply::Unit)
            }
            Op::Deactivate => {
                self.probe.deactivate().map_err(probe_err_to_target_control)?;
                self.state = ControllerState::Suspended;
                self.descriptor = None;
                Ok(Reply::Unit)
            }
            Op::Stop => {
                self.probe.halt().map_err(probe_err_to_target_control)?;
                self.refresh_state()?;
                Ok(Reply::Unit)
            }
            Op::Resume(from) => {
                self.probe.resume(from).map_err(probe_err_to_target_control)?;
                self.set_target_state(TargetState::Running);
                Ok(Reply::Unit)
            }
            Op::Step => {
                self.probe.step().map_err(probe_err_to_target_control)?;
                self.refresh_state()?;
                Ok(Reply::Unit)
            }
            Op::Reset => {
                self.probe.reset().map_err(probe_err_to_target_control)?;
                self.refresh_state()?;
                Ok(Reply::Unit)
            }
            Op::ReadRegisters { indices } => {
                let mut out = Vec::new();
                for index in indices {
                    let bytes = self
                        .probe
                        .read(MemorySpace::Registers, index as u32, 1)
                        .map_err(probe_err_to_target_control)?;
                    out.extend(bytes);
                }
                Ok(Reply::Bytes(out))
            }
            Op::WriteRegisters { pairs } => {
                for (index, value) in pairs {
                    self.probe
                        .write(MemorySpace::Registers, index as u32, &[value])
                        .map_err(probe_err_to_target_control)?;
                }
                Ok(Reply::Unit)
            }
            Op::ReadMemory { space, address, length } => {
                let bytes = self
                    .probe
                    .read(space, address, length)
                    .map_err(probe_err_to_address_decode(address))?;
                Ok(Reply::Bytes(bytes))
            }
            Op::WriteMemory { space, address, data } => {
                self.probe
                    .write(space, address, &data)
                    .map_err(probe_err_to_address_decode(address))?;
                Ok(Reply::Unit)
            }
            Op::SetBreakpoint { address } => {
                let slot = self
                    .hw_slots_in_use
                    .iter()
                    .position(|s| s.is_none())
                    .ok_or(ServerError::BreakpointResource { address })?;
                self.probe
                    .set_hw_bp(slot as u8, address)
                    .map_err(probe_err_to_breakpoint(address))?;
                self.hw_slots_in_use[slot] = Some(address);
                Ok(Reply::Slot(slot as u8))
            }
            Op::ClearBreakpoint { slot } => {
                self.probe
                    .clear_hw_bp(slot)
                    .map_err(probe_err_to_breakpoint(0))?;
                if let Some(entry) = self.hw_slots_in_use.get_mut(slot as usize) {
                    *entry = None;
                }
                Ok(Reply::Unit)
            }
            Op::SetProgramCounter(address) => {
                self.probe.write_pc(address).map_err(probe_err_to_target_control)?;
                Ok(Reply::Unit)
            }
            Op::ReadProgramCounter => {
                let pc = self.probe.read_pc().map_err(probe_err_to_target_control)?;
                Ok(Reply::U32(pc))
            }
            Op::QueryState => Ok(Reply::State(self.target_state)),
            Op::Describe => {
                let descriptor = self
                    .descriptor
                    .clone()
                    .ok_or_else(|| ServerError::Config("controller not active".into()))?;
                Ok(Reply::Descriptor(Box::new(descriptor)))
            }
        }
    }

    fn refresh_state(&mut self) -> Result<(), ServerError> {
        let state = self.probe.poll_state().map_err(probe_err_to_target_control)?;
        self.set_target_state(match state {
            ProbeState::Running => TargetState::Running,
            ProbeState::Stopped(cause) => TargetState::Stopped(cause),
        });
        Ok(())
    }

    fn set_target_state(&mut self, state: TargetState) {
        if self.target_state != state {
            self.target_state = state;
            *self.state_cache.lock() = state;
            let _ = self.events.send(ControllerEvent::StateChanged(state));
        }
    }
}

fn probe_err_to_target_control(e: ProbeError) -> ServerError {
    ServerError::TargetControl(e.to_string())
}

fn probe_err_to_breakpoint(address: u32) -> impl Fn(ProbeError) -> ServerError {
    move |_e| ServerError::BreakpointResource { address }
}

fn probe_err_to_address_decode(address: u32) -> impl Fn(ProbeError) -> ServerError {
    move |_e| ServerError::AddressDecode { address }
}

/// Spawns the controller worker thread and returns a cloneable handle plus
/// the event stream callers can watch for halt notifications while a
/// resume is outstanding.
pub fn spawn<P: ProbeSession + Send + 'static>(
    probe: P,
    catalog: TargetCatalog,
    timeout: Duration,
) -> (ControllerHandle, Receiver<ControllerEvent>) {
    let (requests_tx, requests_rx) = mpsc::channel::<Request>();
    let (events_tx, events_rx) = mpsc::channel();
    let state_cache = Arc::new(Mutex::new(TargetState::Unknown));
    let worker_state_cache = state_cache.clone();

    thread::spawn(move || {
        let mut worker = Worker {
            probe,
            catalog,
            state: ControllerState::Suspended,
            target_state: TargetState::Unknown,
            descriptor: None,
            hw_slots_in_use: Vec::new(),
            events: events_tx,
            state_cache: worker_state_cache,
        };
        const POLL_INTERVAL: Duration = Duration::from_millis(50);
        loop {
            match requests_rx.recv_timeout(POLL_INTERVAL) {
                Ok(request) => {
                    let result = worker.handle(request.op);
                    let _ = request.reply_to.send(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if worker.state == ControllerState::Active
                        && worker.target_state == TargetState::Running
                    {
                        let _ = worker.refresh_state();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    (
        ControllerHandle {
            requests: requests_tx,
            timeout,
            state_cache,
        },
        events_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{DebugWireProbe, FakeTransport};

    fn spawn_activated(extra_responses: usize) -> (ControllerHandle, Receiver<ControllerEvent>) {
        let mut transport = FakeTransport::new();
        transport.push_response(vec![0]); // sign_on
        transport.push_response(vec![0, 0x1E, 0x95, 0x0F]); // device_id
        transport.push_response(vec![0, 0]); // activate
        for _ in 0..extra_responses {
            transport.push_response(vec![0]);
        }
        let probe = DebugWireProbe::new(transport);
        spawn(probe, TargetCatalog::builtin(), Duration::from_secs(1))
    }

    #[test]
    fn activation_resolves_descriptor_from_signature() {
        let (handle, _events) = spawn_activated(0);
        handle.activate().unwrap();
        let descriptor = handle.describe().unwrap();
        assert_eq!(descriptor.name, "atmega328p");
    }

    #[test]
    fn commands_before_activation_are_rejected() {
        let transport = FakeTransport::new();
        let probe = DebugWireProbe::new(transport);
        let (handle, _events) = spawn(probe, TargetCatalog::builtin(), Duration::from_millis(200));
        assert!(handle.stop().is_err());
    }

    #[test]
    fn breakpoint_slots_are_exhausted_after_budget() {
        // atmega328p has exactly one hardware breakpoint slot.
        let (handle, _events) = spawn_activated(1);
        handle.activate().unwrap();
        handle.set_breakpoint(0x100).unwrap();
        assert!(handle.set_breakpoint(0x200).is_err());
    }
}
