//! Debug-server engine: one instance per accepted client connection,
//! a synchronous `Accepting -> Idle <-> Running` state machine built on top
//! of the codec, the command parser, and a [`ControllerHandle`].
//!
//! Structured after a synchronous listen/accept/dispatch loop with a
//! central command-dispatch match, adapted to call a controller instead of
//! a core directly and to run on plain blocking I/O rather than an async
//! runtime.

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{self, Inbound};
use crate::command::{self, BreakpointKind, Command, QueryCommand, VContAction};
use crate::controller::{ControllerEvent, ControllerHandle, TargetState};
use crate::decoder;
use crate::error::ServerError;
use crate::probe::StopCause;
use crate::response::{Response, StopReason};
use crate::target::{MemorySpace, TargetDescriptor};

const BREAK_OPCODE: u16 = 0x9598;
const RUNNING_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
enum BreakpointEntry {
    Hardware { slot: u8 },
    SoftwareOverlay { original: [u8; 2] },
}

struct PendingPageWrite {
    page_start: u32,
    bytes: Vec<u8>,
}

pub struct Engine {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    controller: ControllerHandle,
    events: Receiver<ControllerEvent>,
    no_ack: bool,
    breakpoints: HashMap<u32, BreakpointEntry>,
    pending_page: Option<PendingPageWrite>,
    descriptor: TargetDescriptor,
}

/// Accepts one client connection at a time for the lifetime of the
/// process, matching the "single client, single probe" scope named for
/// this server.
pub fn serve(
    listener: TcpListener,
    controller: ControllerHandle,
    events: Receiver<ControllerEvent>,
) -> Result<(), ServerError> {
    let mut events = events;
    loop {
        let (stream, addr) = listener
            .accept()
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        info!(peer = %addr, "client connected");
        events = serve_one(stream, controller.clone(), events);
    }
}

/// Activates the controller, runs the engine against `stream` until the
/// client disconnects or the session ends fatally, then deactivates and
/// hands the event receiver back for the next connection. Split out from
/// [`serve`] so a single session can be driven directly in tests.
pub fn serve_one(
    stream: TcpStream,
    controller: ControllerHandle,
    events: Receiver<ControllerEvent>,
) -> Receiver<ControllerEvent> {
    let events = match run_session(stream, controller, events) {
        Ok(events) => events,
        Err((events, e)) => {
            warn!(error = %e, "session ended");
            events
        }
    };
    events
}

fn run_session(
    stream: TcpStream,
    controller: ControllerHandle,
    events: Receiver<ControllerEvent>,
) -> Result<Receiver<ControllerEvent>, (Receiver<ControllerEvent>, ServerError)> {
    let setup = (|| -> Result<_, ServerError> {
        controller.activate()?;
        controller.stop()?;
        let descriptor = controller.describe()?;
        let reader = BufReader::new(stream.try_clone().map_err(|e| ServerError::Transport(e.to_string()))?);
        Ok((reader, descriptor))
    })();

    let (reader, descriptor) = match setup {
        Ok(v) => v,
        Err(e) => return Err((events, e)),
    };

    let mut engine = Engine {
        reader,
        writer: stream,
        controller: controller.clone(),
        events,
        no_ack: false,
        breakpoints: HashMap::new(),
        pending_page: None,
        descriptor,
    };

    let result = engine.run();
    let _ = engine.controller.deactivate();
    match result {
        Ok(()) => Ok(engine.events),
        Err(e) => Err((engine.events, e)),
    }
}

impl Engine {
    fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let inbound = codec::read_next(&mut self.reader).map_err(|e| ServerError::Transport(e.to_string()))?;
            let Some(inbound) = inbound else {
                return Ok(());
            };
            match inbound {
                Inbound::Ack | Inbound::Nack => continue,
                Inbound::Interrupt => {
                    self.controller.stop().ok();
                    continue;
                }
                Inbound::Packet(payload) => {
                    if !self.no_ack {
                        codec::write_ack(&mut self.writer).map_err(|e| ServerError::Transport(e.to_string()))?;
                    }
                    let command = command::parse_command(&payload);
                    self.dispatch(command)?;
                }
            }
        }
    }

    fn send(&mut self, response: &Response) -> Result<(), ServerError> {
        let bytes = codec::encode_packet(&response.to_wire_bytes());
        self.writer
            .write_all(&bytes)
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        Ok(())
    }

    fn dispatch(&mut self, command: Command) -> Result<(), ServerError> {
        // Continue/step put the target in motion and settle their own
        // stop-reply through `finish_stop`, possibly well after this
        // command returns; everything else replies with a single
        // immediate response built below.
        let resume_kind = match &command {
            Command::Continue { address } => Some((*address, false)),
            Command::Step { address } => Some((*address, true)),
            Command::VCont(vcont) => match vcont.actions.first() {
                Some((VContAction::Continue | VContAction::ContinueSignal(_), _)) => Some((None, false)),
                Some((VContAction::Step | VContAction::StepSignal(_), _)) => Some((None, true)),
                _ => None,
            },
            _ => None,
        };
        if let Some((address, is_step)) = resume_kind {
            let outcome = if is_step {
                self.software_step(address)
            } else {
                self.resume_and_wait(address)
            };
            return self.settle_mid_resume_error(outcome);
        }

        let result = self.try_dispatch(command);
        let response = match result {
            Ok(response) => response,
            Err(e) => match e.wire_response(false) {
                Some(wire) => Response::Error(wire),
                None if e.is_fatal() => return Err(e),
                None => Response::Empty,
            },
        };
        self.send(&response)
    }

    /// A resume-type command already sent its own response on success; on
    /// failure it still owes the client exactly one reply unless the
    /// failure happened mid-resume, in which case the session is torn
    /// down instead (per the transport/timeout-while-running handling).
    fn settle_mid_resume_error(&mut self, outcome: Result<(), ServerError>) -> Result<(), ServerError> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => match e.wire_response(true) {
                Some(wire) => self.send(&Response::Error(wire)),
                None if e.is_fatal() => Err(e),
                None => Err(e),
            },
        }
    }

    fn try_dispatch(&mut self, command: Command) -> Result<Response, ServerError> {
        Ok(match command {
            Command::HaltReason => Response::StopReply {
                signal: 5,
                program_counter: None,
                reason: None,
            },
            Command::ReadGeneralRegisters => self.read_general_registers()?,
            Command::WriteGeneralRegisters(values) => self.write_general_registers(&values)?,
            Command::ReadRegister(index) => self.read_one_register(index)?,
            Command::WriteRegister { index, value } => self.write_one_register(index, value)?,
            Command::ReadMemory { address, length } => self.read_memory(address, length)?,
            Command::WriteMemoryHex { address, data } => self.write_memory(address, &data)?,
            Command::WriteMemoryBinary { address, data } => self.write_memory(address, &data)?,
            Command::Continue { .. } | Command::Step { .. } => unreachable!("handled as a resume command above"),
            Command::VContQuerySupported => Response::Raw(b"vCont;c;C;s;S;t".to_vec()),
            Command::VCont(vcont) => {
                if let Some((VContAction::Stop, _)) = vcont.actions.first() {
                    self.controller.stop()?;
                    Response::Ok
                } else {
                    unreachable!("continue/step vCont actions are handled as a resume command above")
                }
            }
            Command::InsertBreakpoint { kind, address, .. } => self.insert_breakpoint(kind, address)?,
            Command::RemoveBreakpoint { kind, address, .. } => self.remove_breakpoint(kind, address)?,
            Command::SelectThread => Response::Ok,
            Command::Query(query) => self.handle_query(query)?,
            Command::QuerySet(bytes) => self.handle_query_set(&bytes),
            Command::Kill => Response::Ok,
            Command::Restart => {
                self.controller.reset()?;
                Response::Ok
            }
            Command::Unrecognized => Response::Empty,
        })
    }

    fn flush_pending_page(&mut self) -> Result<(), ServerError> {
        if let Some(page) = self.pending_page.take() {
            self.controller
                .write_memory(MemorySpace::Flash, page.page_start, page.bytes)?;
        }
        Ok(())
    }

    fn read_general_registers(&mut self) -> Result<Response, ServerError> {
        let indices: Vec<u8> = (0..32).collect();
        let bytes = self.controller.read_memory(MemorySpace::Registers, 0, indices.len() as u32)?;
        Ok(Response::Raw(crate::response::hex_encode(&bytes).into_bytes()))
    }

    fn write_general_registers(&mut self, values: &[u8]) -> Result<Response, ServerError> {
        self.controller.write_memory(MemorySpace::Registers, 0, values.to_vec())?;
        Ok(Response::Ok)
    }

    fn read_one_register(&mut self, index: u32) -> Result<Response, ServerError> {
        if index == crate::response::PC_GDB_INDEX {
            let pc = self.controller.read_program_counter()?;
            return Ok(Response::Raw(crate::response::hex_encode(&pc.to_le_bytes()).into_bytes()));
        }
        let bytes = self.controller.read_memory(MemorySpace::Registers, index, 1)?;
        Ok(Response::Raw(crate::response::hex_encode(&bytes).into_bytes()))
    }

    fn write_one_register(&mut self, index: u32, value: u32) -> Result<Response, ServerError> {
        if index == crate::response::PC_GDB_INDEX {
            self.controller.set_program_counter(value)?;
            return Ok(Response::Ok);
        }
        self.controller
            .write_memory(MemorySpace::Registers, index, vec![value as u8])?;
        Ok(Response::Ok)
    }

    fn read_memory(&mut self, flat_address: u32, length: u32) -> Result<Response, ServerError> {
        let split = self
            .descriptor
            .decode_range(flat_address, length)
            .ok_or(ServerError::AddressDecode { address: flat_address })?;
        let bytes = self.controller.read_memory(split.space, split.offset, length)?;
        Ok(Response::Raw(crate::response::hex_encode(&bytes).into_bytes()))
    }

    fn write_memory(&mut self, flat_address: u32, data: &[u8]) -> Result<Response, ServerError> {
        let split = self
            .descriptor
            .decode_range(flat_address, data.len() as u32)
            .ok_or(ServerError::AddressDecode { address: flat_address })?;
        if split.space == MemorySpace::Flash {
            self.accumulate_flash_write(split.offset, data);
        } else {
            self.controller.write_memory(split.space, split.offset, data.to_vec())?;
        }
        self.flush_pending_page()?;
        Ok(Response::Ok)
    }

    fn accumulate_flash_write(&mut self, offset: u32, data: &[u8]) {
        let page_size = self.descriptor.flash_page_size;
        let page_start = self.descriptor.page_containing(offset);
        let within_page = (offset - page_start) as usize;
        let page = self.pending_page.get_or_insert_with(|| PendingPageWrite {
            page_start,
            bytes: vec![0u8; page_size as usize],
        });
        if page.page_start != page_start {
            page.page_start = page_start;
            page.bytes = vec![0u8; page_size as usize];
        }
        let end = (within_page + data.len()).min(page.bytes.len());
        page.bytes[within_page..end].copy_from_slice(&data[..end - within_page]);
    }

    fn insert_breakpoint(&mut self, kind: BreakpointKind, flat_address: u32) -> Result<Response, ServerError> {
        if kind != BreakpointKind::Software && kind != BreakpointKind::Hardware {
            return Ok(Response::Empty);
        }
        if self.breakpoints.contains_key(&flat_address) {
            return Ok(Response::Ok);
        }
        // Code only lives in flash; hardware breakpoints are PC-match slots
        // and software breakpoints are a flash-word overlay, so a request
        // against RAM (or anything else) can never be honored either way.
        let in_flash = self
            .descriptor
            .decode_range(flat_address, 2)
            .map(|split| split.space == MemorySpace::Flash)
            .unwrap_or(false);
        if !in_flash {
            return Err(ServerError::BreakpointResource { address: flat_address });
        }
        if kind == BreakpointKind::Hardware {
            let slot = self.controller.set_breakpoint(flat_address)?;
            self.breakpoints.insert(flat_address, BreakpointEntry::Hardware { slot });
            return Ok(Response::Ok);
        }
        match self.controller.set_breakpoint(flat_address) {
            Ok(slot) => {
                self.breakpoints.insert(flat_address, BreakpointEntry::Hardware { slot });
            }
            Err(ServerError::BreakpointResource { .. }) => {
                let split = self
                    .descriptor
                    .decode_range(flat_address, 2)
                    .ok_or(ServerError::AddressDecode { address: flat_address })?;
                let original = self.controller.read_memory(split.space, split.offset, 2)?;
                let mut original_bytes = [0u8; 2];
                original_bytes.copy_from_slice(&original[..2]);
                self.controller
                    .write_memory(split.space, split.offset, BREAK_OPCODE.to_le_bytes().to_vec())?;
                self.flush_pending_page()?;
                self.breakpoints
                    .insert(flat_address, BreakpointEntry::SoftwareOverlay { original: original_bytes });
            }
            Err(e) => return Err(e),
        }
        Ok(Response::Ok)
    }

    fn remove_breakpoint(&mut self, kind: BreakpointKind, flat_address: u32) -> Result<Response, ServerError> {
        if kind != BreakpointKind::Software && kind != BreakpointKind::Hardware {
            return Ok(Response::Empty);
        }
        match self.breakpoints.remove(&flat_address) {
            Some(BreakpointEntry::Hardware { slot }) => {
                self.controller.clear_breakpoint(slot)?;
            }
            Some(BreakpointEntry::SoftwareOverlay { original }) => {
                let split = self
                    .descriptor
                    .decode_range(flat_address, 2)
                    .ok_or(ServerError::AddressDecode { address: flat_address })?;
                self.controller.write_memory(split.space, split.offset, original.to_vec())?;
                self.flush_pending_page()?;
            }
            None => {}
        }
        Ok(Response::Ok)
    }

    /// Plants temporary hardware breakpoints to emulate a step over
    /// CPSE/SBRC/SBRS/SBIC/SBIS, since hardware single-step does not know
    /// about the AVR's conditional-skip instructions. Every other
    /// instruction steps natively.
    fn software_step(&mut self, from: Option<u32>) -> Result<(), ServerError> {
        if let Some(address) = from {
            self.controller.set_program_counter(address)?;
        }
        let pc = self.controller.read_program_counter()?;
        let may_skip_next = self
            .decode_at(pc)
            .map(|instr| instr.may_skip_next)
            .unwrap_or(false);

        if !may_skip_next {
            self.controller.step()?;
            self.finish_stop(Some(StopReason::Step))
        } else {
            let landing_a = pc + 2;
            let next_size = self
                .decode_at(landing_a)
                .map(|instr| instr.byte_size as u32)
                .unwrap_or(2);
            let landing_b = landing_a + next_size;
            let slot_a = self.controller.set_breakpoint(landing_a)?;
            let slot_b = self.controller.set_breakpoint(landing_b)?;
            self.controller.resume(None)?;
            self.wait_for_halt()?;
            self.controller.clear_breakpoint(slot_a)?;
            self.controller.clear_breakpoint(slot_b)?;
            self.finish_stop(Some(StopReason::Step))
        }
    }

    /// Decodes the instruction at flat address `address`, reading up to 4
    /// bytes of program memory through the controller.
    fn decode_at(&mut self, address: u32) -> Option<decoder::Instruction> {
        let split = self
            .descriptor
            .decode_range(address, 4)
            .or_else(|| self.descriptor.decode_range(address, 2))?;
        let bytes = self.controller.read_memory(split.space, split.offset, 4).ok()?;
        decoder::decode_one(&bytes, 0)
    }

    fn resume_and_wait(&mut self, from: Option<u32>) -> Result<(), ServerError> {
        self.controller.resume(from)?;
        self.wait_for_halt()?;
        self.finish_stop(None)
    }

    /// Blocks until the controller reports the target halted, checking the
    /// connection for an async interrupt byte between polls. Cancelling a
    /// resume this way still produces exactly one stop-reply: the loop
    /// only ever exits through one of these two paths.
    fn wait_for_halt(&mut self) -> Result<(), ServerError> {
        loop {
            match self.events.try_recv() {
                Ok(ControllerEvent::StateChanged(TargetState::Stopped(_))) => return Ok(()),
                Ok(_) => {}
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(ServerError::Transport("controller worker stopped".into()))
                }
            }
            if matches!(self.controller.cached_state(), TargetState::Stopped(_)) {
                return Ok(());
            }
            if self.check_interrupt()? {
                self.controller.stop()?;
            }
            std::thread::sleep(RUNNING_POLL_INTERVAL);
        }
    }

    fn check_interrupt(&mut self) -> Result<bool, ServerError> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        let mut byte = [0u8; 1];
        let result = self.reader.get_ref().peek(&mut byte);
        self.reader
            .get_ref()
            .set_read_timeout(None)
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        match result {
            Ok(1) if byte[0] == 0x03 => Ok(true),
            _ => Ok(false),
        }
    }

    fn finish_stop(&mut self, forced_reason: Option<StopReason>) -> Result<(), ServerError> {
        let state = self.controller.query_state()?;
        let pc = self.controller.read_program_counter().ok();
        let reason = forced_reason.or_else(|| match state {
            TargetState::Stopped(StopCause::SoftwareBreakpoint) => Some(StopReason::SoftwareBreak),
            TargetState::Stopped(StopCause::HardwareBreakpoint) => Some(StopReason::HardwareBreak),
            _ => None,
        });
        let signal = if matches!(state, TargetState::Stopped(StopCause::ExternalHalt)) {
            2
        } else {
            5
        };
        let response = Response::StopReply {
            signal,
            program_counter: pc,
            reason,
        };
        self.send(&response)
    }

    fn handle_query(&mut self, query: QueryCommand) -> Result<Response, ServerError> {
        Ok(match query {
            QueryCommand::Supported(_) => Response::Raw(
                b"PacketSize=8192;swbreak+;hwbreak+;qXfer:features:read+;QStartNoAckMode+".to_vec(),
            ),
            QueryCommand::Attached => Response::Raw(b"1".to_vec()),
            QueryCommand::Command(bytes) => self.handle_monitor_command(&bytes),
            QueryCommand::TransferRead { object, annex, offset, length } => {
                if object == b"features" && annex == b"target.xml" {
                    let xml = target_description_xml(&self.descriptor);
                    Response::Raw(xfer_reply(xml.as_bytes(), offset, length))
                } else {
                    Response::Empty
                }
            }
            QueryCommand::Other(_) => Response::Empty,
        })
    }

    fn handle_query_set(&mut self, bytes: &[u8]) -> Response {
        if bytes == b"StartNoAckMode" {
            self.no_ack = true;
            Response::Ok
        } else {
            Response::Empty
        }
    }

    fn handle_monitor_command(&mut self, command: &[u8]) -> Response {
        let text = String::from_utf8_lossy(command);
        debug!(command = %text, "monitor command");
        let reply = match text.trim() {
            "reset" => {
                let _ = self.controller.reset();
                "target reset\n".to_string()
            }
            "help" => "available commands: reset, help, version, targets\n".to_string(),
            "version" => concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), "\n").to_string(),
            "targets" => "known targets: atmega328p, attiny85, atmega4809\n".to_string(),
            other => format!("unknown monitor command: {other}\n"),
        };
        let mut out = b"O".to_vec();
        out.extend(crate::response::hex_encode(reply.as_bytes()).into_bytes());
        Response::Raw(out)
    }
}

fn target_description_xml(descriptor: &TargetDescriptor) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><!DOCTYPE target SYSTEM \"gdb-target.dtd\"><target><architecture>avr</architecture>");
    out.push_str("<feature name=\"org.gnu.gdb.avr.core\">");
    for register in &descriptor.registers {
        out.push_str(&format!(
            "<reg name=\"{}\" bitsize=\"{}\" regnum=\"{}\"/>",
            register.name,
            register.width_bytes as u32 * 8,
            register.gdb_index
        ));
    }
    out.push_str("</feature></target>");
    out
}

fn xfer_reply(full: &[u8], offset: u32, length: u32) -> Vec<u8> {
    let offset = offset as usize;
    if offset >= full.len() {
        return b"l".to_vec();
    }
    let end = (offset + length as usize).min(full.len());
    let mut out = if end == full.len() { vec![b'l'] } else { vec![b'm'] };
    out.extend_from_slice(&full[offset..end]);
    out
}
