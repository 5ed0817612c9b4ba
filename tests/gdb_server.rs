//! End-to-end tests driving the wire protocol over a real loopback socket,
//! against a [`FakeTransport`]-backed probe, using the engine's `serve_one`
//! single-session entry point.

use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use avr_debug_server::codec::{self, Inbound};
use avr_debug_server::controller;
use avr_debug_server::probe::{DebugWireProbe, FakeTransport};
use avr_debug_server::server;
use avr_debug_server::target::catalog::TargetCatalog;

const ATMEGA328P_SIGNATURE: [u8; 3] = [0x1E, 0x95, 0x0F];
// Two hardware breakpoint slots, needed by the skip-step test below, which
// plants a temporary breakpoint pair.
const ATMEGA4809_SIGNATURE: [u8; 3] = [0x1E, 0x96, 0x51];

/// Spawns a controller over a `FakeTransport` seeded with `sign_on`,
/// `device_id`, `activate`, and the initial `halt`/`poll_state` pair the
/// session setup always issues, plus whatever `extra_responses` the test
/// body's own command traffic will consume, then runs one `serve_one`
/// session against a loopback connection.
fn session(signature: [u8; 3], extra_responses: Vec<Vec<u8>>) -> TcpStream {
    let mut transport = FakeTransport::new();
    transport.push_response(vec![0]); // sign_on
    let mut device_id = vec![0];
    device_id.extend_from_slice(&signature);
    transport.push_response(device_id); // device_id
    transport.push_response(vec![0, 0]); // activate: status, dwen_programmed
    transport.push_response(vec![0]); // initial stop: halt
    transport.push_response(vec![0, 1]); // initial stop: poll_state -> Break
    for response in extra_responses {
        transport.push_response(response);
    }

    let probe = DebugWireProbe::new(transport);
    let (handle, events) = controller::spawn(probe, TargetCatalog::builtin(), Duration::from_secs(2));

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        server::serve_one(stream, handle, events);
    });
    TcpStream::connect(addr).unwrap()
}

fn send_command(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&codec::encode_packet(payload)).unwrap();
}

fn expect_ack(reader: &mut BufReader<TcpStream>) {
    match codec::read_next(reader).unwrap().unwrap() {
        Inbound::Ack => {}
        other => panic!("expected ack, got {other:?}"),
    }
}

fn expect_packet(reader: &mut BufReader<TcpStream>) -> Vec<u8> {
    match codec::read_next(reader).unwrap().unwrap() {
        Inbound::Packet(payload) => payload,
        other => panic!("expected packet, got {other:?}"),
    }
}

#[test]
fn handshake_negotiates_features() {
    let mut client = session(ATMEGA328P_SIGNATURE, vec![]);
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(
        &mut client,
        b"qSupported:multiprocess+;swbreak+;hwbreak+;qRelocInsn+;no-resumed+",
    );
    expect_ack(&mut reader);
    let payload = expect_packet(&mut reader);
    assert_eq!(
        payload,
        b"PacketSize=8192;swbreak+;hwbreak+;qXfer:features:read+;QStartNoAckMode+"
    );
}

#[test]
fn memory_read_rejects_flash_ram_boundary_crossing() {
    let mut client = session(
        ATMEGA328P_SIGNATURE,
        vec![
            vec![0, 0xAA, 0xBB],                         // m7ffe,2
            vec![0, 1, 2, 3, 4, 5, 6, 7],                // m800060,8
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    // Straddles the gap between the end of flash and the RAM offset: no
    // declared memory space covers it.
    send_command(&mut client, b"m7ffe,4");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"E01");

    send_command(&mut client, b"m7ffe,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"aabb");

    send_command(&mut client, b"m800060,8");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"0102030405060708");
}

#[test]
fn hardware_breakpoint_set_and_clear_round_trip() {
    let mut client = session(
        ATMEGA328P_SIGNATURE,
        vec![
            vec![0], // set_hw_bp
            vec![0], // clear_hw_bp
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"Z1,100,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");

    send_command(&mut client, b"z1,100,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");
}

#[test]
fn software_breakpoint_falls_back_to_flash_overlay_when_hardware_slots_are_exhausted() {
    // atmega328p has exactly one hardware breakpoint slot; claim it first so
    // the next request is forced onto the flash-overlay path.
    let mut client = session(
        ATMEGA328P_SIGNATURE,
        vec![
            vec![0],               // Z1,50,2 set_hw_bp
            vec![0, 0xDE, 0xAD],   // Z0,200,2 read original bytes
            vec![0],               // Z0,200,2 write BREAK opcode
            vec![0],               // z0,200,2 restore original bytes
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"Z1,50,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");

    send_command(&mut client, b"Z0,200,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");

    send_command(&mut client, b"z0,200,2");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");
}

#[test]
fn plain_step_reports_a_step_stop_reply() {
    let mut client = session(
        ATMEGA328P_SIGNATURE,
        vec![
            vec![0, 0x00, 0x10],             // read_pc (planning)
            vec![0, 0x00, 0x00, 0x00, 0x00],  // read flash word at pc: NOP, NOP
            vec![0],                          // step()
            vec![0, 4],                        // poll_state -> Step
            vec![0, 0x00, 0x12],              // read_pc (final)
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"s");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"T0522:12000000;");
}

#[test]
fn step_over_skip_instruction_followed_by_a_four_byte_instruction_lands_past_it() {
    // pc holds SBRC r16,3 (0xFD03, a 2-byte skip instruction); pc+2 holds
    // CALL (0x940E plus its second word), a 4-byte instruction. The landing
    // breakpoints must be pc+2 and pc+2+4, not pc+2 and pc+4.
    let mut client = session(
        ATMEGA4809_SIGNATURE,
        vec![
            vec![0, 0x00, 0x40],                   // read_pc (planning)
            vec![0, 0x03, 0xFD, 0x0E, 0x94],        // decode at pc: SBRC r16,3; first word of CALL
            vec![0, 0x0E, 0x94, 0x00, 0x01],        // decode at pc+2: CALL, second word
            vec![0],                                // set_hw_bp at pc+2
            vec![0],                                // set_hw_bp at pc+2+4
            vec![0],                                // resume
            vec![0, 4],                              // poll_state -> Step
            vec![0],                                // clear_hw_bp
            vec![0],                                // clear_hw_bp
            vec![0, 0x00, 0x46],                   // read_pc (final) -> landed at pc+2+4 = 0x46
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"s");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"T0522:46000000;");
}

#[test]
fn async_interrupt_stops_the_target_with_signal_two() {
    let mut client = session(
        ATMEGA328P_SIGNATURE,
        vec![
            vec![0],             // resume
            vec![0],             // halt (triggered by the interrupt byte)
            vec![0, 5],          // poll_state -> ExternalHalt
            vec![0, 0x00, 0x00], // read_pc (final)
        ],
    );
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"c");
    expect_ack(&mut reader);

    thread::sleep(Duration::from_millis(50));
    client.write_all(&[0x03]).unwrap();

    let payload = expect_packet(&mut reader);
    assert_eq!(payload, b"T0222:00000000;");
}

#[test]
fn no_ack_mode_suppresses_acks_and_replies_empty_to_garbage() {
    let mut client = session(ATMEGA328P_SIGNATURE, vec![]);
    let mut reader = BufReader::new(client.try_clone().unwrap());

    send_command(&mut client, b"QStartNoAckMode");
    expect_ack(&mut reader);
    assert_eq!(expect_packet(&mut reader), b"OK");

    // No ack precedes this reply: no-ack mode is now active.
    send_command(&mut client, b"*** not a real command ***");
    assert_eq!(expect_packet(&mut reader), b"" as &[u8]);
}
