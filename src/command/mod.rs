//! Command parsing: turns a decoded packet payload into a typed [`Command`].
//!
//! Built with `nom` combinators, one function per command shape, composed
//! with `alt`. A payload that matches none of these shapes is not an
//! error — the engine just replies with an empty response, which every GDB
//! client reads as "feature not supported here".

mod query;
mod util;
mod vcont;

pub use query::QueryCommand;
pub use vcont::{VContAction, VContCommand};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{map, opt, value},
    sequence::{preceded, separated_pair},
    IResult,
};

use util::{hex_bytes, hex_u32};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    Hardware,
    WriteWatchpoint,
    ReadWatchpoint,
    AccessWatchpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HaltReason,
    ReadGeneralRegisters,
    WriteGeneralRegisters(Vec<u8>),
    ReadRegister(u32),
    WriteRegister { index: u32, value: u32 },
    ReadMemory { address: u32, length: u32 },
    WriteMemoryHex { address: u32, data: Vec<u8> },
    WriteMemoryBinary { address: u32, data: Vec<u8> },
    Continue { address: Option<u32> },
    Step { address: Option<u32> },
    VCont(VContCommand),
    VContQuerySupported,
    InsertBreakpoint { kind: BreakpointKind, address: u32, size: u32 },
    RemoveBreakpoint { kind: BreakpointKind, address: u32, size: u32 },
    SelectThread,
    Query(QueryCommand),
    QuerySet(Vec<u8>),
    Kill,
    Restart,
    Unrecognized,
}

pub fn parse_command(input: &[u8]) -> Command {
    parse_command_inner(input)
        .map(|(_, cmd)| cmd)
        .unwrap_or(Command::Unrecognized)
}

fn parse_command_inner(input: &[u8]) -> IResult<&[u8], Command> {
    alt((
        value(Command::HaltReason, tag(b"?")),
        value(Command::ReadGeneralRegisters, tag(b"g")),
        map(preceded(char('G'), hex_bytes), Command::WriteGeneralRegisters),
        map(preceded(char('p'), hex_u32), Command::ReadRegister),
        write_register,
        read_memory,
        write_memory_binary,
        write_memory_hex,
        resume(b'c', |address| Command::Continue { address }),
        resume(b's', |address| Command::Step { address }),
        value(Command::VContQuerySupported, tag(b"vCont?")),
        map(preceded(tag(b"vCont;"), vcont::v_cont), Command::VCont),
        insert_breakpoint,
        remove_breakpoint,
        value(Command::SelectThread, preceded(char('H'), take_while1(|_| true))),
        map(preceded(char('q'), query::query_command), Command::Query),
        map(preceded(char('Q'), take_while1(|_| true)), |b: &[u8]| {
            Command::QuerySet(b.to_vec())
        }),
        value(Command::Kill, tag(b"k")),
        value(Command::Restart, preceded(char('R'), take_while1(|_| true))),
    ))(input)
}

fn write_register(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('P')(input)?;
    let (input, (index, value)) = separated_pair(hex_u32, char('='), hex_u32)(input)?;
    Ok((input, Command::WriteRegister { index, value }))
}

fn read_memory(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('m')(input)?;
    let (input, (address, length)) = separated_pair(hex_u32, char(','), hex_u32)(input)?;
    Ok((input, Command::ReadMemory { address, length }))
}

fn write_memory_hex(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('M')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, _length) = hex_u32(input)?;
    let (input, _) = char(':')(input)?;
    let (input, data) = hex_bytes(input)?;
    Ok((input, Command::WriteMemoryHex { address, data }))
}

fn write_memory_binary(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('X')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, _length) = hex_u32(input)?;
    let (input, _) = char(':')(input)?;
    Ok((&[], Command::WriteMemoryBinary { address, data: input.to_vec() }))
}

fn resume(
    tag_char: u8,
    build: impl Fn(Option<u32>) -> Command,
) -> impl Fn(&[u8]) -> IResult<&[u8], Command> {
    move |input: &[u8]| {
        let (input, _) = char(tag_char as char)(input)?;
        let (input, address) = opt(hex_u32)(input)?;
        Ok((input, build(address)))
    }
}

fn breakpoint_kind(input: &[u8]) -> IResult<&[u8], BreakpointKind> {
    alt((
        value(BreakpointKind::Software, char('0')),
        value(BreakpointKind::Hardware, char('1')),
        value(BreakpointKind::WriteWatchpoint, char('2')),
        value(BreakpointKind::ReadWatchpoint, char('3')),
        value(BreakpointKind::AccessWatchpoint, char('4')),
    ))(input)
}

fn insert_breakpoint(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('Z')(input)?;
    let (input, kind) = breakpoint_kind(input)?;
    let (input, _) = char(',')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, size) = hex_u32(input)?;
    Ok((input, Command::InsertBreakpoint { kind, address, size }))
}

fn remove_breakpoint(input: &[u8]) -> IResult<&[u8], Command> {
    let (input, _) = char('z')(input)?;
    let (input, kind) = breakpoint_kind(input)?;
    let (input, _) = char(',')(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, size) = hex_u32(input)?;
    Ok((input, Command::RemoveBreakpoint { kind, address, size }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_packets() {
        let cases: &[(&[u8], Command)] = &[
            (b"?", Command::HaltReason),
            (b"g", Command::ReadGeneralRegisters),
            (b"c", Command::Continue { address: None }),
            (b"s", Command::Step { address: None }),
            (b"k", Command::Kill),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_command(input), *expected, "input {:?}", input);
        }
    }

    #[test]
    fn parses_continue_with_address() {
        assert_eq!(
            parse_command(b"c100"),
            Command::Continue { address: Some(0x100) }
        );
    }

    #[test]
    fn parses_read_memory() {
        assert_eq!(
            parse_command(b"m7ffe,4"),
            Command::ReadMemory { address: 0x7ffe, length: 4 }
        );
    }

    #[test]
    fn parses_write_memory_binary() {
        match parse_command(b"X100,2:\x01\x02") {
            Command::WriteMemoryBinary { address, data } => {
                assert_eq!(address, 0x100);
                assert_eq!(data, vec![1, 2]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_insert_and_remove_breakpoint() {
        assert_eq!(
            parse_command(b"Z0,200,2"),
            Command::InsertBreakpoint {
                kind: BreakpointKind::Software,
                address: 0x200,
                size: 2
            }
        );
        assert_eq!(
            parse_command(b"z0,200,2"),
            Command::RemoveBreakpoint {
                kind: BreakpointKind::Software,
                address: 0x200,
                size: 2
            }
        );
    }

    #[test]
    fn unrecognized_command_does_not_error() {
        assert_eq!(parse_command(b"!!!not-a-command!!!"), Command::Unrecognized);
    }

    #[test]
    fn parses_register_read_write() {
        assert_eq!(parse_command(b"p10"), Command::ReadRegister(0x10));
        assert_eq!(
            parse_command(b"P10=ff"),
            Command::WriteRegister { index: 0x10, value: 0xff }
        );
    }
}
