//! `q`-prefixed query parsing.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{map, value},
    multi::separated_list1,
    sequence::separated_pair,
    IResult,
};

use super::util::{hex_bytes, hex_u32};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    Supported(Vec<Vec<u8>>),
    Attached,
    Command(Vec<u8>),
    TransferRead { object: Vec<u8>, annex: Vec<u8>, offset: u32, length: u32 },
    Other(Vec<u8>),
}

pub fn query_command(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    alt((query_supported, query_rcmd, query_attached, query_transfer, query_other))(input)
}

fn query_supported(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    let (input, _) = tag(b"Supported")(input)?;
    let (input, _) = char(':')(input)?;
    let (input, features) = separated_list1(char(';'), take_while1(|b: u8| b != b';'))(input)?;
    Ok((
        input,
        QueryCommand::Supported(features.into_iter().map(|f| f.to_vec()).collect()),
    ))
}

fn query_rcmd(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    let (input, _) = tag(b"Rcmd,")(input)?;
    map(hex_bytes, QueryCommand::Command)(input)
}

fn query_attached(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    value(QueryCommand::Attached, tag(b"Attached"))(input)
}

fn query_transfer(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    let (input, _) = tag(b"Xfer:")(input)?;
    let (input, object) = take_while1(|b: u8| b != b':')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = tag(b"read:")(input)?;
    let (input, annex) = take_while1(|b: u8| b != b':')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, (offset, length)) = separated_pair(hex_u32, char(','), hex_u32)(input)?;
    Ok((
        input,
        QueryCommand::TransferRead {
            object: object.to_vec(),
            annex: annex.to_vec(),
            offset,
            length,
        },
    ))
}

fn query_other(input: &[u8]) -> IResult<&[u8], QueryCommand> {
    map(take_while1(|_| true), |b: &[u8]| QueryCommand::Other(b.to_vec()))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_feature_list() {
        let (_, q) = query_command(b"Supported:multiprocess+;swbreak+").unwrap();
        assert_eq!(
            q,
            QueryCommand::Supported(vec![b"multiprocess+".to_vec(), b"swbreak+".to_vec()])
        );
    }

    #[test]
    fn parses_attached() {
        assert_eq!(query_command(b"Attached").unwrap().1, QueryCommand::Attached);
    }

    #[test]
    fn parses_rcmd() {
        // "reset" in hex
        let (_, q) = query_command(b"Rcmd,7265736574").unwrap();
        assert_eq!(q, QueryCommand::Command(b"reset".to_vec()));
    }

    #[test]
    fn parses_xfer_features_read() {
        let (_, q) = query_command(b"Xfer:features:read:target.xml:0,3fff").unwrap();
        assert_eq!(
            q,
            QueryCommand::TransferRead {
                object: b"features".to_vec(),
                annex: b"target.xml".to_vec(),
                offset: 0,
                length: 0x3fff,
            }
        );
    }

    #[test]
    fn unknown_query_falls_back_to_other() {
        let (_, q) = query_command(b"SomethingElse").unwrap();
        assert_eq!(q, QueryCommand::Other(b"SomethingElse".to_vec()));
    }
}
