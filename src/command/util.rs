//! Hex helpers shared by the command parsers.

use nom::{bytes::complete::take_while1, combinator::map_res, IResult};

fn is_hex_digit(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

/// Parses a run of hex digits (big-endian) into a `u32`. Accepts 1-8
/// digits; addresses and lengths in this protocol never need more.
pub fn hex_u32(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(take_while1(is_hex_digit), |digits: &[u8]| {
        let text = std::str::from_utf8(digits).map_err(|_| ())?;
        u32::from_str_radix(text, 16).map_err(|_| ())
    })(input)
}

/// Parses a run of hex-nybble pairs into raw bytes.
pub fn hex_bytes(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map_res(take_while1(is_hex_digit), |digits: &[u8]| {
        if digits.len() % 2 != 0 {
            return Err(());
        }
        digits
            .chunks(2)
            .map(|pair| {
                let text = std::str::from_utf8(pair).map_err(|_| ())?;
                u8::from_str_radix(text, 16).map_err(|_| ())
            })
            .collect::<Result<Vec<u8>, ()>>()
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_u32() {
        assert_eq!(hex_u32(b"7ffe").unwrap().1, 0x7ffe);
    }

    #[test]
    fn parses_hex_bytes() {
        assert_eq!(hex_bytes(b"48656c6c6f").unwrap().1, b"Hello".to_vec());
    }

    #[test]
    fn rejects_odd_length_hex_bytes() {
        assert!(hex_bytes(b"abc").is_err());
    }
}
