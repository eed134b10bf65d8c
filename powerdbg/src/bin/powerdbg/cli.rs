//! Small argument parsers for the command line.

use anyhow::{anyhow, bail, Result};

/// Parse an index list of the form `0-5,7,9-11`.
pub fn parse_list(arg: &str, max: usize) -> Result<Vec<usize>> {
    let mut list = Vec::new();
    for token in arg.split(',') {
        let (from, to) = match token.split_once('-') {
            Some((from, to)) => (parse_index(from, max)?, parse_index(to, max)?),
            None => {
                let index = parse_index(token, max)?;
                (index, index)
            }
        };
        if from > to {
            bail!("invalid range {from}-{to}");
        }
        list.extend(from..=to);
    }
    Ok(list)
}

fn parse_index(text: &str, max: usize) -> Result<usize> {
    let index: usize = text
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid value '{text}'"))?;
    if index >= max {
        bail!("value {index} larger than max {}", max - 1);
    }
    Ok(index)
}

/// Parse a number, hex with an 0x prefix, decimal otherwise.
pub fn parse_u64(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid number '{text}'"))
}

pub fn parse_u16(text: &str) -> Result<u16, String> {
    let value = parse_u64(text)?;
    u16::try_from(value).map_err(|_| format!("'{text}' does not fit in 16 bits"))
}

/// Decode a byte string like `deadbeef`.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, String> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    if text.len() % 2 != 0 {
        return Err(format!("odd-length byte string '{text}'"));
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| format!("invalid byte string '{text}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_parse_ranges_and_singles() {
        assert_eq!(parse_list("0-3,5", 64).unwrap(), vec![0, 1, 2, 3, 5]);
        assert_eq!(parse_list("7", 8).unwrap(), vec![7]);
        assert_eq!(parse_list("1-1", 8).unwrap(), vec![1]);
        assert_eq!(
            parse_list("0-2,4,6-7", 8).unwrap(),
            vec![0, 1, 2, 4, 6, 7]
        );
    }

    #[test]
    fn lists_reject_bad_input() {
        assert!(parse_list("8", 8).is_err());
        assert!(parse_list("3-1", 8).is_err());
        assert!(parse_list("a", 8).is_err());
        assert!(parse_list("", 8).is_err());
        assert!(parse_list("1,,2", 8).is_err());
    }

    #[test]
    fn numbers_accept_both_bases() {
        assert_eq!(parse_u64("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_u64("4096").unwrap(), 4096);
        assert!(parse_u64("0xzz").is_err());
        assert_eq!(parse_u16("0x50").unwrap(), 0x50);
        assert!(parse_u16("0x10000").is_err());
    }

    #[test]
    fn byte_strings_decode() {
        assert_eq!(parse_hex_bytes("deadbeef").unwrap(), [0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex_bytes("abc").is_err());
    }
}
