//! Remote serial protocol framing.
//!
//! Packets look like `$<payload>#<hh>` where `<hh>` is the unsigned 8-bit
//! sum of the payload bytes in hex. `+` acknowledges a good packet, `-`
//! asks for retransmission, and a bare 0x03 byte is the interrupt request.
//!
//! Inbound checksums gate acceptance: a packet that does not verify is
//! surfaced as [Event::Corrupt] and must never reach command dispatch.

use crate::error::Error;

/// Maximum accepted packet size, matching common stub implementations.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Unsigned 8-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Frame a payload as `$<payload>#<hh>`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.push(b'$');
    framed.extend_from_slice(payload);
    framed.extend_from_slice(format!("#{:02x}", checksum(payload)).as_bytes());
    framed
}

/// One item recognized in the inbound byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// The client acknowledged our last response.
    Ack,
    /// The client asks for a retransmission.
    Nak,
    /// Interrupt request (a bare 0x03 byte).
    Interrupt,
    /// A complete packet whose checksum verified.
    Packet(Vec<u8>),
    /// A complete packet whose checksum did not match. Reply with '-'.
    Corrupt,
}

/// Incremental scanner over the inbound byte stream.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buf: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        PacketBuffer::default()
    }

    /// Append received bytes. An over-long packet empties the buffer and is
    /// reported as a protocol error; the connection survives.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_PACKET_SIZE {
            self.buf.clear();
            return Err(Error::Protocol(format!(
                "packet exceeds {MAX_PACKET_SIZE} bytes"
            )));
        }
        Ok(())
    }

    /// Scan off the next event, or `None` if the buffer holds no complete
    /// item yet.
    pub fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.buf.first()? {
                b'+' => {
                    self.buf.drain(..1);
                    return Some(Event::Ack);
                }
                b'-' => {
                    self.buf.drain(..1);
                    return Some(Event::Nak);
                }
                0x03 => {
                    self.buf.drain(..1);
                    return Some(Event::Interrupt);
                }
                b'$' => return self.scan_packet(),
                _ => {
                    // Noise between frames; skip it.
                    self.buf.drain(..1);
                }
            }
        }
    }

    fn scan_packet(&mut self) -> Option<Event> {
        let hash = self.buf.iter().position(|b| *b == b'#')?;
        if self.buf.len() < hash + 3 {
            return None;
        }

        let payload = self.buf[1..hash].to_vec();
        let sent = std::str::from_utf8(&self.buf[hash + 1..hash + 3])
            .ok()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        self.buf.drain(..hash + 3);

        match sent {
            Some(sum) if sum == checksum(&payload) => Some(Event::Packet(payload)),
            _ => Some(Event::Corrupt),
        }
    }
}

/// A parsed command, dispatch is a fixed match on this.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// `g`
    ReadGeneralRegisters,
    /// `p<id>`
    ReadRegister(u64),
    /// `m<addr>,<len>`
    ReadMemory { addr: u64, len: u64 },
    /// `M<addr>,<len>:<hex>`
    WriteMemory { addr: u64, data: Vec<u8> },
    /// `?`
    StopReason,
    /// `H<op><thread>`
    SetThread,
    /// `c` or `vCont;c`
    Continue,
    /// `s` or `vCont;s`
    Step,
    /// Anything else; answered with an empty reply.
    Unknown,
}

pub fn parse_command(payload: &[u8]) -> Result<Command, Error> {
    let Some((first, rest)) = payload.split_first() else {
        return Ok(Command::Unknown);
    };
    let command = match first {
        b'g' => Command::ReadGeneralRegisters,
        b'p' => Command::ReadRegister(parse_hex(rest)?),
        b'm' => {
            let (addr, len) = split_pair(rest, b',')?;
            Command::ReadMemory {
                addr: parse_hex(addr)?,
                len: parse_hex(len)?,
            }
        }
        b'M' => {
            let (head, hex) = split_pair(rest, b':')?;
            let (addr, len) = split_pair(head, b',')?;
            let data = decode_hex(hex)?;
            if data.len() as u64 != parse_hex(len)? {
                return Err(Error::Protocol(
                    "memory write length does not match its data".to_string(),
                ));
            }
            Command::WriteMemory {
                addr: parse_hex(addr)?,
                data,
            }
        }
        b'?' => Command::StopReason,
        b'H' => Command::SetThread,
        b'c' => Command::Continue,
        b's' => Command::Step,
        b'v' if rest.starts_with(b"Cont;c") => Command::Continue,
        b'v' if rest.starts_with(b"Cont;s") => Command::Step,
        _ => Command::Unknown,
    };
    Ok(command)
}

fn split_pair(bytes: &[u8], separator: u8) -> Result<(&[u8], &[u8]), Error> {
    let at = bytes
        .iter()
        .position(|b| *b == separator)
        .ok_or_else(|| Error::Protocol(format!("missing '{}'", separator as char)))?;
    Ok((&bytes[..at], &bytes[at + 1..]))
}

pub fn parse_hex(bytes: &[u8]) -> Result<u64, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Protocol("non-ASCII hex field".to_string()))?;
    u64::from_str_radix(text, 16).map_err(|_| Error::Protocol(format!("bad hex field '{text}'")))
}

pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn decode_hex(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Protocol("odd-length hex data".to_string()));
    }
    bytes
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| Error::Protocol("bad hex data".to_string()))
        })
        .collect()
}

/// A 64-bit register as 16 hex chars, big-endian byte order.
pub fn encode_register(value: u64) -> String {
    encode_hex(&value.to_be_bytes())
}

#[cfg(test)]
pub fn decode_register(hex: &str) -> u64 {
    let bytes = decode_hex(hex.as_bytes()).unwrap();
    u64::from_be_bytes(bytes.try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_the_byte_sum_mod_256() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"OK"), 0x9a);
        // Sums wrap at 8 bits.
        let wrapping = [0xffu8, 0xff, 0x03];
        assert_eq!(checksum(&wrapping), 0x01);
        assert_eq!(
            checksum(b"S05"),
            b"S05".iter().map(|b| *b as u32).sum::<u32>() as u8
        );
    }

    #[test]
    fn frame_appends_the_checksum() {
        assert_eq!(frame(b"OK"), b"$OK#9a");
        assert_eq!(frame(b""), b"$#00");
    }

    #[test]
    fn register_encoding_round_trips() {
        for value in [0u64, u64::MAX, 0x0123_4567_89ab_cdef, 1, 1 << 63] {
            assert_eq!(decode_register(&encode_register(value)), value);
        }
        // Big-endian: most significant byte first.
        assert_eq!(encode_register(0x0123_4567_89ab_cdef), "0123456789abcdef");
    }

    #[test]
    fn events_are_scanned_incrementally() {
        let mut rx = PacketBuffer::new();
        rx.extend(b"+$g#").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Ack));
        // The packet is incomplete until the checksum arrives.
        assert_eq!(rx.next_event(), None);
        rx.extend(b"67-").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Packet(b"g".to_vec())));
        assert_eq!(rx.next_event(), Some(Event::Nak));
        assert_eq!(rx.next_event(), None);
    }

    #[test]
    fn bad_checksums_are_never_accepted() {
        let mut rx = PacketBuffer::new();
        rx.extend(b"$g#00").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Corrupt));
        // The stream recovers afterwards.
        rx.extend(b"$g#67").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Packet(b"g".to_vec())));
    }

    #[test]
    fn interrupt_byte_and_noise() {
        let mut rx = PacketBuffer::new();
        rx.extend(b"\x03garbage$?#3f").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Interrupt));
        assert_eq!(rx.next_event(), Some(Event::Packet(b"?".to_vec())));
    }

    #[test]
    fn oversized_packets_are_a_protocol_error() {
        let mut rx = PacketBuffer::new();
        let huge = vec![b'a'; MAX_PACKET_SIZE + 1];
        assert!(matches!(rx.extend(&huge), Err(Error::Protocol(_))));
        // The buffer was dropped; the connection keeps working.
        rx.extend(b"$?#3f").unwrap();
        assert_eq!(rx.next_event(), Some(Event::Packet(b"?".to_vec())));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(
            parse_command(b"g").unwrap(),
            Command::ReadGeneralRegisters
        );
        assert_eq!(parse_command(b"p40").unwrap(), Command::ReadRegister(0x40));
        assert_eq!(
            parse_command(b"m31000,100").unwrap(),
            Command::ReadMemory {
                addr: 0x31000,
                len: 0x100
            }
        );
        assert_eq!(
            parse_command(b"M31000,4:0810827d").unwrap(),
            Command::WriteMemory {
                addr: 0x31000,
                data: vec![0x08, 0x10, 0x82, 0x7d]
            }
        );
        assert_eq!(parse_command(b"?").unwrap(), Command::StopReason);
        assert_eq!(parse_command(b"Hg0").unwrap(), Command::SetThread);
        assert_eq!(parse_command(b"c").unwrap(), Command::Continue);
        assert_eq!(parse_command(b"vCont;c").unwrap(), Command::Continue);
        assert_eq!(parse_command(b"vCont;s:1").unwrap(), Command::Step);
        assert_eq!(parse_command(b"qSupported").unwrap(), Command::Unknown);
        assert_eq!(parse_command(b"").unwrap(), Command::Unknown);
        assert!(parse_command(b"M31000,8:0810827d").is_err());
    }
}
