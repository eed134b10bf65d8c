//! Bit-banged FSI over two GPIO lines.
//!
//! The clock and data lines are driven through GPIO value files. Everything
//! here is deliberately synchronous and in program order: the slave samples
//! data on clock edges, so no operation may be buffered or reordered.
//!
//! Frame format, MSB first: one start bit, one read/write bit, 32 address
//! bits, 64 data bits on writes, then an odd parity bit over everything
//! after the start bit. Reads clock in 64 data bits followed by an ack bit
//! driven by the slave.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, trace};

use crate::backend::{Backend, ProbeOutcome, TargetHandle, TransportError};

const DEFAULT_GPIO_DIR: &str = "/sys/class/gpio";
/// Half a clock period. FSI slaves are comfortable well above this rate;
/// GPIO file latency dominates anyway.
const HALF_PERIOD: Duration = Duration::from_micros(1);
/// Clock cycles with data held high to reset the slave's frame decoder.
const BREAK_CYCLES: usize = 50;
/// The slave identification register, present on every FSI slave.
const SLAVE_ID_REG: u64 = 0x0;

#[derive(Debug)]
pub struct BitBangFsi {
    dir: PathBuf,
    clock: Option<File>,
    data: Option<File>,
}

impl BitBangFsi {
    pub fn new(device: Option<&str>) -> Self {
        BitBangFsi {
            dir: PathBuf::from(device.unwrap_or(DEFAULT_GPIO_DIR)),
            clock: None,
            data: None,
        }
    }

    fn io(&self, source: std::io::Error) -> TransportError {
        TransportError::io(self.dir.display().to_string(), source)
    }

    fn open_lines(&mut self) -> Result<bool, TransportError> {
        if self.clock.is_some() {
            return Ok(true);
        }
        let open = |name: &str| -> std::io::Result<File> {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.dir.join(name).join("value"))
        };
        match (open("clock"), open("data")) {
            (Ok(clock), Ok(data)) => {
                self.clock = Some(clock);
                self.data = Some(data);
                Ok(true)
            }
            (Err(e), _) | (_, Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            (Err(e), _) | (_, Err(e)) => Err(self.io(e)),
        }
    }

    fn set_line(file: &mut File, high: bool) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(if high { b"1" } else { b"0" })
    }

    fn read_line(file: &mut File) -> std::io::Result<bool> {
        file.seek(SeekFrom::Start(0))?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)?;
        Ok(byte[0] == b'1')
    }

    fn clock_out(&mut self, bit: bool) -> Result<(), TransportError> {
        let (clock, data) = self.lines()?;
        Self::set_line(data, bit)
            .and_then(|()| Self::set_line(clock, true))
            .map_err(|e| TransportError::io("gpio", e))?;
        std::thread::sleep(HALF_PERIOD);
        let (clock, _) = self.lines()?;
        Self::set_line(clock, false).map_err(|e| TransportError::io("gpio", e))?;
        std::thread::sleep(HALF_PERIOD);
        Ok(())
    }

    fn clock_in(&mut self) -> Result<bool, TransportError> {
        let (clock, _) = self.lines()?;
        Self::set_line(clock, true).map_err(|e| TransportError::io("gpio", e))?;
        std::thread::sleep(HALF_PERIOD);
        let (clock, data) = self.lines()?;
        let bit = Self::read_line(data).map_err(|e| TransportError::io("gpio", e))?;
        Self::set_line(clock, false).map_err(|e| TransportError::io("gpio", e))?;
        std::thread::sleep(HALF_PERIOD);
        Ok(bit)
    }

    fn lines(&mut self) -> Result<(&mut File, &mut File), TransportError> {
        match (self.clock.as_mut(), self.data.as_mut()) {
            (Some(clock), Some(data)) => Ok((clock, data)),
            _ => Err(TransportError::Protocol(
                "FSI GPIO lines are not open".to_string(),
            )),
        }
    }

    fn shift_out(&mut self, value: u64, bits: u32) -> Result<u32, TransportError> {
        let mut ones = 0;
        for i in (0..bits).rev() {
            let bit = value >> i & 1 == 1;
            ones += bit as u32;
            self.clock_out(bit)?;
        }
        Ok(ones)
    }

    fn shift_in(&mut self, bits: u32) -> Result<u64, TransportError> {
        let mut value = 0u64;
        for _ in 0..bits {
            value = value << 1 | self.clock_in()? as u64;
        }
        Ok(value)
    }

    /// Hold data high through enough cycles to resynchronize the slave.
    fn send_break(&mut self) -> Result<(), TransportError> {
        for _ in 0..BREAK_CYCLES {
            self.clock_out(true)?;
        }
        Ok(())
    }

    fn frame_address(&mut self, addr: u64, write: bool) -> Result<u32, TransportError> {
        let addr = u32::try_from(addr)
            .map_err(|_| TransportError::Protocol(format!("address {addr:#x} exceeds 32 bits")))?;
        self.clock_out(true)?; // start bit
        let mut ones = 0;
        ones += self.shift_out(write as u64, 1)?;
        ones += self.shift_out(addr as u64, 32)?;
        Ok(ones)
    }
}

impl Backend for BitBangFsi {
    fn name(&self) -> &'static str {
        "fsi"
    }

    fn probe(&mut self, target: &TargetHandle) -> Result<ProbeOutcome, TransportError> {
        if !self.open_lines()? {
            return Ok(ProbeOutcome::Absent);
        }
        self.send_break()?;
        let id = self.read_register(SLAVE_ID_REG)?;
        trace!("slave id {id:#x} behind {}", target.path);
        // A floating bus reads back all ones (pulled up) or all zeroes.
        if id == u64::MAX || id == 0 {
            return Ok(ProbeOutcome::Absent);
        }
        debug!("FSI slave {id:#x} answered for {}", target.path);
        Ok(ProbeOutcome::Present)
    }

    fn release(&mut self, _target: &TargetHandle) -> Result<(), TransportError> {
        // Leave the bus idle so the next master finds a clean state.
        if self.clock.is_some() {
            self.clock_out(true)?;
            self.clock = None;
            self.data = None;
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError> {
        let ones = self.frame_address(addr, false)?;
        self.shift_out((ones % 2 == 0) as u64, 1)?; // odd parity
        let value = self.shift_in(64)?;
        if !self.clock_in()? {
            return Err(TransportError::Protocol(format!(
                "no slave ack for read of {addr:#x}"
            )));
        }
        Ok(value)
    }

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError> {
        let mut ones = self.frame_address(addr, true)?;
        ones += self.shift_out(value, 64)?;
        self.shift_out((ones % 2 == 0) as u64, 1)?;
        if !self.clock_in()? {
            return Err(TransportError::Protocol(format!(
                "no slave ack for write of {addr:#x}"
            )));
        }
        Ok(())
    }

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError> {
        // The serial link moves 8 aligned bytes per frame.
        for (i, chunk) in data.chunks_mut(8).enumerate() {
            let word = self.read_register(addr + 8 * i as u64)?;
            chunk.copy_from_slice(&word.to_be_bytes()[..chunk.len()]);
        }
        Ok(())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        for (i, chunk) in data.chunks(8).enumerate() {
            let mut bytes = [0u8; 8];
            if chunk.len() < 8 {
                // Read-modify-write the trailing partial word.
                bytes = self.read_register(addr + 8 * i as u64)?.to_be_bytes();
            }
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.write_register(addr + 8 * i as u64, u64::from_be_bytes(bytes))?;
        }
        Ok(())
    }
}
