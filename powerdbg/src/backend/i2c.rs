//! Transport over an i2c-dev character device.
//!
//! Register traffic is framed as a 4-byte big-endian address write followed
//! by a data transfer. Probing scans the candidate slave addresses and
//! keeps the first one that completes a read.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use tracing::debug;

use crate::backend::{Backend, ProbeOutcome, TargetHandle, TransportError};

const DEFAULT_DEVICE: &str = "/dev/i2c-4";
const DEFAULT_SLAVE_ADDRESS: u16 = 0x50;

// From linux/i2c-dev.h.
nix::ioctl_write_int_bad!(i2c_slave, 0x0703);

#[derive(Debug)]
pub struct I2cBackend {
    device: PathBuf,
    slave_address: u16,
    file: Option<File>,
    /// The slave address that answered the probe scan.
    selected: Option<u16>,
}

impl I2cBackend {
    pub fn new(device: Option<&str>, slave_address: Option<u16>) -> Self {
        I2cBackend {
            device: PathBuf::from(device.unwrap_or(DEFAULT_DEVICE)),
            slave_address: slave_address.unwrap_or(DEFAULT_SLAVE_ADDRESS),
            file: None,
            selected: None,
        }
    }

    fn io(&self, source: std::io::Error) -> TransportError {
        TransportError::io(self.device.display().to_string(), source)
    }

    fn set_slave(&mut self, addr: u16) -> Result<(), TransportError> {
        let file = self.file.as_ref().ok_or_else(|| {
            TransportError::Protocol(format!("{} is not open", self.device.display()))
        })?;
        unsafe { i2c_slave(file.as_raw_fd(), addr as _) }
            .map_err(|e| self.io(std::io::Error::from_raw_os_error(e as i32)))?;
        Ok(())
    }

    /// Address the selected slave and write the register address.
    fn begin_transfer(&mut self, addr: u64) -> Result<(), TransportError> {
        let slave = self.selected.ok_or(TransportError::NoDeviceFound)?;
        self.set_slave(slave)?;
        let addr = u32::try_from(addr)
            .map_err(|_| TransportError::Protocol(format!("address {addr:#x} exceeds 32 bits")))?;
        let mut file = self.file.as_ref().unwrap();
        file.write_all(&addr.to_be_bytes()).map_err(|e| {
            TransportError::io(self.device.display().to_string(), e)
        })
    }
}

impl Backend for I2cBackend {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn probe(&mut self, target: &TargetHandle) -> Result<ProbeOutcome, TransportError> {
        if self.selected.is_some() {
            return Ok(ProbeOutcome::Present);
        }
        if self.file.is_none() {
            match OpenOptions::new().read(true).write(true).open(&self.device) {
                Ok(file) => self.file = Some(file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(ProbeOutcome::Absent);
                }
                Err(e) => return Err(self.io(e)),
            }
        }

        // Scan the configured address first, then the conventional range.
        let mut candidates = vec![self.slave_address];
        candidates.extend((0x50..=0x57).filter(|a| *a != self.slave_address));
        for addr in candidates {
            if self.set_slave(addr).is_err() {
                continue;
            }
            let mut byte = [0u8; 1];
            if self.file.as_ref().unwrap().read_exact(&mut byte).is_ok() {
                debug!("i2c slave {addr:#x} answered for {}", target.path);
                self.selected = Some(addr);
                return Ok(ProbeOutcome::Present);
            }
        }
        Err(TransportError::NoDeviceFound)
    }

    fn release(&mut self, _target: &TargetHandle) -> Result<(), TransportError> {
        self.selected = None;
        self.file = None;
        Ok(())
    }

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError> {
        self.begin_transfer(addr)?;
        let mut bytes = [0u8; 8];
        self.file
            .as_ref()
            .unwrap()
            .read_exact(&mut bytes)
            .map_err(|e| self.io(e))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError> {
        self.begin_transfer(addr)?;
        self.file
            .as_ref()
            .unwrap()
            .write_all(&value.to_be_bytes())
            .map_err(|e| self.io(e))
    }

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError> {
        self.begin_transfer(addr)?;
        self.file
            .as_ref()
            .unwrap()
            .read_exact(data)
            .map_err(|e| self.io(e))
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        self.begin_transfer(addr)?;
        self.file
            .as_ref()
            .unwrap()
            .write_all(data)
            .map_err(|e| self.io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bus_device_probes_absent() {
        let mut backend = I2cBackend::new(Some("/nonexistent/powerdbg-i2c"), None);
        let handle = TargetHandle {
            path: "/pib0".to_string(),
            class: Some("pib".to_string()),
            index: Some(0),
            address: Some(0),
            size: None,
        };
        assert_eq!(backend.probe(&handle).unwrap(), ProbeOutcome::Absent);
    }

    #[test]
    fn operations_without_a_selected_slave_report_no_device() {
        let mut backend = I2cBackend::new(None, None);
        assert!(matches!(
            backend.read_register(0x10),
            Err(TransportError::NoDeviceFound)
        ));
    }
}
