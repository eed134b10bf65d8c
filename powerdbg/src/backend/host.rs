//! Transport through a host-side register window.
//!
//! Used when the processor is debugged from its own host: the platform
//! exposes a fixed-offset register window (a debugfs file). Every access is
//! bounds-checked against the window before it reaches the file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use tracing::debug;

use crate::backend::{Backend, ProbeOutcome, TargetHandle, TransportError};

const DEFAULT_DEVICE: &str = "/sys/kernel/debug/powerpc/scom";

#[derive(Debug)]
pub struct HostWindow {
    device: PathBuf,
    file: Option<File>,
    /// Base address and size, taken from the first probed target that
    /// carries a register window (the pib, which spans its children).
    window: Option<(u64, u64)>,
}

impl HostWindow {
    pub fn new(device: Option<&str>) -> Self {
        HostWindow {
            device: PathBuf::from(device.unwrap_or(DEFAULT_DEVICE)),
            file: None,
            window: None,
        }
    }

    fn io(&self, source: std::io::Error) -> TransportError {
        TransportError::io(self.device.display().to_string(), source)
    }

    /// Translate a bus address to a window offset, refusing anything
    /// outside the window.
    fn offset(&self, addr: u64, len: u64) -> Result<u64, TransportError> {
        let (base, size) = self.window.ok_or_else(|| {
            TransportError::Protocol(format!("{} is not open", self.device.display()))
        })?;
        let offset = addr.checked_sub(base).filter(|o| o + len <= size);
        match offset {
            Some(offset) => Ok(offset),
            None => Err(TransportError::OutOfWindow { addr, size }),
        }
    }

    fn file(&self) -> Result<&File, TransportError> {
        self.file.as_ref().ok_or_else(|| {
            TransportError::Protocol(format!("{} is not open", self.device.display()))
        })
    }
}

impl Backend for HostWindow {
    fn name(&self) -> &'static str {
        "host"
    }

    fn probe(&mut self, target: &TargetHandle) -> Result<ProbeOutcome, TransportError> {
        if self.file.is_none() {
            match OpenOptions::new().read(true).write(true).open(&self.device) {
                Ok(file) => {
                    debug!("opened {}", self.device.display());
                    self.file = Some(file);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(ProbeOutcome::Absent);
                }
                Err(e) => return Err(self.io(e)),
            }
        }
        if self.window.is_none() {
            if let (Some(address), Some(size)) = (target.address, target.size) {
                self.window = Some((address, size));
                debug!("register window {address:#x}+{size:#x}");
            }
        }
        Ok(ProbeOutcome::Present)
    }

    fn release(&mut self, _target: &TargetHandle) -> Result<(), TransportError> {
        Ok(())
    }

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError> {
        let offset = self.offset(addr, 8)?;
        let mut bytes = [0u8; 8];
        self.file()?
            .read_exact_at(&mut bytes, offset)
            .map_err(|e| self.io(e))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError> {
        let offset = self.offset(addr, 8)?;
        self.file()?
            .write_all_at(&value.to_be_bytes(), offset)
            .map_err(|e| self.io(e))
    }

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError> {
        let offset = self.offset(addr, data.len() as u64)?;
        self.file()?
            .read_exact_at(data, offset)
            .map_err(|e| self.io(e))
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        let offset = self.offset(addr, data.len() as u64)?;
        self.file()?
            .write_all_at(data, offset)
            .map_err(|e| self.io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pib_handle() -> TargetHandle {
        TargetHandle {
            path: "/pib0".to_string(),
            class: Some("pib".to_string()),
            index: Some(0),
            address: Some(0x1000),
            size: Some(0x100),
        }
    }

    fn open_backend() -> (HostWindow, tempfile::NamedTempFile) {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[0u8; 0x100]).unwrap();
        let mut backend = HostWindow::new(image.path().to_str());
        assert_eq!(
            backend.probe(&pib_handle()).unwrap(),
            ProbeOutcome::Present
        );
        (backend, image)
    }

    #[test]
    fn accesses_are_window_relative() {
        let (mut backend, _image) = open_backend();
        backend.write_register(0x1008, 0xdead).unwrap();
        assert_eq!(backend.read_register(0x1008).unwrap(), 0xdead);
    }

    #[test]
    fn out_of_window_accesses_are_refused() {
        let (mut backend, _image) = open_backend();
        assert!(matches!(
            backend.read_register(0xfff),
            Err(TransportError::OutOfWindow { .. })
        ));
        // Reaches the end of the window exactly.
        assert!(backend.read_register(0x10f8).is_ok());
        assert!(matches!(
            backend.read_register(0x10fc),
            Err(TransportError::OutOfWindow { .. })
        ));
    }
}
