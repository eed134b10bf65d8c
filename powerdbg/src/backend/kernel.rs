//! Transport over the kernel FSI driver's raw device node.
//!
//! The driver exposes the slave's whole address space as a seekable file;
//! registers are 8 big-endian bytes at their bus address.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use tracing::debug;

use crate::backend::{Backend, ProbeOutcome, TargetHandle, TransportError};

const DEFAULT_DEVICE: &str = "/sys/class/fsi-master/fsi0/slave@00:00/raw";

#[derive(Debug)]
pub struct KernelFsi {
    device: PathBuf,
    file: Option<File>,
    /// Number of probed-and-not-released targets holding the node open.
    active: usize,
}

impl KernelFsi {
    pub fn new(device: Option<&str>) -> Self {
        KernelFsi {
            device: PathBuf::from(device.unwrap_or(DEFAULT_DEVICE)),
            file: None,
            active: 0,
        }
    }

    fn file(&self) -> Result<&File, TransportError> {
        self.file.as_ref().ok_or_else(|| {
            TransportError::Protocol(format!("{} is not open", self.device.display()))
        })
    }

    fn io(&self, source: std::io::Error) -> TransportError {
        TransportError::io(self.device.display().to_string(), source)
    }
}

impl Backend for KernelFsi {
    fn name(&self) -> &'static str {
        "kernel"
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
        // The driver has already scanned the bus; an openable node means
        // the slave is there.
        let _ = target;
        self.active += 1;
        Ok(ProbeOutcome::Present)
    }

    fn release(&mut self, target: &TargetHandle) -> Result<(), TransportError> {
        self.active = self.active.saturating_sub(1);
        if self.active == 0 && self.file.take().is_some() {
            debug!("closed {} after {}", self.device.display(), target.path);
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError> {
        let mut bytes = [0u8; 8];
        self.file()?
            .read_exact_at(&mut bytes, addr)
            .map_err(|e| self.io(e))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError> {
        self.file()?
            .write_all_at(&value.to_be_bytes(), addr)
            .map_err(|e| self.io(e))
    }

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError> {
        self.file()?
            .read_exact_at(data, addr)
            .map_err(|e| self.io(e))
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        self.file()?
            .write_all_at(data, addr)
            .map_err(|e| self.io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn handle(path: &str) -> TargetHandle {
        TargetHandle {
            path: path.to_string(),
            class: Some("pib".to_string()),
            index: Some(0),
            address: Some(0),
            size: Some(0x1000),
        }
    }

    #[test]
    fn missing_device_node_probes_absent() {
        let mut backend = KernelFsi::new(Some("/nonexistent/powerdbg-fsi-raw"));
        let outcome = backend.probe(&handle("/pib0")).unwrap();
        assert_eq!(outcome, ProbeOutcome::Absent);
    }

    #[test]
    fn registers_round_trip_through_the_device_node() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[0u8; 64]).unwrap();
        let path = image.path().to_str().unwrap().to_string();

        let mut backend = KernelFsi::new(Some(&path));
        assert_eq!(
            backend.probe(&handle("/pib0")).unwrap(),
            ProbeOutcome::Present
        );

        backend.write_register(0x10, 0x1122334455667788).unwrap();
        assert_eq!(backend.read_register(0x10).unwrap(), 0x1122334455667788);

        // Register bytes are big-endian on the wire.
        let mut bytes = [0u8; 8];
        backend.read_memory(0x10, &mut bytes).unwrap();
        assert_eq!(bytes, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    }

    #[test]
    fn release_closes_the_node_with_the_last_target() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let path = image.path().to_str().unwrap().to_string();

        let mut backend = KernelFsi::new(Some(&path));
        backend.probe(&handle("/pib0")).unwrap();
        backend.probe(&handle("/pib0/core0")).unwrap();

        backend.release(&handle("/pib0/core0")).unwrap();
        assert!(backend.file.is_some());
        backend.release(&handle("/pib0")).unwrap();
        assert!(backend.file.is_none());
    }
}
