//! Transport backends.
//!
//! Every register or memory access leaves the process through a [Backend].
//! One implementing type exists per transport; the binding from target class
//! to backend instance is resolved once when the system is built and stored
//! on each target as a [BackendId], never re-dispatched per call.

pub(crate) mod bitbang;
pub mod fake;
pub(crate) mod host;
pub(crate) mod i2c;
pub(crate) mod kernel;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced at the transport seam.
///
/// Backends must report every failure distinctly; returning stale data in
/// place of an error is never acceptable.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error on {device}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("operation timed out")]
    Timeout,
    #[error("bus busy")]
    BusBusy,
    #[error("address {addr:#x} is outside the {size:#x} byte register window")]
    OutOfWindow { addr: u64, size: u64 },
    #[error("no device found on the bus")]
    NoDeviceFound,
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub(crate) fn io(device: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io {
            device: device.into(),
            source,
        }
    }
}

/// What a backend learned about a target's hardware during probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The hardware responded and is usable.
    Present,
    /// The hardware is absent or not applicable on this system.
    Absent,
}

/// Handle of a backend instance inside a [crate::System].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendId(pub(crate) usize);

/// The identity a backend gets to see of the target it is asked to probe or
/// release. Backends never hold references into the tree.
#[derive(Debug, Clone)]
pub struct TargetHandle {
    pub path: String,
    pub class: Option<String>,
    pub index: Option<u32>,
    pub address: Option<u64>,
    pub size: Option<u64>,
}

/// The capability set every transport implements.
///
/// Register addresses are absolute bus addresses; callers add the target's
/// base address before dispatching. All operations are synchronous and must
/// not be reordered.
pub trait Backend: std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Determine whether the target's hardware is actually present.
    fn probe(&mut self, target: &TargetHandle) -> Result<ProbeOutcome, TransportError>;

    /// Give up wake-locks, bus arbitration or file handles held for the
    /// target.
    fn release(&mut self, target: &TargetHandle) -> Result<(), TransportError>;

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError>;

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError>;

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError>;

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError>;
}

/// The transport flavors a system description can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory image, no hardware. Used for host-side testing.
    Fake,
    /// The kernel FSI driver's raw device node.
    Kernel,
    /// Host-side register window (debugfs style).
    Host,
    /// I2C bus via an i2c-dev character device.
    I2c,
    /// Bit-banged FSI over GPIO lines.
    Bitbang,
}

impl BackendKind {
    /// Instantiate the transport. `device` and `slave_address` override the
    /// system description's defaults where the transport uses them.
    pub fn instantiate(
        self,
        device: Option<&str>,
        slave_address: Option<u16>,
    ) -> Box<dyn Backend> {
        match self {
            BackendKind::Fake => Box::new(fake::FakeBackend::new()),
            BackendKind::Kernel => Box::new(kernel::KernelFsi::new(device)),
            BackendKind::Host => Box::new(host::HostWindow::new(device)),
            BackendKind::I2c => Box::new(i2c::I2cBackend::new(device, slave_address)),
            BackendKind::Bitbang => Box::new(bitbang::BitBangFsi::new(device)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Fake => "fake",
            BackendKind::Kernel => "kernel",
            BackendKind::Host => "host",
            BackendKind::I2c => "i2c",
            BackendKind::Bitbang => "fsi",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fake" => Ok(BackendKind::Fake),
            "kernel" => Ok(BackendKind::Kernel),
            "host" => Ok(BackendKind::Host),
            "i2c" => Ok(BackendKind::I2c),
            "fsi" => Ok(BackendKind::Bitbang),
            _ => Err(format!(
                "'{s}' is not a valid backend. Choose from [fake, kernel, host, i2c, fsi]."
            )),
        }
    }
}
