//! # Debug bridge for POWER processor subsystems
//!
//! powerdbg talks to processor subsystems that are only reachable through
//! low-level register buses: a bit-banged FSI link, an I2C bus, the kernel
//! FSI driver or a host-side register window. It models the hardware
//! topology as a device tree of [Target]s with their own probe/release
//! lifecycle, dispatches register and memory traffic through a per-class
//! [Backend], and can expose a halted hardware thread to GDB over the
//! remote serial protocol.
//!
//! # Examples
//!
//! ## Reading a register on every selected processor
//! ```no_run
//! # use powerdbg::Error;
//! use powerdbg::{config::Registry, BackendKind, SelectionState, System, TargetStatus};
//!
//! let registry = Registry::from_builtin_systems()?;
//! let mut system = System::new(registry.for_backend(BackendKind::Fake)?, None, None)?;
//!
//! // Select processor 0 and everything below it.
//! let selection = SelectionState::build(Some(&[0]), None, None, true)?;
//! selection.apply(&mut system);
//!
//! for pib in system.by_class("pib").collect::<Vec<_>>() {
//!     if !system.target(pib).selected() {
//!         continue;
//!     }
//!     if system.probe(pib)? != TargetStatus::Enabled {
//!         continue;
//!     }
//!     let value = system.read_register(pib, 0xf000f)?;
//!     println!("{value:#018x}");
//! }
//! # Ok::<(), Error>(())
//! ```
//!
//! powerdbg is built around three main interfaces: the [DeviceTree],
//! the [System] that owns it, and the [Backend] transports behind it.

pub mod backend;
pub mod chip;
pub mod config;
#[warn(missing_docs)]
pub mod devicetree;
mod error;
pub mod gdb_server;
#[warn(missing_docs)]
pub mod target;
#[cfg(test)]
pub(crate) mod testutil;

pub use crate::backend::{Backend, BackendId, BackendKind, ProbeOutcome, TransportError};
pub use crate::devicetree::{DeviceTree, NodeId, Property};
pub use crate::error::Error;
pub use crate::target::{SelectionState, System, Target, TargetStatus};

// Exported for host-side testing of everything above the transport seam.
pub use crate::backend::fake::{FakeBackend, FakeHandle};
