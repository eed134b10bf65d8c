//! GDB remote serial protocol server.
//!
//! Exposes one halted hardware thread to a source-level debugger over TCP.
//! The packet engine lives in `packet`, the event loop and command
//! handlers in `stub`.

mod packet;
mod stub;

pub use stub::GdbServer;
