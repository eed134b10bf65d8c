//! Operation-level units on top of the backend contract.
//!
//! A unit wraps one target of a known class and turns raw register traffic
//! into typed operations: [Thread] for hardware threads (run control,
//! GPR/SPR/NIA access, the attention facility), [Adu] for the memory access
//! unit (physical memory reads and writes).

pub mod adu;
pub mod layout;
pub mod thread;

pub use adu::Adu;
pub use thread::{Thread, ThreadStatus};
