//! Run control and register access for one hardware thread.

use bitfield::bitfield;
use tracing::debug;

use crate::backend::TransportError;
use crate::chip::layout;
use crate::devicetree::NodeId;
use crate::error::Error;
use crate::target::System;

bitfield! {
    /// Decoded thread status word.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ThreadStatus(u64);
    impl Debug;
    /// The thread exists and participates in execution.
    pub active, _: 0;
    /// The thread has stopped executing (halted, stepped or trapped).
    pub quiesced, _: 1;
}

/// How many status polls a synchronous stop/step waits before giving up.
const QUIESCE_RETRIES: usize = 1000;

/// A unit over one "thread" class target.
///
/// Created with [System::thread]; borrows the system for its lifetime, so
/// hardware access stays single-threaded by construction.
pub struct Thread<'a> {
    system: &'a mut System,
    id: NodeId,
}

impl System {
    /// Typed access to a thread target. Fails with `Configuration` if the
    /// target is of a different class.
    pub fn thread(&mut self, id: NodeId) -> Result<Thread<'_>, Error> {
        if self.target(id).class() != Some("thread") {
            return Err(Error::Configuration(format!(
                "{} is not a thread target",
                self.path(id)
            )));
        }
        Ok(Thread { system: self, id })
    }
}

impl Thread<'_> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn status(&mut self) -> Result<ThreadStatus, Error> {
        Ok(ThreadStatus(
            self.system.read_register(self.id, layout::THREAD_STATUS)?,
        ))
    }

    /// Resume execution. Returns as soon as the command is on the bus.
    pub fn start(&mut self) -> Result<(), Error> {
        debug!("starting thread {}", self.system.path(self.id));
        self.system
            .write_register(self.id, layout::THREAD_CTRL, layout::CTRL_START)
    }

    /// Stop execution and wait for the thread to quiesce.
    pub fn stop(&mut self) -> Result<(), Error> {
        debug!("stopping thread {}", self.system.path(self.id));
        self.system
            .write_register(self.id, layout::THREAD_CTRL, layout::CTRL_STOP)?;
        self.wait_quiesced()
    }

    /// Step exactly `count` instructions, synchronously.
    pub fn step(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.system
                .write_register(self.id, layout::THREAD_CTRL, layout::CTRL_SSTEP)?;
            self.wait_quiesced()?;
        }
        Ok(())
    }

    fn wait_quiesced(&mut self) -> Result<(), Error> {
        for _ in 0..QUIESCE_RETRIES {
            if self.status()?.quiesced() {
                return Ok(());
            }
        }
        Err(TransportError::Timeout.into())
    }

    pub fn read_gpr(&mut self, reg: usize) -> Result<u64, Error> {
        assert!(reg < 32, "GPR number {reg} out of range");
        self.system
            .read_register(self.id, layout::THREAD_GPR + 8 * reg as u64)
    }

    pub fn write_gpr(&mut self, reg: usize, value: u64) -> Result<(), Error> {
        assert!(reg < 32, "GPR number {reg} out of range");
        self.system
            .write_register(self.id, layout::THREAD_GPR + 8 * reg as u64, value)
    }

    pub fn read_nia(&mut self) -> Result<u64, Error> {
        self.system.read_register(self.id, layout::THREAD_NIA)
    }

    pub fn write_nia(&mut self, value: u64) -> Result<(), Error> {
        self.system
            .write_register(self.id, layout::THREAD_NIA, value)
    }

    pub fn read_spr(&mut self, spr: u64) -> Result<u64, Error> {
        self.system
            .read_register(self.id, layout::THREAD_SPR + 8 * spr)
    }

    pub fn write_spr(&mut self, spr: u64, value: u64) -> Result<(), Error> {
        self.system
            .write_register(self.id, layout::THREAD_SPR + 8 * spr, value)
    }

    /// Turn attention instructions into traps on this thread.
    pub fn enable_attn(&mut self) -> Result<(), Error> {
        let mode = self.system.read_register(self.id, layout::THREAD_MODE)?;
        self.system
            .write_register(self.id, layout::THREAD_MODE, mode | layout::MODE_ATTN)
    }

    /// Read through this thread's own view of memory (virtual addresses).
    pub fn read_mem(&mut self, addr: u64, data: &mut [u8]) -> Result<(), Error> {
        self.system.read_memory(self.id, addr, data)
    }

    /// Write through this thread's own view of memory.
    pub fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.system.write_memory(self.id, addr, data)
    }
}
