//! A backend that reads and writes an in-memory image instead of hardware.
//!
//! Everything above the transport seam (target lifecycle, selection, thread
//! units, the GDB server) is tested against this backend. State lives behind
//! a shared handle so tests can inspect and script it while the backend
//! itself is owned by a [crate::System].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, ProbeOutcome, TargetHandle, TransportError};
use crate::chip::layout;

#[derive(Debug, Default)]
struct FakeState {
    registers: HashMap<u64, u64>,
    memory: BTreeMap<u64, u8>,
    absent: HashSet<String>,
    broken: HashSet<String>,
    probe_log: Vec<String>,
    release_log: Vec<String>,
    /// Base addresses of register blocks that emulate a hardware thread.
    threads: HashSet<u64>,
}

impl FakeState {
    fn thread_ctrl_written(&mut self, base: u64, value: u64) {
        let status_addr = base + layout::THREAD_STATUS;
        let mut status = self.registers.get(&status_addr).copied().unwrap_or(0);
        if value & layout::CTRL_START != 0 {
            status = layout::STAT_ACTIVE;
        }
        if value & (layout::CTRL_STOP | layout::CTRL_SSTEP) != 0 {
            status = layout::STAT_ACTIVE | layout::STAT_QUIESCED;
        }
        self.registers.insert(status_addr, status);
    }
}

#[derive(Debug)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// A shared handle onto this backend's state, for scripting and
    /// inspection from tests.
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn probe(&mut self, target: &TargetHandle) -> Result<ProbeOutcome, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.probe_log.push(target.path.clone());
        if state.broken.contains(&target.path) {
            return Err(TransportError::Timeout);
        }
        if state.absent.contains(&target.path) {
            return Ok(ProbeOutcome::Absent);
        }
        if target.class.as_deref() == Some("thread") {
            if let Some(base) = target.address {
                state.threads.insert(base);
                let status_addr = base + layout::THREAD_STATUS;
                state
                    .registers
                    .entry(status_addr)
                    .or_insert(layout::STAT_ACTIVE | layout::STAT_QUIESCED);
            }
        }
        Ok(ProbeOutcome::Present)
    }

    fn release(&mut self, target: &TargetHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.release_log.push(target.path.clone());
        Ok(())
    }

    fn read_register(&mut self, addr: u64) -> Result<u64, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(state.registers.get(&addr).copied().unwrap_or(0))
    }

    fn write_register(&mut self, addr: u64, value: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.registers.insert(addr, value);
        if let Some(base) = addr.checked_sub(layout::THREAD_CTRL) {
            if state.threads.contains(&base) {
                state.thread_ctrl_written(base, value);
            }
        }
        Ok(())
    }

    fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<(), TransportError> {
        let state = self.state.lock().unwrap();
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = state.memory.get(&(addr + i as u64)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            state.memory.insert(addr + i as u64, *byte);
        }
        Ok(())
    }
}

/// Shared view onto a [FakeBackend]'s state.
#[derive(Debug, Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    pub fn set_register(&self, addr: u64, value: u64) {
        self.state.lock().unwrap().registers.insert(addr, value);
    }

    pub fn register(&self, addr: u64) -> u64 {
        self.state
            .lock()
            .unwrap()
            .registers
            .get(&addr)
            .copied()
            .unwrap_or(0)
    }

    pub fn load_memory(&self, addr: u64, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            state.memory.insert(addr + i as u64, *byte);
        }
    }

    pub fn memory(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (0..len)
            .map(|i| state.memory.get(&(addr + i as u64)).copied().unwrap_or(0))
            .collect()
    }

    /// Script the target at `path` as physically absent.
    pub fn mark_absent(&self, path: &str) {
        self.state.lock().unwrap().absent.insert(path.to_string());
    }

    /// Script the target at `path` to fail its probe with a transport error.
    pub fn mark_broken(&self, path: &str) {
        self.state.lock().unwrap().broken.insert(path.to_string());
    }

    /// Paths in the order their release reached the backend.
    pub fn release_log(&self) -> Vec<String> {
        self.state.lock().unwrap().release_log.clone()
    }

    /// How many times `path` has been probed at the transport level.
    pub fn probe_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .probe_log
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    /// Mark the emulated thread at `base` as quiesced, as a hardware trap
    /// would.
    pub fn quiesce_thread(&self, base: u64) {
        let mut state = self.state.lock().unwrap();
        let status_addr = base + layout::THREAD_STATUS;
        let status = state.registers.get(&status_addr).copied().unwrap_or(0);
        state
            .registers
            .insert(status_addr, status | layout::STAT_QUIESCED);
    }

    /// Mark the emulated thread at `base` as halted dead (not active).
    pub fn deactivate_thread(&self, base: u64) {
        let status_addr = base + layout::THREAD_STATUS;
        self.set_register(status_addr, layout::STAT_QUIESCED);
    }
}
