//! Physical memory access through the ADU.

use crate::devicetree::NodeId;
use crate::error::Error;
use crate::target::{System, TargetStatus};

/// A unit over one "adu" class target.
pub struct Adu<'a> {
    system: &'a mut System,
    id: NodeId,
}

impl System {
    /// Typed access to an ADU target.
    pub fn adu(&mut self, id: NodeId) -> Result<Adu<'_>, Error> {
        if self.target(id).class() != Some("adu") {
            return Err(Error::Configuration(format!(
                "{} is not an adu target",
                self.path(id)
            )));
        }
        Ok(Adu { system: self, id })
    }
}

impl Adu<'_> {
    /// The first ADU in tree order whose hardware probes as enabled, or
    /// `None`. Probe failures on one candidate do not stop the scan.
    pub fn first_enabled(system: &mut System) -> Option<NodeId> {
        let candidates: Vec<_> = system.by_class("adu").collect();
        candidates
            .into_iter()
            .find(|id| system.probe(*id).ok() == Some(TargetStatus::Enabled))
    }

    /// Read physical memory.
    pub fn read(&mut self, addr: u64, data: &mut [u8]) -> Result<(), Error> {
        self.system.read_memory(self.id, addr, data)
    }

    /// Write physical memory.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.system.write_memory(self.id, addr, data)
    }
}
