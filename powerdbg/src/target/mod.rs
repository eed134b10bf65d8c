//! Targets and their lifecycle.
//!
//! A [Target] is one addressable node of the hardware topology: a processor
//! ("pib"), a core, a thread, the memory access unit ("adu"), an FSI slave.
//! Targets are created 1:1 with device tree nodes when the [System] is
//! built and live until the system is dropped.
//!
//! The [System] is the owning context for everything: the tree, the
//! targets, and the backend instances. It is passed explicitly to every
//! operation; there is no ambient global state.

mod selection;

pub use selection::{SelectionState, MAX_CHIPS, MAX_PROCESSORS, MAX_THREADS};

use tracing::{debug, trace, warn};

use crate::backend::{Backend, BackendId, ProbeOutcome, TargetHandle};
use crate::config::SystemDescription;
use crate::devicetree::{DeviceTree, NodeId};
use crate::error::Error;

/// Lifecycle status of a target.
///
/// `Unprobed → {Enabled, Disabled} → PendingRelease → Released`, with
/// `Error` terminal on transport failure. `Enabled` is only ever reached
/// from `Unprobed`; `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Nothing is known about the hardware yet.
    Unprobed,
    /// The hardware responded and may be operated on.
    Enabled,
    /// The hardware is absent or not applicable; operations are refused.
    Disabled,
    /// A child has been released; this target still awaits its own release.
    PendingRelease,
    /// Resources have been given back. Terminal.
    Released,
    /// The transport failed while probing. Terminal.
    Error,
}

#[derive(Debug)]
pub struct Target {
    node: NodeId,
    class: Option<String>,
    index: Option<u32>,
    status: TargetStatus,
    selected: bool,
    backend: BackendId,
}

impl Target {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The class tag ("pib", "core", "thread", ...), `None` for purely
    /// structural nodes.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// Index within the class and parent scope, if the description gave
    /// one.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn status(&self) -> TargetStatus {
        self.status
    }

    pub fn selected(&self) -> bool {
        self.selected
    }
}

/// The owning context: device tree, targets and backends.
#[derive(Debug)]
pub struct System {
    tree: DeviceTree,
    targets: Vec<Target>,
    backends: Vec<Box<dyn Backend>>,
}

impl System {
    /// Build a system from a description: construct the tree, bind every
    /// target to the description's transport, instantiated with `device`
    /// and `slave_address` overriding the description's defaults.
    pub fn new(
        desc: &SystemDescription,
        device: Option<&str>,
        slave_address: Option<u16>,
    ) -> Result<System, Error> {
        let device = device.or(desc.device.as_deref());
        let backend = desc
            .backend
            .instantiate(device, slave_address.or(desc.slave_address));
        Self::with_backend(desc.to_tree(), backend)
    }

    /// Build a system over an already-constructed tree and transport.
    /// This is the seam tests use to substitute a scripted fake backend.
    pub fn with_backend(tree: DeviceTree, backend: Box<dyn Backend>) -> Result<System, Error> {
        // Targets share the tree's arena indexing: targets[id] wraps
        // nodes[id].
        let targets = (0..tree.len())
            .map(|i| {
                let id = NodeId(i);
                Target {
                    node: id,
                    class: tree.get_str(id, "class").ok().map(str::to_string),
                    index: tree.get_u32(id, "index").ok(),
                    status: TargetStatus::Unprobed,
                    selected: false,
                    backend: BackendId(0),
                }
            })
            .collect();

        Ok(System {
            tree,
            targets,
            backends: vec![backend],
        })
    }

    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    pub fn target(&self, id: NodeId) -> &Target {
        &self.targets[id.0]
    }

    pub fn path(&self, id: NodeId) -> String {
        self.tree.path(id)
    }

    /// All targets of a class, tree order.
    pub fn by_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.tree
            .iter()
            .filter(move |id| self.targets[id.0].class.as_deref() == Some(class))
    }

    /// Direct children of `parent` with the given class, in child order.
    pub fn children_of_class(&self, parent: NodeId, class: &str) -> Vec<NodeId> {
        self.tree
            .node(parent)
            .children()
            .iter()
            .copied()
            .filter(|c| self.targets[c.0].class.as_deref() == Some(class))
            .collect()
    }

    /// Nearest ancestor of `id` with the given class.
    pub fn parent_of_class(&self, id: NodeId, class: &str) -> Option<NodeId> {
        let mut cursor = self.tree.node(id).parent();
        while let Some(c) = cursor {
            if self.targets[c.0].class.as_deref() == Some(class) {
                return Some(c);
            }
            cursor = self.tree.node(c).parent();
        }
        None
    }

    pub fn set_selected(&mut self, id: NodeId, selected: bool) {
        self.targets[id.0].selected = selected;
    }

    /// Base bus address from the target's "reg" property, if it has one.
    pub fn base_address(&self, id: NodeId) -> Option<u64> {
        self.tree
            .property(id, "reg")
            .map(|_| self.tree.get_address(id, 0).0)
    }

    fn handle(&self, id: NodeId) -> TargetHandle {
        let (address, size) = match self.base_address(id) {
            Some(_) => {
                let (a, s) = self.tree.get_address(id, 0);
                (Some(a), Some(s))
            }
            None => (None, None),
        };
        TargetHandle {
            path: self.tree.path(id),
            class: self.targets[id.0].class.clone(),
            index: self.targets[id.0].index,
            address,
            size,
        }
    }

    /// Determine whether the target's hardware is present.
    ///
    /// Probes the parent chain first: a parent bus gates access to its
    /// children, so a child under a non-enabled parent is disabled without
    /// touching the transport. Probing an already-resolved target is a
    /// no-op.
    pub fn probe(&mut self, id: NodeId) -> Result<TargetStatus, Error> {
        match self.targets[id.0].status {
            TargetStatus::Unprobed => {}
            status => return Ok(status),
        }

        if let Some(parent) = self.tree.node(id).parent() {
            if self.probe(parent)? != TargetStatus::Enabled {
                self.targets[id.0].status = TargetStatus::Disabled;
                return Ok(TargetStatus::Disabled);
            }
        }

        // Structural nodes (no class) have no hardware of their own.
        if self.targets[id.0].class.is_none() {
            self.targets[id.0].status = TargetStatus::Enabled;
            return Ok(TargetStatus::Enabled);
        }

        let handle = self.handle(id);
        let backend = self.targets[id.0].backend;
        let status = match self.backends[backend.0].probe(&handle) {
            Ok(ProbeOutcome::Present) => TargetStatus::Enabled,
            Ok(ProbeOutcome::Absent) => TargetStatus::Disabled,
            Err(e) => {
                self.targets[id.0].status = TargetStatus::Error;
                return Err(e.into());
            }
        };
        debug!("probed {}: {:?}", handle.path, status);
        self.targets[id.0].status = status;
        Ok(status)
    }

    /// Release a target and everything below it.
    ///
    /// Children are released first; the parent bus must stay usable until
    /// they are torn down. A failing child release is logged and does not
    /// stop its siblings or the parent. Releasing an unprobed, disabled or
    /// already-released target is a no-op.
    pub fn release(&mut self, id: NodeId) -> Result<(), Error> {
        match self.targets[id.0].status {
            TargetStatus::Enabled | TargetStatus::PendingRelease => {}
            _ => return Ok(()),
        }

        for child in self.tree.node(id).children().to_vec() {
            if let Err(e) = self.release(child) {
                warn!("failed to release {}: {e}", self.path(child));
            }
        }

        if self.targets[id.0].class.is_some() {
            let handle = self.handle(id);
            let backend = self.targets[id.0].backend;
            if let Err(e) = self.backends[backend.0].release(&handle) {
                self.targets[id.0].status = TargetStatus::Error;
                return Err(e.into());
            }
            debug!("released {}", handle.path);
        }
        self.targets[id.0].status = TargetStatus::Released;

        // The parent now has a released child and must be torn down too
        // before the process exits.
        if let Some(parent) = self.tree.node(id).parent() {
            if self.targets[parent.0].status == TargetStatus::Enabled {
                self.targets[parent.0].status = TargetStatus::PendingRelease;
            }
        }
        Ok(())
    }

    /// Release every target, best effort. Idempotent; runs unconditionally
    /// when the system is dropped so wake-locks and bus arbitration are
    /// not leaked on error paths.
    pub fn release_all(&mut self) {
        trace!("releasing all targets");
        for child in self.tree.node(self.tree.root()).children().to_vec() {
            if let Err(e) = self.release(child) {
                warn!("failed to release {}: {e}", self.path(child));
            }
        }
    }

    fn ensure_enabled(&self, id: NodeId) -> Result<(), Error> {
        if self.targets[id.0].status != TargetStatus::Enabled {
            return Err(Error::TargetNotReady(self.path(id)));
        }
        Ok(())
    }

    /// Read a register at `offset` from the target's base address.
    pub fn read_register(&mut self, id: NodeId, offset: u64) -> Result<u64, Error> {
        self.ensure_enabled(id)?;
        let addr = self.base_address(id).unwrap_or(0) + offset;
        let backend = self.targets[id.0].backend;
        let value = self.backends[backend.0].read_register(addr)?;
        trace!("{}: reg {addr:#x} = {value:#018x}", self.path(id));
        Ok(value)
    }

    /// Write a register at `offset` from the target's base address.
    pub fn write_register(&mut self, id: NodeId, offset: u64, value: u64) -> Result<(), Error> {
        self.ensure_enabled(id)?;
        let addr = self.base_address(id).unwrap_or(0) + offset;
        trace!("{}: reg {addr:#x} <= {value:#018x}", self.path(id));
        let backend = self.targets[id.0].backend;
        Ok(self.backends[backend.0].write_register(addr, value)?)
    }

    /// Read memory through this target's view (absolute addresses).
    pub fn read_memory(&mut self, id: NodeId, addr: u64, data: &mut [u8]) -> Result<(), Error> {
        self.ensure_enabled(id)?;
        let backend = self.targets[id.0].backend;
        Ok(self.backends[backend.0].read_memory(addr, data)?)
    }

    /// Write memory through this target's view (absolute addresses).
    pub fn write_memory(&mut self, id: NodeId, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.ensure_enabled(id)?;
        let backend = self.targets[id.0].backend;
        Ok(self.backends[backend.0].write_memory(addr, data)?)
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.release_all();
    }
}
