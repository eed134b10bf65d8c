//! Built-in system descriptions.
//!
//! A description declares the hardware topology one backend flavor drives:
//! which targets exist, their classes, indices and register windows. The
//! descriptions are YAML documents compiled into the binary; parsing a
//! flattened device tree blob is explicitly not this crate's business, only
//! the resulting tree shape is.

use serde::Deserialize;
use thiserror::Error;

use crate::backend::BackendKind;
use crate::devicetree::{cells_to_bytes, u64_to_cells, DeviceTree, NodeId};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no built-in system description named '{0}'")]
    UnknownSystem(String),
    #[error("no built-in system description drives the '{0}' backend")]
    UnknownBackend(BackendKind),
    #[error("malformed system description: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One topology, tied to the backend flavor that drives it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDescription {
    pub name: String,
    pub backend: BackendKind,
    /// Default device path or GPIO directory for the transport.
    #[serde(default)]
    pub device: Option<String>,
    /// Default bus slave address, where the transport uses one.
    #[serde(default)]
    pub slave_address: Option<u16>,
    pub nodes: Vec<NodeDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDescription {
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
    /// Base address and size of the target's register window.
    #[serde(default)]
    pub reg: Option<[u64; 2]>,
    #[serde(default)]
    pub compatible: Vec<String>,
    #[serde(default)]
    pub children: Vec<NodeDescription>,
}

impl SystemDescription {
    /// Materialize the description as a device tree.
    pub fn to_tree(&self) -> DeviceTree {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        tree.add_property(root, "#address-cells", cells_to_bytes(&[2]));
        tree.add_property(root, "#size-cells", cells_to_bytes(&[2]));
        for node in &self.nodes {
            add_node(&mut tree, root, node);
        }
        tree
    }
}

fn add_node(tree: &mut DeviceTree, parent: NodeId, desc: &NodeDescription) {
    let id = tree.add_node(parent, &desc.name);
    if let Some(class) = &desc.class {
        let mut data = class.as_bytes().to_vec();
        data.push(0);
        tree.add_property(id, "class", data);
    }
    if let Some(index) = desc.index {
        tree.add_property(id, "index", cells_to_bytes(&[index]));
    }
    if let Some([addr, size]) = desc.reg {
        let mut cells = u64_to_cells(addr).to_vec();
        cells.extend(u64_to_cells(size));
        tree.add_property(id, "reg", cells_to_bytes(&cells));
    }
    if !desc.compatible.is_empty() {
        let mut data = Vec::new();
        for entry in &desc.compatible {
            data.extend(entry.as_bytes());
            data.push(0);
        }
        tree.add_property(id, "compatible", data);
    }
    for child in &desc.children {
        add_node(tree, id, child);
    }
}

/// All the built-in system descriptions.
#[derive(Debug)]
pub struct Registry {
    systems: Vec<SystemDescription>,
}

impl Registry {
    pub fn from_builtin_systems() -> Result<Self, RegistryError> {
        let sources = [
            include_str!("../systems/fake.yaml"),
            include_str!("../systems/p9-kernel.yaml"),
            include_str!("../systems/p9-host.yaml"),
            include_str!("../systems/p8-i2c.yaml"),
            include_str!("../systems/p9w-fsi.yaml"),
        ];
        let systems = sources
            .iter()
            .map(|source| serde_yaml::from_str(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Registry { systems })
    }

    pub fn systems(&self) -> &[SystemDescription] {
        &self.systems
    }

    pub fn get(&self, name: &str) -> Result<&SystemDescription, RegistryError> {
        self.systems
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::UnknownSystem(name.to_string()))
    }

    /// The description driving `kind`.
    pub fn for_backend(&self, kind: BackendKind) -> Result<&SystemDescription, RegistryError> {
        self.systems
            .iter()
            .find(|s| s.backend == kind)
            .ok_or(RegistryError::UnknownBackend(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_descriptions_parse() {
        let registry = Registry::from_builtin_systems().unwrap();
        assert!(registry.get("fake").is_ok());
        assert!(registry.get("p9-kernel").is_ok());
        assert!(registry.get("nonesuch").is_err());
        for kind in [
            BackendKind::Fake,
            BackendKind::Kernel,
            BackendKind::Host,
            BackendKind::I2c,
            BackendKind::Bitbang,
        ] {
            assert!(registry.for_backend(kind).is_ok(), "{kind} has no system");
        }
    }

    #[test]
    fn fake_tree_has_the_expected_shape() {
        let registry = Registry::from_builtin_systems().unwrap();
        let tree = registry.get("fake").unwrap().to_tree();

        let pib0 = tree.find_by_path("/pib0").unwrap();
        assert_eq!(tree.get_str(pib0, "class").unwrap(), "pib");
        assert_eq!(tree.get_u32(pib0, "index").unwrap(), 0);

        let thread = tree.find_by_path("/pib0/core0/thread1").unwrap();
        let (addr, size) = tree.get_address(thread, 0);
        assert!(size > 0);
        assert_ne!(addr, 0);

        // The compatible list is a NUL-separated string list.
        assert!(tree.find_compatible(None, "ibm,fake-pib").is_some());
    }
}
