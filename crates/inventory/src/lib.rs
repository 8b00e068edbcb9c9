//! # Inventory
//!
//! Declarative cluster inventory.
//!
//! This crate provides:
//! - Validated nodes (address, resource allocation, direct group memberships)
//! - Groups as a tagged [`GroupSpec`]: either literal members or child groups
//! - Role resolution: flattening group hierarchies into per-node role sets
//!
//! ## Example
//!
//! ```
//! use inventory::{Inventory, InventorySpec};
//!
//! let spec: InventorySpec = serde_json::from_str(r#"{
//!     "nodes": { "node1": { "address": "10.0.0.1", "memory_mb": 2048 } },
//!     "groups": { "A": ["node1"], "B:children": ["A"] }
//! }"#).unwrap();
//!
//! let cluster = Inventory::from_spec(&spec)?;
//! let resolution = inventory::roles::resolve(&cluster)?;
//! let roles: Vec<_> = resolution.roles_of("node1").unwrap().iter().cloned().collect();
//! assert_eq!(roles, vec!["A".to_string(), "B".to_string()]);
//! # Ok::<(), inventory::Error>(())
//! ```

mod error;
pub mod roles;
mod types;

pub use error::{Error, ErrorCategory, Result};
pub use roles::Resolution;
pub use types::{
    Address, CHILDREN_SUFFIX, GroupEntry, GroupSpec, Host, InventorySpec, Node, NodeSpec,
    Resources,
};

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A validated, read-only cluster inventory
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    nodes: BTreeMap<String, Node>,
    groups: BTreeMap<String, GroupSpec>,
}

impl Inventory {
    /// Build an inventory from its declarative input
    ///
    /// Fails when a node name or address is malformed, an address is used
    /// twice, or a group refers to something that does not exist.
    pub fn from_spec(spec: &InventorySpec) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        let mut seen_addresses: HashMap<String, String> = HashMap::new();

        for (name, node_spec) in &spec.nodes {
            let node = build_node(name, node_spec)?;

            let key = node.address.normalized();
            if let Some(first) = seen_addresses.get(&key) {
                return Err(Error::DuplicateAddress {
                    address: key,
                    first: first.clone(),
                    second: name.clone(),
                });
            }
            seen_addresses.insert(key, name.clone());
            nodes.insert(name.clone(), node);
        }

        let mut groups: BTreeMap<String, GroupSpec> = BTreeMap::new();
        for (key, entry) in &spec.groups {
            let (name, group) = build_group(key, entry)?;
            if groups.contains_key(&name) {
                return Err(Error::invalid_group(&name, "declared more than once"));
            }
            groups.insert(name, group);
        }

        // Literal members become direct memberships on the node
        for (group_name, group) in &groups {
            if let GroupSpec::Members(members) = group {
                for member in members {
                    let node = nodes.get_mut(member).ok_or_else(|| {
                        Error::invalid_group(group_name, format!("unknown node '{member}'"))
                    })?;
                    node.groups.insert(group_name.clone());
                }
            }
        }

        let inventory = Self { nodes, groups };

        for node in inventory.nodes.values() {
            for group in &node.groups {
                if inventory.groups.get(group).is_some_and(GroupSpec::is_children) {
                    return Err(Error::invalid_node(
                        &node.name,
                        format!("'{group}' is a group of groups and cannot hold nodes"),
                    ));
                }
            }
        }

        let known = inventory.group_names();
        for (group_name, group) in &inventory.groups {
            if let GroupSpec::Children(children) = group
                && let Some(missing) = children.iter().find(|c| !known.contains(c.as_str()))
            {
                return Err(Error::invalid_group(
                    group_name,
                    format!("unknown child group '{missing}'"),
                ));
            }
        }

        log::debug!(
            "Loaded inventory: {} nodes, {} declared groups",
            inventory.nodes.len(),
            inventory.groups.len()
        );

        Ok(inventory)
    }

    /// Iterate over nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Declared groups (those listed in the groups table)
    pub fn groups(&self) -> &BTreeMap<String, GroupSpec> {
        &self.groups
    }

    /// Look up a declared group
    pub fn group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.get(name)
    }

    /// Every group name known to the inventory: declared groups plus
    /// groups only mentioned in a node's own `groups` list
    pub fn group_names(&self) -> BTreeSet<&str> {
        self.groups
            .keys()
            .map(String::as_str)
            .chain(
                self.nodes
                    .values()
                    .flat_map(|n| n.groups.iter().map(String::as_str)),
            )
            .collect()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn build_node(name: &str, spec: &NodeSpec) -> Result<Node> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::invalid_node(
            name,
            "name must be non-empty and contain no whitespace",
        ));
    }
    if spec.memory_mb == 0 {
        return Err(Error::invalid_node(name, "memory_mb must be greater than zero"));
    }
    if spec.cpus == Some(0) {
        return Err(Error::invalid_node(name, "cpus must be greater than zero"));
    }

    let address = spec
        .address
        .parse::<Address>()
        .map_err(|reason| Error::InvalidAddress {
            node: name.to_string(),
            address: spec.address.clone(),
            reason,
        })?;

    let mut groups = BTreeSet::new();
    for group in &spec.groups {
        if group.trim().is_empty() {
            return Err(Error::invalid_node(name, "group names must be non-empty"));
        }
        groups.insert(group.clone());
    }

    Ok(Node {
        name: name.to_string(),
        address,
        resources: Resources {
            memory_mb: spec.memory_mb,
            cpus: spec.cpus,
        },
        groups,
    })
}

fn build_group(key: &str, entry: &GroupEntry) -> Result<(String, GroupSpec)> {
    let (name, children_key) = match key.strip_suffix(CHILDREN_SUFFIX) {
        Some(name) => (name, true),
        None => (key, false),
    };
    if name.trim().is_empty() {
        return Err(Error::invalid_group(key, "group name is empty"));
    }

    fn to_set(items: &[String]) -> BTreeSet<String> {
        items.iter().cloned().collect()
    }

    let spec = match entry {
        GroupEntry::List(items) if children_key => GroupSpec::Children(to_set(items)),
        GroupEntry::List(items) => GroupSpec::Members(to_set(items)),
        GroupEntry::Table {
            members: Some(_),
            children: Some(_),
        } => {
            return Err(Error::invalid_group(
                name,
                "declares both members and children",
            ));
        }
        GroupEntry::Table {
            members: Some(_), ..
        } if children_key => {
            return Err(Error::invalid_group(
                name,
                "a ':children' group cannot list members",
            ));
        }
        GroupEntry::Table {
            members: Some(members),
            ..
        } => GroupSpec::Members(to_set(members)),
        GroupEntry::Table {
            children: Some(children),
            ..
        } => GroupSpec::Children(to_set(children)),
        GroupEntry::Table { .. } => {
            return Err(Error::invalid_group(name, "must declare members or children"));
        }
    };

    Ok((name.to_string(), spec))
}
