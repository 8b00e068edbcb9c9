//! Role resolution - flatten group hierarchies into per-node role sets
//!
//! A node holds every group it is a direct member of, plus every group that
//! lists one of those groups as a child, transitively.

use crate::error::{Error, Result};
use crate::{GroupSpec, Inventory};
use std::collections::{BTreeMap, BTreeSet};

/// Per-node role sets after group expansion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    by_node: BTreeMap<String, BTreeSet<String>>,
}

impl Resolution {
    /// Roles held by `node`, if the node is known
    pub fn roles_of(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.by_node.get(node)
    }

    /// Nodes holding `role`, in name order
    pub fn nodes_with(&self, role: &str) -> Vec<&str> {
        self.by_node
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(node, _)| node.as_str())
            .collect()
    }

    /// Every role held by at least one node
    pub fn roles(&self) -> BTreeSet<&str> {
        self.by_node
            .values()
            .flat_map(|roles| roles.iter().map(String::as_str))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.by_node.iter()
    }
}

/// Map each group to the groups that list it as a child
fn parent_edges(inventory: &Inventory) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, group) in inventory.groups() {
        if let GroupSpec::Children(children) = group {
            for child in children {
                parents
                    .entry(child.as_str())
                    .or_default()
                    .insert(name.as_str());
            }
        }
    }
    parents
}

/// Fail with a cycle error if group-of-groups relationships loop
pub fn check_acyclic(inventory: &Inventory) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        group: &'a str,
        inventory: &'a Inventory,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(group) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|g| *g == group).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|g| g.to_string()).collect();
                cycle.push(group.to_string());
                return Err(Error::Cycle { cycle });
            }
            None => {}
        }

        marks.insert(group, Mark::Visiting);
        path.push(group);
        if let Some(GroupSpec::Children(children)) = inventory.group(group) {
            for child in children {
                visit(child, inventory, marks, path)?;
            }
        }
        path.pop();
        marks.insert(group, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut path = Vec::new();
    for name in inventory.groups().keys() {
        visit(name, inventory, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Resolve every node's full role set
///
/// Breadth-first expansion from each node's direct groups along
/// child → parent edges. Expansion is bounded by the number of known groups;
/// running past that bound means the hierarchy loops.
pub fn resolve(inventory: &Inventory) -> Result<Resolution> {
    check_acyclic(inventory)?;

    let parents = parent_edges(inventory);
    let limit = inventory.group_names().len();
    let mut by_node = BTreeMap::new();

    for node in inventory.nodes() {
        let mut roles: BTreeSet<String> = node.groups.clone();
        let mut frontier: Vec<&str> = node.groups.iter().map(String::as_str).collect();
        let mut rounds = 0;

        while !frontier.is_empty() {
            rounds += 1;
            if rounds > limit {
                return Err(Error::Cycle {
                    cycle: frontier.iter().map(|g| g.to_string()).collect(),
                });
            }

            let mut next = Vec::new();
            for group in frontier {
                for parent in parents.get(group).into_iter().flatten() {
                    if roles.insert((*parent).to_string()) {
                        next.push(*parent);
                    }
                }
            }
            frontier = next;
        }

        log::trace!("Resolved {} -> {:?}", node.name, roles);
        by_node.insert(node.name.clone(), roles);
    }

    Ok(Resolution { by_node })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCategory, GroupEntry, InventorySpec, NodeSpec};

    fn node(address: &str) -> NodeSpec {
        NodeSpec {
            address: address.to_string(),
            memory_mb: 1024,
            cpus: None,
            groups: Vec::new(),
        }
    }

    fn list(items: &[&str]) -> GroupEntry {
        GroupEntry::List(items.iter().map(|s| s.to_string()).collect())
    }

    fn roles(resolution: &Resolution, node: &str) -> Vec<String> {
        resolution
            .roles_of(node)
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    #[test]
    fn test_children_suffix_scenario() {
        let mut spec = InventorySpec::default();
        spec.nodes.insert("node1".into(), node("10.0.0.1"));
        spec.groups.insert("A".into(), list(&["node1"]));
        spec.groups.insert("B:children".into(), list(&["A"]));

        let inventory = Inventory::from_spec(&spec).unwrap();
        let resolution = resolve(&inventory).unwrap();

        assert_eq!(roles(&resolution, "node1"), vec!["A", "B"]);
    }

    #[test]
    fn test_diamond_collapses_duplicates() {
        let mut spec = InventorySpec::default();
        spec.nodes.insert("n1".into(), node("10.0.0.1"));
        spec.groups.insert("leaf".into(), list(&["n1"]));
        spec.groups.insert("left:children".into(), list(&["leaf"]));
        spec.groups.insert("right:children".into(), list(&["leaf"]));
        spec.groups
            .insert("top:children".into(), list(&["left", "right"]));

        let inventory = Inventory::from_spec(&spec).unwrap();
        let resolution = resolve(&inventory).unwrap();

        assert_eq!(
            roles(&resolution, "n1"),
            vec!["leaf", "left", "right", "top"]
        );
    }

    #[test]
    fn test_node_declared_groups_expand() {
        let mut spec = InventorySpec::default();
        let mut worker = node("10.0.0.2");
        worker.groups = vec!["mesos-agents".into()];
        spec.nodes.insert("agent1".into(), worker);
        spec.nodes.insert("idle".into(), node("10.0.0.3"));
        spec.groups.insert(
            "cluster".into(),
            GroupEntry::Table {
                members: None,
                children: Some(vec!["mesos-agents".into()]),
            },
        );

        let inventory = Inventory::from_spec(&spec).unwrap();
        let resolution = resolve(&inventory).unwrap();

        assert_eq!(roles(&resolution, "agent1"), vec!["cluster", "mesos-agents"]);
        assert!(resolution.roles_of("idle").unwrap().is_empty());
        assert_eq!(resolution.nodes_with("cluster"), vec!["agent1"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut spec = InventorySpec::default();
        spec.nodes.insert("n1".into(), node("10.0.0.1"));
        spec.groups.insert("base".into(), list(&["n1"]));
        spec.groups.insert("a:children".into(), list(&["b", "base"]));
        spec.groups.insert("b:children".into(), list(&["a"]));

        let inventory = Inventory::from_spec(&spec).unwrap();
        let err = resolve(&inventory).unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Cycle);
        match err {
            Error::Cycle { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle_is_rejected() {
        let mut spec = InventorySpec::default();
        spec.groups.insert("loop:children".into(), list(&["loop"]));

        let inventory = Inventory::from_spec(&spec).unwrap();
        assert!(matches!(check_acyclic(&inventory), Err(Error::Cycle { .. })));
    }

    #[test]
    fn test_resolution_equals_transitive_closure() {
        // Layered hierarchy: g0 holds the node, gN lists g(N-1) and g(N-2)
        let depth = 12;
        let mut spec = InventorySpec::default();
        spec.nodes.insert("n".into(), node("10.1.1.1"));
        spec.groups.insert("g0".into(), list(&["n"]));
        for i in 1..depth {
            let mut children = vec![format!("g{}", i - 1)];
            if i >= 2 {
                children.push(format!("g{}", i - 2));
            }
            spec.groups.insert(
                format!("g{i}:children"),
                GroupEntry::List(children),
            );
        }

        let inventory = Inventory::from_spec(&spec).unwrap();
        let resolution = resolve(&inventory).unwrap();

        let expected: BTreeSet<String> = (0..depth).map(|i| format!("g{i}")).collect();
        assert_eq!(resolution.roles_of("n").unwrap(), &expected);
    }
}
