//! Role catalog - static per-role settings supplied by configuration
//!
//! Holds role dependencies, default parameters and timeouts. The catalog is
//! what turns a bare role resolution into a [`DesiredState`].

use crate::error::{Error, Result};
use crate::types::{DesiredState, Params};
use inventory::{Inventory, Resolution};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default per-action timeout when neither the role nor the catalog sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for one role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSpec {
    /// Roles that must be up before this one
    pub depends_on: Vec<String>,
    /// Parameters the role runs with
    pub params: Params,
    /// Per-action timeout override
    pub timeout: Option<Duration>,
}

/// All role settings for a topology
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: BTreeMap<String, RoleSpec>,
    default_timeout: Duration,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl RoleCatalog {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            roles: BTreeMap::new(),
            default_timeout,
        }
    }

    /// Add or replace a role definition
    pub fn insert(&mut self, role: &str, spec: RoleSpec) {
        self.roles.insert(role.to_string(), spec);
    }

    pub fn with_role(mut self, role: &str, spec: RoleSpec) -> Self {
        self.insert(role, spec);
        self
    }

    pub fn spec(&self, role: &str) -> Option<&RoleSpec> {
        self.roles.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = (&String, &RoleSpec)> {
        self.roles.iter()
    }

    /// Declared dependencies of `role` (empty when the role has no entry)
    pub fn dependencies(&self, role: &str) -> &[String] {
        self.roles
            .get(role)
            .map(|spec| spec.depends_on.as_slice())
            .unwrap_or(&[])
    }

    pub fn params_for(&self, role: &str) -> Params {
        self.roles
            .get(role)
            .map(|spec| spec.params.clone())
            .unwrap_or_default()
    }

    pub fn timeout_for(&self, role: &str) -> Duration {
        self.roles
            .get(role)
            .and_then(|spec| spec.timeout)
            .unwrap_or(self.default_timeout)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Reject cycles among role dependencies
    pub fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            role: &'a str,
            catalog: &'a RoleCatalog,
            marks: &mut BTreeMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<()> {
            match marks.get(role) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|r| *r == role).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|r| r.to_string()).collect();
                    cycle.push(role.to_string());
                    return Err(Error::Cycle { cycle });
                }
                None => {}
            }

            marks.insert(role, Mark::Visiting);
            path.push(role);
            for dependency in catalog.dependencies(role) {
                visit(dependency, catalog, marks, path)?;
            }
            path.pop();
            marks.insert(role, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        for role in self.roles.keys() {
            visit(role, self, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Check that every dependency of a desired role is provided somewhere
    ///
    /// `known_roles` is every role name the topology declares; a dependency
    /// outside it is reported differently from one that is declared but
    /// assigned to no node.
    pub fn check_satisfiable(&self, desired: &DesiredState, known_roles: &BTreeSet<&str>) -> Result<()> {
        let held: BTreeSet<&str> = desired
            .iter()
            .flat_map(|(_, roles)| roles.keys().map(String::as_str))
            .collect();

        for role in &held {
            for dependency in self.dependencies(role) {
                if held.contains(dependency.as_str()) {
                    continue;
                }
                let reason = if known_roles.contains(dependency.as_str()) {
                    "is not assigned to any node"
                } else {
                    "is not declared in the topology"
                };
                return Err(Error::Unsatisfiable {
                    role: (*role).to_string(),
                    dependency: dependency.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Turn a role resolution into desired state with parameters attached
    pub fn desired_state(&self, resolution: &Resolution) -> DesiredState {
        let mut desired = DesiredState::new();
        for (node, roles) in resolution.iter() {
            desired.insert_node(node);
            for role in roles {
                desired.insert(node, role, self.params_for(role));
            }
        }
        desired
    }

    /// Catalog roles that the inventory never mentions
    pub fn unknown_roles<'a>(&'a self, inventory: &Inventory) -> Vec<&'a str> {
        let known = inventory.group_names();
        self.roles
            .keys()
            .map(String::as_str)
            .filter(|role| !known.contains(role))
            .collect()
    }
}
