//! Diff computation between desired and current role state

use crate::types::{ActionKind, DesiredState, Params, RoleStatus, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A difference between current and desired state of one role on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDiff {
    pub node: String,
    pub role: String,
    /// Current status, `None` when the role is unknown on the node
    pub current: Option<RoleStatus>,
    /// Desired parameters, `None` when the role should not run
    pub desired: Option<Params>,
}

impl RoleDiff {
    /// Build a diff, returning None when no change is needed
    pub fn new(
        node: &str,
        role: &str,
        current: Option<&RoleStatus>,
        desired: Option<&Params>,
    ) -> Option<Self> {
        let diff = Self {
            node: node.to_string(),
            role: role.to_string(),
            current: current.cloned(),
            desired: desired.cloned(),
        };
        diff.action_kind().map(|_| diff)
    }

    /// The action that closes this gap, if any
    pub fn action_kind(&self) -> Option<ActionKind> {
        match (&self.current, &self.desired) {
            (None | Some(RoleStatus::Stopped), Some(_)) => Some(ActionKind::Start),
            (Some(RoleStatus::Failed { .. }), Some(_)) => Some(ActionKind::Restart),
            (Some(RoleStatus::Running { params }), Some(desired)) if params != desired => {
                Some(ActionKind::Reconfigure)
            }
            (Some(RoleStatus::Running { .. }), Some(_)) => None,
            (Some(RoleStatus::Running { .. } | RoleStatus::Failed { .. }), None) => {
                Some(ActionKind::Stop)
            }
            (None | Some(RoleStatus::Stopped), None) => None,
        }
    }
}

/// Compute diffs for the given nodes
///
/// Only nodes listed in `nodes` are considered; roles the snapshot records
/// for other nodes are ignored.
pub fn compute_diffs<'a>(
    nodes: impl IntoIterator<Item = &'a str>,
    desired: &DesiredState,
    snapshot: &Snapshot,
) -> Vec<RoleDiff> {
    let empty_desired = BTreeMap::new();
    let empty_current = BTreeMap::new();
    let mut diffs = Vec::new();

    for node in nodes {
        let wanted = desired.roles_of(node).unwrap_or(&empty_desired);
        let current = snapshot.nodes.get(node).unwrap_or(&empty_current);

        let roles: BTreeSet<&String> = wanted.keys().chain(current.keys()).collect();
        for role in roles {
            if let Some(diff) = RoleDiff::new(node, role, current.get(role), wanted.get(role)) {
                diffs.push(diff);
            }
        }
    }

    diffs
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub starts: usize,
    pub stops: usize,
    pub restarts: usize,
    pub reconfigures: usize,
}

impl DiffSummary {
    pub fn from_diffs(diffs: &[RoleDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.action_kind() {
                Some(ActionKind::Start) => summary.starts += 1,
                Some(ActionKind::Stop) => summary.stops += 1,
                Some(ActionKind::Restart) => summary.restarts += 1,
                Some(ActionKind::Reconfigure) => summary.reconfigures += 1,
                None => {}
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.starts + self.stops + self.restarts + self.reconfigures
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by node
pub fn group_by_node(diffs: &[RoleDiff]) -> BTreeMap<&str, Vec<&RoleDiff>> {
    let mut groups: BTreeMap<&str, Vec<&RoleDiff>> = BTreeMap::new();
    for diff in diffs {
        groups.entry(diff.node.as_str()).or_default().push(diff);
    }
    groups
}
