//! Core types for convergence: state, actions, outcomes

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Parameters a role runs with on a node
pub type Params = BTreeMap<String, String>;

// ============================================================================
// State
// ============================================================================

/// Observed status of one role on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoleStatus {
    /// Role is up with the given parameters
    Running {
        #[serde(default)]
        params: Params,
    },
    /// Role is installed but not running
    Stopped,
    /// Last change to this role failed
    Failed { error: String },
}

impl RoleStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Desired roles (with parameters) per node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    nodes: BTreeMap<String, BTreeMap<String, Params>>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `node` should run `role` with `params`
    pub fn insert(&mut self, node: &str, role: &str, params: Params) {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .insert(role.to_string(), params);
    }

    /// Ensure a node is present even if it holds no roles
    pub fn insert_node(&mut self, node: &str) {
        self.nodes.entry(node.to_string()).or_default();
    }

    pub fn roles_of(&self, node: &str) -> Option<&BTreeMap<String, Params>> {
        self.nodes.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Params>)> {
        self.nodes.iter()
    }
}

/// Snapshot of current per-node role status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: BTreeMap<String, BTreeMap<String, RoleStatus>>,

    /// When the snapshot was last updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot in which every desired role is already running as desired
    pub fn from_desired(desired: &DesiredState) -> Self {
        let nodes = desired
            .iter()
            .map(|(node, roles)| {
                let roles = roles
                    .iter()
                    .map(|(role, params)| {
                        (
                            role.clone(),
                            RoleStatus::Running {
                                params: params.clone(),
                            },
                        )
                    })
                    .collect();
                (node.clone(), roles)
            })
            .collect();
        Self {
            nodes,
            updated_at: None,
        }
    }

    pub fn status(&self, node: &str, role: &str) -> Option<&RoleStatus> {
        self.nodes.get(node).and_then(|roles| roles.get(role))
    }

    pub fn set(&mut self, node: &str, role: &str, status: RoleStatus) {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .insert(role.to_string(), status);
    }

    /// Forget a role; drops the node entry when it becomes empty
    pub fn remove(&mut self, node: &str, role: &str) {
        if let Some(roles) = self.nodes.get_mut(node) {
            roles.remove(role);
            if roles.is_empty() {
                self.nodes.remove(node);
            }
        }
    }

    /// Update the snapshot with the outcome of an executed action
    ///
    /// Skipped actions leave the snapshot untouched.
    pub fn record(&mut self, action: &Action, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Succeeded => match action.kind {
                ActionKind::Stop => self.remove(&action.node, &action.role),
                ActionKind::Start | ActionKind::Restart | ActionKind::Reconfigure => self.set(
                    &action.node,
                    &action.role,
                    RoleStatus::Running {
                        params: action.params.clone(),
                    },
                ),
            },
            ActionOutcome::Failed { error, .. } => self.set(
                &action.node,
                &action.role,
                RoleStatus::Failed {
                    error: error.clone(),
                },
            ),
            ActionOutcome::Skipped { .. } => {}
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// The kind of change an action makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Role not running; start it
    Start,
    /// Role running but no longer desired; stop it
    Stop,
    /// Role failed; stop then start it
    Restart,
    /// Role running with stale parameters; reconfigure it
    Reconfigure,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reconfigure => "reconfigure",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state change for one role on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Stable identifier, e.g. `start:zookeeper@master`
    pub id: String,
    pub node: String,
    /// Address of the node, as rendered from the inventory
    pub address: String,
    pub role: String,
    pub kind: ActionKind,
    /// Parameters the role should end up with
    pub params: Params,
    /// Ids of actions that must succeed before this one starts
    pub depends_on: Vec<String>,
    /// Maximum time the backend may take
    pub timeout: Duration,
}

impl Action {
    /// Build the canonical action id
    pub fn make_id(kind: ActionKind, role: &str, node: &str) -> String {
        format!("{kind}:{role}@{node}")
    }

    pub fn description(&self) -> String {
        format!("{} {} on {} ({})", self.kind, self.role, self.node, self.address)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Final outcome of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed { kind: ErrorKind, error: String },
    Skipped { reason: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Per-action record of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action_id: String,
    pub node: String,
    pub address: String,
    pub role: String,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ActionReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Result of executing a plan, in plan order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    /// A run succeeds when no action failed
    pub fn is_success(&self) -> bool {
        !self.actions.iter().any(|a| a.outcome.is_failure())
    }

    pub fn get(&self, action_id: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(|a| a.outcome.is_failure())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in &self.actions {
            summary.add_outcome(&report.outcome);
        }
        summary
    }
}

/// Counts of action outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add an outcome to the summary (timeouts count as failures too)
    pub fn add_outcome(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Succeeded => self.succeeded += 1,
            ActionOutcome::Failed { kind, .. } => {
                self.failed += 1;
                if *kind == ErrorKind::ExecutionTimeout {
                    self.timed_out += 1;
                }
            }
            ActionOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't call the backend, report every action as skipped
    pub dry_run: bool,
    /// Number of parallel jobs
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
        }
    }
}
