//! Convergence planner - turns desired vs current state into an ordered plan
//!
//! Ordering rules:
//! - a start/restart/reconfigure of role R waits for the non-stop actions of
//!   the nearest roles it depends on, directly or through roles that need no
//!   action;
//! - stops run in reverse: stopping a dependency waits for the stops of the
//!   nearest roles that depend on it, found the same way.
//!
//! Actions with no path between them carry no ordering constraint.

use crate::catalog::RoleCatalog;
use crate::diff::{RoleDiff, compute_diffs};
use crate::error::{Error, Result};
use crate::types::{Action, ActionKind, DesiredState, RoleStatus, Snapshot};
use inventory::Inventory;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// An ordered, dependency-annotated set of actions
#[derive(Debug, Clone, Default)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Build a plan from explicit actions
    ///
    /// Validates that every dependency refers to an action in the plan and
    /// that ids are unique, then orders the actions topologically (ties
    /// broken by id). A cycle is rejected here, before anything executes.
    pub fn from_actions(actions: Vec<Action>) -> Result<Self> {
        let mut ids = BTreeSet::new();
        for action in &actions {
            if !ids.insert(action.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate action id '{}'",
                    action.id
                )));
            }
        }
        for action in &actions {
            if let Some(missing) = action
                .depends_on
                .iter()
                .find(|dep| !ids.contains(dep.as_str()))
            {
                return Err(Error::Validation(format!(
                    "action '{}' depends on unknown action '{missing}'",
                    action.id
                )));
            }
        }

        let order = topological_order(&actions)?;
        let mut slots: Vec<Option<Action>> = actions.into_iter().map(Some).collect();
        let actions = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();

        Ok(Self { actions })
    }

    /// Actions in execution order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Keep only actions matching `predicate`, plus everything they depend on
    pub fn filter<F>(self, predicate: F) -> Result<Self>
    where
        F: Fn(&Action) -> bool,
    {
        let by_id: HashMap<&str, &Action> =
            self.actions.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut keep: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .actions
            .iter()
            .filter(|a| predicate(a))
            .map(|a| a.id.as_str())
            .collect();
        while let Some(id) = stack.pop() {
            if keep.insert(id)
                && let Some(action) = by_id.get(id)
            {
                stack.extend(action.depends_on.iter().map(String::as_str));
            }
        }

        let kept: Vec<Action> = self
            .actions
            .iter()
            .filter(|a| keep.contains(a.id.as_str()))
            .cloned()
            .collect();
        Self::from_actions(kept)
    }

    /// Number of actions per kind
    pub fn count_by_kind(&self) -> BTreeMap<ActionKind, usize> {
        let mut counts = BTreeMap::new();
        for action in &self.actions {
            *counts.entry(action.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Compute the plan that converges `snapshot` to `desired`
///
/// Fails before producing any action when role dependencies loop or a
/// desired role depends on a role no node provides.
pub fn plan(
    inventory: &Inventory,
    desired: &DesiredState,
    snapshot: &Snapshot,
    catalog: &RoleCatalog,
) -> Result<Plan> {
    catalog.check_acyclic()?;

    for (node, _) in desired.iter() {
        if inventory.node(node).is_none() {
            return Err(Error::Validation(format!(
                "desired state names unknown node '{node}'"
            )));
        }
    }

    let known_roles = inventory.group_names();
    catalog.check_satisfiable(desired, &known_roles)?;

    for node in snapshot.nodes.keys() {
        if inventory.node(node).is_none() {
            log::warn!("Snapshot lists node '{node}' which is not in the inventory; ignoring it");
        }
    }

    let node_names = inventory.nodes().map(|n| n.name.as_str());
    let diffs = compute_diffs(node_names, desired, snapshot);
    log::debug!("Computed {} role diffs", diffs.len());

    let mut actions: Vec<Action> = diffs
        .iter()
        .filter_map(|diff| build_action(inventory, catalog, diff))
        .collect();

    link_dependencies(&mut actions, catalog);

    Plan::from_actions(actions)
}

fn build_action(inventory: &Inventory, catalog: &RoleCatalog, diff: &RoleDiff) -> Option<Action> {
    let kind = diff.action_kind()?;
    let address = inventory
        .node(&diff.node)
        .map(|n| n.address.to_string())
        .unwrap_or_default();

    let params = match kind {
        ActionKind::Stop => match &diff.current {
            Some(RoleStatus::Running { params }) => params.clone(),
            _ => Default::default(),
        },
        _ => diff.desired.clone().unwrap_or_default(),
    };

    Some(Action {
        id: Action::make_id(kind, &diff.role, &diff.node),
        node: diff.node.clone(),
        address,
        role: diff.role.clone(),
        kind,
        params,
        depends_on: Vec::new(),
        timeout: catalog.timeout_for(&diff.role),
    })
}

fn link_dependencies(actions: &mut [Action], catalog: &RoleCatalog) {
    // role -> ids of its non-stop / stop actions
    let mut bring_up: HashMap<String, Vec<String>> = HashMap::new();
    let mut stops: HashMap<String, Vec<String>> = HashMap::new();
    for action in actions.iter() {
        let bucket = match action.kind {
            ActionKind::Stop => &mut stops,
            _ => &mut bring_up,
        };
        bucket
            .entry(action.role.clone())
            .or_default()
            .push(action.id.clone());
    }

    // role -> roles it depends on, and role -> roles that depend on it
    let mut requires: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (role, spec) in catalog.roles() {
        for dependency in &spec.depends_on {
            requires
                .entry(role.as_str())
                .or_default()
                .push(dependency.as_str());
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(role.as_str());
        }
    }

    for action in actions.iter_mut() {
        let mut depends_on = match action.kind {
            ActionKind::Stop => nearest_actions(&action.role, &dependents, &stops),
            _ => nearest_actions(&action.role, &requires, &bring_up),
        };
        depends_on.remove(&action.id);
        action.depends_on = depends_on.into_iter().collect();
    }
}

/// Follow `edges` from `role` and collect the actions of the closest roles
/// that have any
///
/// Roles with no action in the plan are passed through, so in a chain
/// `app -> sched -> zk` a start of `app` still waits for a restart of `zk`
/// when `sched` is already converged.
fn nearest_actions(
    role: &str,
    edges: &HashMap<&str, Vec<&str>>,
    actions_by_role: &HashMap<String, Vec<String>>,
) -> BTreeSet<String> {
    let neighbors = |r: &str| edges.get(r).into_iter().flatten().copied();

    let mut found = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = neighbors(role).collect();

    while let Some(current) = queue.pop_front() {
        if current == role || !seen.insert(current) {
            continue;
        }
        match actions_by_role.get(current) {
            Some(ids) => found.extend(ids.iter().cloned()),
            None => queue.extend(neighbors(current)),
        }
    }

    found
}

/// Kahn's algorithm over action indices; ready actions are taken in id order
fn topological_order(actions: &[Action]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; actions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    for (i, action) in actions.iter().enumerate() {
        for dep in &action.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<(&str, usize)> = actions
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, a)| (a.id.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(actions.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((actions[next].id.as_str(), next));
            }
        }
    }

    if order.len() != actions.len() {
        let cycle = actions
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, a)| a.id.clone())
            .collect();
        return Err(Error::Cycle { cycle });
    }

    Ok(order)
}
