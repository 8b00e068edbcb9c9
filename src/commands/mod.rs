//! CLI commands
//!
//! - `validate` - check the topology without touching anything
//! - `roles` - show resolved roles
//! - `diff` / `plan` - preview the ordered action plan
//! - `apply` - execute the plan and record the new snapshot
//! - `status` - desired vs recorded state

pub mod apply;
pub mod diff;
pub mod roles;
pub mod status;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use converge::{DesiredState, Plan, RoleCatalog, RoleDiff, Snapshot};
use inventory::{Inventory, Resolution};

use crate::Context;
use crate::config::{LoadedConfig, TopologyConfig};
use crate::ui;

/// Everything derived from the topology file
pub struct Topology {
    pub loaded: LoadedConfig,
    pub inventory: Inventory,
    pub resolution: Resolution,
    pub catalog: RoleCatalog,
    pub desired: DesiredState,
}

impl Topology {
    /// Load the topology file, then validate and resolve it
    pub fn load(ctx: &Context) -> Result<Self> {
        let loaded = TopologyConfig::load(ctx.config.as_deref())?;
        let source = loaded.path.display().to_string();

        let inventory = loaded
            .config
            .inventory()
            .with_context(|| format!("Invalid inventory in {source}"))?;
        let resolution = inventory::roles::resolve(&inventory)
            .with_context(|| format!("Cannot resolve groups in {source}"))?;
        let catalog = loaded
            .config
            .catalog()
            .with_context(|| format!("Invalid roles in {source}"))?;
        let desired = catalog.desired_state(&resolution);

        log::info!(
            "Resolved {} nodes and {} roles from {source}",
            inventory.len(),
            resolution.roles().len()
        );

        Ok(Self {
            loaded,
            inventory,
            resolution,
            catalog,
            desired,
        })
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.loaded.config
    }

    /// Role-level differences against `snapshot`, optionally for one node
    pub fn diffs(&self, snapshot: &Snapshot, node: Option<&str>) -> Result<Vec<RoleDiff>> {
        let nodes: Vec<&str> = match node {
            None => self.inventory.nodes().map(|n| n.name.as_str()).collect(),
            Some(node) if self.inventory.node(node).is_some() => vec![node],
            Some(node) => bail!("Unknown node '{node}'"),
        };
        Ok(converge::compute_diffs(nodes, &self.desired, snapshot))
    }

    /// Compute the plan against `snapshot`, optionally narrowed to one node
    pub fn plan(&self, snapshot: &Snapshot, node: Option<&str>) -> Result<Plan> {
        let plan = converge::plan(&self.inventory, &self.desired, snapshot, &self.catalog)
            .context("Cannot compute a convergence plan")?;

        match node {
            None => Ok(plan),
            Some(node) => {
                if self.inventory.node(node).is_none() {
                    bail!("Unknown node '{node}'");
                }
                Ok(plan.filter(|a| a.node == node)?)
            }
        }
    }
}

/// Print a plan in execution order
pub fn print_plan(plan: &Plan, ctx: &Context) {
    if plan.is_empty() {
        println!();
        ui::success("No changes needed; the cluster matches the topology");
        return;
    }

    ui::section(&format!("Plan ({} actions)", plan.len()));
    for (i, action) in plan.actions().iter().enumerate() {
        println!(
            "  {:>3}. {} {:<12} {:<20} {}",
            i + 1,
            ui::kind_symbol(action.kind),
            action.kind.to_string(),
            action.role.bold(),
            format!("on {} ({})", action.node, action.address).dimmed()
        );
        if ctx.verbose > 0 {
            if !action.params.is_empty() {
                ui::dim(&format!("       params: {}", ui::format_params(&action.params)));
            }
            if !action.depends_on.is_empty() {
                ui::dim(&format!("       after: {}", action.depends_on.join(", ")));
            }
        }
    }

    let counts = plan.count_by_kind();
    let summary: Vec<String> = counts
        .iter()
        .map(|(kind, n)| format!("{n} {kind}"))
        .collect();
    println!();
    ui::kv("Summary", &summary.join(", "));
}
