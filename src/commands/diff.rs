use anyhow::Result;
use colored::Colorize;
use converge::{DiffSummary, RoleDiff, group_by_node};

use super::{Topology, print_plan};
use crate::Context;
use crate::cli::SnapshotArgs;
use crate::state::SnapshotStore;
use crate::ui;

pub fn run(ctx: &Context, args: SnapshotArgs) -> Result<()> {
    let topology = Topology::load(ctx)?;
    let store = SnapshotStore::locate(args.snapshot.as_deref())?;
    let snapshot = store.load()?;

    ui::header("Convergence Plan");
    if !ctx.quiet {
        ui::kv("Topology", &topology.loaded.path.display().to_string());
        ui::kv("Snapshot", &store.path().display().to_string());
    }

    let diffs = topology.diffs(&snapshot, args.node.as_deref())?;
    if !ctx.quiet {
        print_changes(&diffs);
    }

    let plan = topology.plan(&snapshot, args.node.as_deref())?;
    print_plan(&plan, ctx);
    Ok(())
}

/// Print role changes grouped by node
fn print_changes(diffs: &[RoleDiff]) {
    let summary = DiffSummary::from_diffs(diffs);
    if !summary.has_changes() {
        return;
    }

    ui::section(&format!("Changes by node ({})", summary.total()));
    for (node, changes) in group_by_node(diffs) {
        println!("  {}", node.bold());
        for diff in changes {
            if let Some(kind) = diff.action_kind() {
                println!(
                    "    {} {:<20} {}",
                    ui::kind_symbol(kind),
                    diff.role,
                    ui::format_change(diff).dimmed()
                );
            }
        }
    }

    println!();
    ui::kv("Changes", &format_summary(&summary));
}

fn format_summary(summary: &DiffSummary) -> String {
    format!(
        "{} to start, {} to stop, {} to restart, {} to reconfigure",
        summary.starts, summary.stops, summary.restarts, summary.reconfigures
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{DesiredState, Params, RoleStatus, Snapshot, compute_diffs};

    #[test]
    fn test_format_summary() {
        let mut desired = DesiredState::new();
        desired.insert("master", "zookeeper", Params::new());
        desired.insert("slave1", "worker", Params::new());

        let mut snapshot = Snapshot::new();
        snapshot.set(
            "slave1",
            "worker",
            RoleStatus::Failed {
                error: "exit 1".into(),
            },
        );
        snapshot.set(
            "slave1",
            "legacy",
            RoleStatus::Running {
                params: Params::new(),
            },
        );

        let diffs = compute_diffs(["master", "slave1"], &desired, &snapshot);
        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(
            format_summary(&summary),
            "1 to start, 1 to stop, 1 to restart, 0 to reconfigure"
        );

        let grouped = group_by_node(&diffs);
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), ["master", "slave1"]);
        assert_eq!(grouped["slave1"].len(), 2);
    }
}
