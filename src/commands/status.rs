use anyhow::Result;
use colored::Colorize;
use converge::{ActionOutcome, LogQuery, ResultLog, RoleStatus};
use std::collections::BTreeSet;
use std::path::Path;

use super::Topology;
use crate::Context;
use crate::cli::StatusArgs;
use crate::paths;
use crate::state::SnapshotStore;
use crate::ui;

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let topology = Topology::load(ctx)?;
    let store = SnapshotStore::locate(args.snapshot.as_deref())?;
    let snapshot = store.load()?;

    ui::header("Cluster Status");
    if !ctx.quiet {
        ui::kv("Snapshot", &store.path().display().to_string());
        if let Some(updated) = snapshot.updated_at {
            ui::kv("Updated", &updated.to_rfc3339());
        }
    }

    let mut converged = 0usize;
    let mut pending = 0usize;

    for node in topology.inventory.nodes() {
        let desired = topology.desired.roles_of(&node.name);
        let recorded = snapshot.nodes.get(&node.name);

        let roles: BTreeSet<&String> = desired
            .into_iter()
            .flat_map(|roles| roles.keys())
            .chain(recorded.into_iter().flat_map(|roles| roles.keys()))
            .collect();

        ui::section(&format!("{} ({})", node.name, node.address));
        if roles.is_empty() {
            ui::dim("  (no roles)");
            continue;
        }

        for role in roles {
            let want = desired.and_then(|r| r.get(role));
            let have = snapshot.status(&node.name, role);

            let state = match (want, have) {
                (Some(params), Some(RoleStatus::Running { params: current })) if params == current => {
                    converged += 1;
                    "running".green().to_string()
                }
                (Some(_), Some(RoleStatus::Running { .. })) => {
                    pending += 1;
                    "running (stale params)".yellow().to_string()
                }
                (Some(_), Some(RoleStatus::Failed { error })) => {
                    pending += 1;
                    format!("{} {}", "failed".red(), error.dimmed())
                }
                (Some(_), Some(RoleStatus::Stopped) | None) => {
                    pending += 1;
                    "not running".yellow().to_string()
                }
                (None, Some(RoleStatus::Stopped) | None) => "stopped".dimmed().to_string(),
                (None, Some(_)) => {
                    pending += 1;
                    "running but not desired".red().to_string()
                }
            };

            println!("    {} {:<24} {}", ui::status_symbol(have), role, state);
        }
    }

    println!();
    if pending == 0 {
        ui::success(&format!("Converged ({converged} roles running as declared)"));
    } else {
        ui::warn(&format!(
            "{pending} roles need changes ({converged} converged); run 'convoy diff'"
        ));
    }

    if args.wants_history() {
        let query = LogQuery {
            since: args.since,
            until: args.until,
            nodes: args.nodes.clone(),
            roles: args.roles.clone(),
        };
        show_history(&query, args.history, args.snapshot.as_deref())?;
    }

    Ok(())
}

/// Print results from the log, oldest first
///
/// With a `count`, only the last `count` matching entries are shown.
fn show_history(query: &LogQuery, count: Option<usize>, snapshot: Option<&Path>) -> Result<()> {
    let path = paths::results_file_for(snapshot)?;

    ui::section("Recent results");
    if !path.exists() {
        ui::dim("  (no results recorded yet)");
        return Ok(());
    }

    let entries = ResultLog::query(&path, query)?;
    if entries.is_empty() {
        ui::dim("  (no matching results)");
        return Ok(());
    }

    let start = count.map_or(0, |count| entries.len().saturating_sub(count));
    for entry in &entries[start..] {
        let detail = match &entry.outcome {
            ActionOutcome::Succeeded => String::new(),
            ActionOutcome::Failed { kind, error } => {
                format!("{kind} [{}]: {error}", kind.category())
            }
            ActionOutcome::Skipped { reason } => reason.clone(),
        };
        let origin = if entry.address.is_empty() {
            String::new()
        } else {
            format!("({})", entry.address)
        };
        println!(
            "    {} {} {:<36} {:<18} {}",
            entry.finished_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            ui::outcome_symbol(&entry.outcome),
            entry.action_id,
            origin.dimmed(),
            detail.dimmed()
        );
    }
    Ok(())
}
