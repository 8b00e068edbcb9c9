use anyhow::{Result, bail};
use colored::Colorize;

use super::Topology;
use crate::Context;
use crate::cli::RolesArgs;
use crate::ui;

pub fn run(ctx: &Context, args: RolesArgs) -> Result<()> {
    let topology = Topology::load(ctx)?;

    if args.by_role {
        ui::header("Nodes by role");
        for role in topology.resolution.roles() {
            let nodes = topology.resolution.nodes_with(role);
            println!("  {:<24} {}", role.bold(), nodes.join(", "));
        }
        return Ok(());
    }

    let nodes: Vec<_> = match args.node.as_deref() {
        Some(name) => match topology.inventory.node(name) {
            Some(node) => vec![node],
            None => bail!("Unknown node '{name}'"),
        },
        None => topology.inventory.nodes().collect(),
    };

    ui::header("Roles by node");
    for node in nodes {
        let roles: Vec<&str> = topology
            .resolution
            .roles_of(&node.name)
            .map(|roles| roles.iter().map(String::as_str).collect())
            .unwrap_or_default();

        println!(
            "  {} {}",
            node.name.bold(),
            format!("({})", node.address).dimmed()
        );
        if roles.is_empty() {
            ui::dim("    (no roles)");
        } else {
            println!("    {}", roles.join(", "));
        }

        if ctx.verbose > 0 {
            let direct: Vec<&str> = node.groups.iter().map(String::as_str).collect();
            ui::dim(&format!("    direct groups: {}", direct.join(", ")));
            let cpus = node
                .resources
                .cpus
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            ui::dim(&format!(
                "    memory: {} MB, cpus: {cpus}",
                node.resources.memory_mb
            ));
        }
    }

    Ok(())
}
