use anyhow::Result;

use super::Topology;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let topology = Topology::load(ctx)?;
    let warnings = topology.config().validate()?;

    if !ctx.quiet {
        ui::header("Topology");
        ui::kv(
            "File",
            &format!(
                "{} ({})",
                topology.loaded.path.display(),
                topology.loaded.format.extension()
            ),
        );
        ui::kv("Nodes", &topology.inventory.len().to_string());
        ui::kv("Groups", &topology.inventory.group_names().len().to_string());
        ui::kv("Roles held", &topology.resolution.roles().len().to_string());
        println!();
    }

    for warning in &warnings {
        ui::warn(warning);
    }

    // Dependencies of held roles must be held somewhere
    topology
        .catalog
        .check_satisfiable(&topology.desired, &topology.inventory.group_names())?;

    ui::success("Topology is valid");
    Ok(())
}
