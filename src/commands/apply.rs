use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use converge::{
    AutoConfirm, Backend, ConfirmCallback, ExecuteOptions, Plan, ResultLog, RunReport,
};
use std::sync::Arc;

use super::{Topology, print_plan};
use crate::Context;
use crate::backend::CommandBackend;
use crate::cli::ApplyArgs;
use crate::paths;
use crate::progress::{BarProgress, PromptConfirm};
use crate::state::SnapshotStore;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    ui::header("Applying Topology");

    if args.dry_run {
        ui::warn("Dry run - no changes will be made");
    }

    let topology = Topology::load(ctx)?;
    let store = SnapshotStore::locate(args.target.snapshot.as_deref())?;
    let mut snapshot = store.load()?;

    let plan = topology.plan(&snapshot, args.target.node.as_deref())?;
    print_plan(&plan, ctx);
    if plan.is_empty() {
        return Ok(());
    }

    let config = topology.config();
    let backend: Arc<dyn Backend> = Arc::new(CommandBackend::new(
        &topology.inventory,
        config.templates(),
        config.backend.clone(),
        config.settings.shell.as_deref(),
    ));
    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: args.jobs.unwrap_or_else(|| config.jobs()).max(1),
    };

    let log = if args.dry_run {
        ResultLog::in_memory()
    } else {
        let path = paths::results_file_for(args.target.snapshot.as_deref())?;
        ResultLog::open(&path)
            .with_context(|| format!("Cannot open result log {}", path.display()))?
    };

    println!();
    log::info!("Executing {} actions with {} jobs", plan.len(), opts.jobs);
    let report = if args.yes || args.dry_run {
        execute(&plan, backend, &opts, &log, ctx, &mut AutoConfirm)?
    } else {
        execute(&plan, backend, &opts, &log, ctx, &mut PromptConfirm)?
    };

    if args.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(());
    }

    let summary = report.summary();
    if summary.skipped == summary.total() {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    for (action, result) in plan.actions().iter().zip(&report.actions) {
        snapshot.record(action, &result.outcome);
    }
    store.save(&mut snapshot)?;
    log::debug!("Snapshot written to {}", store.path().display());

    print_summary(&report);
    if let Some(path) = log.path() {
        ui::dim(&format!("Results appended to {}", path.display()));
    }

    if !report.is_success() {
        bail!("{} of {} actions failed", summary.failed, summary.total());
    }
    Ok(())
}

fn execute<C: ConfirmCallback>(
    plan: &Plan,
    backend: Arc<dyn Backend>,
    opts: &ExecuteOptions,
    log: &ResultLog,
    ctx: &Context,
    confirm: &mut C,
) -> Result<RunReport> {
    let mut progress = BarProgress::new(ctx.quiet);
    converge::execute(plan, backend, opts, log, &mut progress, confirm)
        .context("Failed to execute plan")
}

fn print_summary(report: &RunReport) {
    let summary = report.summary();

    println!();
    if summary.is_success() {
        println!("  {} Topology applied successfully!", "✓".green().bold());
    } else {
        println!("  {} Topology applied with errors", "⚠".yellow().bold());
    }

    if summary.succeeded > 0 {
        println!("    • {} actions succeeded", summary.succeeded);
    }
    if summary.skipped > 0 {
        println!("    • {} actions skipped", summary.skipped);
    }
    if summary.failed > 0 {
        let timeouts = if summary.timed_out > 0 {
            format!(" ({} timed out)", summary.timed_out)
        } else {
            String::new()
        };
        println!("    • {} {} failed{timeouts}", summary.failed, "actions".red());
    }

    for failure in report.failures() {
        if let converge::ActionOutcome::Failed { kind, error } = &failure.outcome {
            println!(
                "      {} {} [{}, {}] {}",
                "✗".red(),
                failure.action_id,
                kind,
                kind.category(),
                error.dimmed()
            );
        }
    }
}
