//! Execution engine - runs a plan as a dependency DAG on a thread pool
//!
//! The calling thread drives the schedule: it hands every action whose
//! dependencies have all succeeded to the pool, then waits for completions.
//! A failed action skips its dependents (transitively); unrelated actions
//! keep running.

use crate::context::{Backend, ConfirmCallback, ProgressCallback};
use crate::error::{ErrorKind, Result};
use crate::journal::{LogEntry, ResultLog};
use crate::planner::Plan;
use crate::types::{Action, ActionKind, ActionOutcome, ActionReport, ExecuteOptions, RunReport};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

/// Execute a plan with the given options and callbacks
///
/// # Arguments
/// * `plan` - The ordered plan to run
/// * `backend` - External system the actions are applied against
/// * `opts` - Execution options (dry_run, jobs)
/// * `log` - Append-only result log every outcome is written to
/// * `progress` - Progress callback
/// * `confirm` - Confirmation callback (not consulted for dry runs)
///
/// # Returns
/// A per-action report in plan order. Action failures are part of the
/// report, not an `Err`.
pub fn execute<P, C>(
    plan: &Plan,
    backend: Arc<dyn Backend>,
    opts: &ExecuteOptions,
    log: &ResultLog,
    progress: &mut P,
    confirm: &mut C,
) -> Result<RunReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    if plan.is_empty() {
        return Ok(RunReport::default());
    }

    if opts.dry_run {
        return Ok(skip_all(plan, "dry run", log));
    }

    let confirmed = confirm.confirm("Apply changes?").unwrap_or_else(|e| {
        log::warn!("Confirmation failed: {e:#}");
        false
    });
    if !confirmed {
        return Ok(skip_all(plan, "declined", log));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .thread_name(|i| format!("convoy-worker-{i}"))
        .build()?;

    Ok(run_dag(plan, &backend, &pool, log, progress))
}

/// Execute without callbacks
pub fn execute_simple(
    plan: &Plan,
    backend: Arc<dyn Backend>,
    opts: &ExecuteOptions,
    log: &ResultLog,
) -> Result<RunReport> {
    use crate::context::{AutoConfirm, NoProgress};

    execute(plan, backend, opts, log, &mut NoProgress, &mut AutoConfirm)
}

fn skip_all(plan: &Plan, reason: &str, log: &ResultLog) -> RunReport {
    let actions = plan
        .actions()
        .iter()
        .map(|action| {
            let report = skipped(action, reason.to_string());
            append(log, &report);
            report
        })
        .collect();
    RunReport { actions }
}

fn run_dag<P: ProgressCallback>(
    plan: &Plan,
    backend: &Arc<dyn Backend>,
    pool: &rayon::ThreadPool,
    log: &ResultLog,
    progress: &mut P,
) -> RunReport {
    let actions = plan.actions();
    let index: HashMap<&str, usize> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id.as_str(), i))
        .collect();

    let mut remaining = vec![0usize; actions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    for (i, action) in actions.iter().enumerate() {
        for dep in &action.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                remaining[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut reports: Vec<Option<ActionReport>> = vec![None; actions.len()];
    let mut ready: VecDeque<usize> = (0..actions.len()).filter(|&i| remaining[i] == 0).collect();
    let (tx, rx) = mpsc::channel::<(usize, ActionReport)>();

    progress.on_run_start(actions.len());

    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;

        loop {
            while let Some(i) = ready.pop_front() {
                let action = actions[i].clone();
                progress.on_action_start(&action);
                log::info!("Starting {}", action.description());

                let tx = tx.clone();
                let backend = Arc::clone(backend);
                in_flight += 1;
                scope.spawn(move |_| {
                    let report = run_action(backend, action);
                    append(log, &report);
                    // The receiver outlives every task in this scope
                    let _ = tx.send((i, report));
                });
            }

            if in_flight == 0 {
                break;
            }

            let Ok((i, report)) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            log_outcome(&report);
            progress.on_action_complete(&report);

            if report.outcome.is_success() {
                for &next in &dependents[i] {
                    remaining[next] -= 1;
                    if remaining[next] == 0 && reports[next].is_none() {
                        ready.push_back(next);
                    }
                }
            } else {
                for skipped_report in skip_dependents(i, actions, &dependents, &mut reports) {
                    append(log, &skipped_report);
                    progress.on_action_complete(&skipped_report);
                }
            }

            reports[i] = Some(report);
        }
    });

    progress.on_run_complete();

    // Anything left unreported never became ready
    let actions = reports
        .into_iter()
        .zip(actions)
        .map(|(report, action)| {
            report.unwrap_or_else(|| skipped(action, "dependencies never completed".to_string()))
        })
        .collect();

    RunReport { actions }
}

/// Mark every not-yet-reported action downstream of `failed` as skipped
fn skip_dependents(
    failed: usize,
    actions: &[Action],
    dependents: &[Vec<usize>],
    reports: &mut [Option<ActionReport>],
) -> Vec<ActionReport> {
    let mut skipped_reports = Vec::new();
    let mut stack: Vec<(usize, usize)> = dependents[failed].iter().map(|&d| (d, failed)).collect();

    while let Some((i, cause)) = stack.pop() {
        if reports[i].is_some() {
            continue;
        }
        let reason = format!("dependency '{}' did not succeed", actions[cause].id);
        let report = skipped(&actions[i], reason);
        log::warn!("Skipping {}: {}", actions[i].id, describe(&report.outcome));
        reports[i] = Some(report.clone());
        skipped_reports.push(report);
        stack.extend(dependents[i].iter().map(|&d| (d, i)));
    }

    skipped_reports
}

/// Run one action against the backend, bounded by its timeout
fn run_action(backend: Arc<dyn Backend>, action: Action) -> ActionReport {
    let started_at = Utc::now();
    let timeout = action.timeout;
    let (tx, rx) = mpsc::channel();

    let worker_action = action.clone();
    let spawned = thread::Builder::new()
        .name(format!("convoy-{}", action.id))
        .spawn(move || {
            let result = apply(backend.as_ref(), &worker_action);
            let _ = tx.send(result);
        });

    let outcome = match spawned {
        Err(e) => ActionOutcome::Failed {
            kind: ErrorKind::ExecutionFailure,
            error: format!("failed to spawn worker thread: {e}"),
        },
        Ok(_) => match rx.recv_timeout(timeout) {
            Ok(Ok(())) => ActionOutcome::Succeeded,
            Ok(Err(e)) => ActionOutcome::Failed {
                kind: ErrorKind::ExecutionFailure,
                error: format!("{e:#}"),
            },
            Err(RecvTimeoutError::Timeout) => ActionOutcome::Failed {
                kind: ErrorKind::ExecutionTimeout,
                error: format!("did not complete within {}", format_duration(timeout)),
            },
            Err(RecvTimeoutError::Disconnected) => ActionOutcome::Failed {
                kind: ErrorKind::ExecutionFailure,
                error: "backend exited without reporting a result".to_string(),
            },
        },
    };

    ActionReport {
        action_id: action.id,
        node: action.node,
        address: action.address,
        role: action.role,
        kind: action.kind,
        outcome,
        started_at,
        finished_at: Utc::now(),
    }
}

fn apply(backend: &dyn Backend, action: &Action) -> anyhow::Result<()> {
    match action.kind {
        ActionKind::Start => backend.start(action),
        ActionKind::Stop => backend.stop(action),
        ActionKind::Reconfigure => backend.reconfigure(action),
        ActionKind::Restart => {
            backend.stop(action)?;
            backend.start(action)
        }
    }
}

fn skipped(action: &Action, reason: String) -> ActionReport {
    let now = Utc::now();
    ActionReport {
        action_id: action.id.clone(),
        node: action.node.clone(),
        address: action.address.clone(),
        role: action.role.clone(),
        kind: action.kind,
        outcome: ActionOutcome::Skipped { reason },
        started_at: now,
        finished_at: now,
    }
}

fn append(log: &ResultLog, report: &ActionReport) {
    if let Err(e) = log.append(LogEntry::from(report)) {
        log::error!("Failed to record result for {}: {e}", report.action_id);
    }
}

fn log_outcome(report: &ActionReport) {
    match &report.outcome {
        ActionOutcome::Succeeded => log::info!("Completed {}", report.action_id),
        outcome => log::warn!("{}: {}", report.action_id, describe(outcome)),
    }
}

fn describe(outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Succeeded => "succeeded".to_string(),
        ActionOutcome::Failed { kind, error } => format!("{kind}: {error}"),
        ActionOutcome::Skipped { reason } => format!("skipped ({reason})"),
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
