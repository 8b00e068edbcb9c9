//! # Converge
//!
//! Convergence engine for declarative cluster topologies.
//!
//! Given the desired role assignment of every node and a snapshot of what is
//! currently running, this crate computes the actions that close the gap,
//! orders them by role dependency, and executes them against a pluggable
//! backend.
//!
//! ## Core Concepts
//!
//! - **DesiredState**: roles (with parameters) each node should run
//! - **Snapshot**: roles each node currently runs, stopped, or failed
//! - **RoleCatalog**: role dependencies, parameters and timeouts
//! - **Plan**: actions in dependency order; cycles are rejected up front
//! - **Executor**: runs independent actions in parallel, skipping the
//!   dependents of anything that fails
//! - **ResultLog**: append-only record of every action outcome
//!
//! Planning is idempotent: when the snapshot already matches the desired
//! state, the plan is empty.
//!
//! ## Example
//!
//! ```ignore
//! use converge::{RoleCatalog, ResultLog, Snapshot, ExecuteOptions, execute_simple, plan};
//!
//! let resolution = inventory::roles::resolve(&cluster)?;
//! let desired = catalog.desired_state(&resolution);
//! let plan = plan(&cluster, &desired, &Snapshot::new(), &catalog)?;
//!
//! let log = ResultLog::open(&state_dir.join("results.jsonl"))?;
//! let report = execute_simple(&plan, backend, &ExecuteOptions::default(), &log)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Backend`]: starts, stops and reconfigures roles on nodes
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations

pub mod catalog;
pub mod context;
pub mod diff;
mod error;
pub mod executor;
pub mod journal;
pub mod planner;
pub mod types;

// Re-export main types at crate root
pub use catalog::{DEFAULT_TIMEOUT, RoleCatalog, RoleSpec};
pub use context::{AutoConfirm, AutoDecline, Backend, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, RoleDiff, compute_diffs, group_by_node};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use executor::{execute, execute_simple};
pub use journal::{LogEntry, LogQuery, ResultLog};
pub use planner::{Plan, plan};
pub use types::{
    Action, ActionKind, ActionOutcome, ActionReport, DesiredState, ExecuteOptions, Params,
    RoleStatus, RunReport, RunSummary, Snapshot,
};
