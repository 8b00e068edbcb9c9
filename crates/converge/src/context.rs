//! Backend and callback traits
//!
//! These traits allow the converge crate to be used without depending on a
//! particular process manager, container runtime, or UI.

use crate::types::{Action, ActionReport};
use anyhow::Result;

/// The external system actions are applied against
///
/// Implementations run one role change on one node and report success or
/// failure. Calls happen on worker threads and may be abandoned when the
/// action's timeout passes, so implementations must not rely on being
/// awaited.
pub trait Backend: Send + Sync {
    /// Bring a role up on a node
    fn start(&self, action: &Action) -> Result<()>;

    /// Take a role down on a node
    fn stop(&self, action: &Action) -> Result<()>;

    /// Apply new parameters to a running role
    fn reconfigure(&self, action: &Action) -> Result<()>;
}

/// Progress callback for execution
///
/// All calls are made from the thread driving the run.
pub trait ProgressCallback: Send {
    /// Called once before any action starts
    fn on_run_start(&mut self, total: usize);

    /// Called when an action is handed to a worker
    fn on_action_start(&mut self, action: &Action);

    /// Called when an action finishes, fails, or is skipped
    fn on_action_complete(&mut self, report: &ActionReport);

    /// Called once after the last action
    fn on_run_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm; `true` to proceed
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_action_start(&mut self, _action: &Action) {}
    fn on_action_complete(&mut self, _report: &ActionReport) {}
    fn on_run_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
