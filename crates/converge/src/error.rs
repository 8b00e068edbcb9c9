//! Error types for the converge crate

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kinds of errors a convergence run can surface
///
/// Planning errors (`Validation`, `Cycle`, `Unsatisfiable`) abort the run
/// before anything executes. Execution errors (`ExecutionTimeout`,
/// `ExecutionFailure`) are recorded per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Cycle,
    Unsatisfiable,
    ExecutionTimeout,
    ExecutionFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Cycle => "CycleError",
            Self::Unsatisfiable => "UnsatisfiableError",
            Self::ExecutionTimeout => "ExecutionTimeout",
            Self::ExecutionFailure => "ExecutionFailure",
        }
    }

    /// Broad category: bad input, a failing role command, or the
    /// infrastructure around it
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation | Self::Cycle | Self::Unsatisfiable => ErrorCategory::Data,
            Self::ExecutionFailure => ErrorCategory::Algorithm,
            Self::ExecutionTimeout => ErrorCategory::System,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is likely at fault for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    /// The machinery around the role: threads, pipes, deadlines
    System,
    /// The role's own command reported failure
    Algorithm,
    /// The topology, snapshot or plan is inconsistent
    Data,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Algorithm => "ALGORITHM",
            Self::Data => "DATA",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that stop a convergence run before or outside action execution
#[derive(Error, Debug)]
pub enum Error {
    /// Inventory or role resolution failed
    #[error(transparent)]
    Inventory(#[from] inventory::Error),

    /// Desired state, snapshot, or plan is inconsistent
    #[error("invalid input: {0}")]
    Validation(String),

    /// A role depends on a role that nothing provides
    #[error("role '{role}' depends on '{dependency}', which {reason}")]
    Unsatisfiable {
        role: String,
        dependency: String,
        reason: String,
    },

    /// Role dependencies or action ordering form a cycle
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Result log could not be written
    #[error("result log error: {0}")]
    Io(#[from] std::io::Error),

    /// Thread pool could not be created
    #[error("failed to create thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Inventory(e) => match e.category() {
                inventory::ErrorCategory::Cycle => ErrorKind::Cycle,
                inventory::ErrorCategory::Validation => ErrorKind::Validation,
            },
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unsatisfiable { .. } => ErrorKind::Unsatisfiable,
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::Io(_) | Self::ThreadPool(_) => ErrorKind::ExecutionFailure,
        }
    }

    /// Category of this error
    ///
    /// I/O and thread pool failures are the host's fault even though they
    /// share a kind with failing role commands.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::ThreadPool(_) => ErrorCategory::System,
            other => other.kind().category(),
        }
    }
}

/// Result type for converge operations
pub type Result<T> = std::result::Result<T, Error>;
