//! Error types for the inventory crate

use thiserror::Error;

/// Categories of inventory errors.
///
/// Everything except a group cycle is a validation problem with the
/// declarative input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or inconsistent input
    Validation,
    /// Group-of-groups relationships form a cycle
    Cycle,
}

impl ErrorCategory {
    /// Short machine-friendly name for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Cycle => "CycleError",
        }
    }
}

/// Errors that can occur while loading an inventory or resolving roles
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Node address could not be parsed
    #[error("invalid address '{address}' for node '{node}': {reason}")]
    InvalidAddress {
        node: String,
        address: String,
        reason: String,
    },

    /// Two nodes resolve to the same address
    #[error("duplicate address '{address}' used by nodes '{first}' and '{second}'")]
    DuplicateAddress {
        address: String,
        first: String,
        second: String,
    },

    /// Node definition is invalid (bad name, zero memory, ...)
    #[error("invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    /// Group definition is invalid (unknown member, declared twice, ...)
    #[error("invalid group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    /// Group-of-groups cycle
    #[error("group cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },
}

impl Error {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cycle { .. } => ErrorCategory::Cycle,
            _ => ErrorCategory::Validation,
        }
    }

    pub(crate) fn invalid_node(node: &str, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_group(group: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGroup {
            group: group.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for inventory operations
pub type Result<T> = std::result::Result<T, Error>;
