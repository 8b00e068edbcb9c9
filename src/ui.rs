use colored::{ColoredString, Colorize};
use converge::{ActionKind, ActionOutcome, RoleStatus};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Convergence symbols
// ============================================================================

/// Diff-style symbol for an action kind
pub fn kind_symbol(kind: ActionKind) -> ColoredString {
    match kind {
        ActionKind::Start => "+".green(),
        ActionKind::Stop => "-".red(),
        ActionKind::Restart => "↻".yellow(),
        ActionKind::Reconfigure => "~".yellow(),
    }
}

/// Symbol for an action outcome
pub fn outcome_symbol(outcome: &ActionOutcome) -> ColoredString {
    match outcome {
        ActionOutcome::Succeeded => "✓".green(),
        ActionOutcome::Failed { .. } => "✗".red(),
        ActionOutcome::Skipped { .. } => "⊘".dimmed(),
    }
}

/// Symbol for a recorded role status
pub fn status_symbol(status: Option<&RoleStatus>) -> ColoredString {
    match status {
        Some(RoleStatus::Running { .. }) => "●".green(),
        Some(RoleStatus::Stopped) => "○".dimmed(),
        Some(RoleStatus::Failed { .. }) => "✗".red(),
        None => "○".dimmed(),
    }
}

/// Format a duration in milliseconds for display
pub fn format_millis(ms: i64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Render `key=value` pairs compactly
pub fn format_params(params: &converge::Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Describe a role change as `current → desired`
pub fn format_change(diff: &converge::RoleDiff) -> String {
    let with_params = |label: &str, params: &converge::Params| {
        if params.is_empty() {
            label.to_string()
        } else {
            format!("{label} ({})", format_params(params))
        }
    };

    let current = match &diff.current {
        None => "absent".to_string(),
        Some(RoleStatus::Stopped) => "stopped".to_string(),
        Some(RoleStatus::Failed { .. }) => "failed".to_string(),
        Some(RoleStatus::Running { params }) => with_params("running", params),
    };
    let desired = match &diff.desired {
        None => "stopped".to_string(),
        Some(params) => with_params("running", params),
    };
    format!("{current} → {desired}")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "0ms");
        assert_eq!(format_millis(999), "999ms");
        assert_eq!(format_millis(1500), "1.5s");
        assert_eq!(format_millis(62_000), "62.0s");
    }

    #[test]
    fn test_format_params() {
        let params = converge::Params::from([
            ("port".to_string(), "2181".to_string()),
            ("heap".to_string(), "1g".to_string()),
        ]);
        assert_eq!(format_params(&params), "heap=1g port=2181");
        assert_eq!(format_params(&converge::Params::new()), "");
    }

    #[test]
    fn test_format_change() {
        let port = |p: &str| converge::Params::from([("port".to_string(), p.to_string())]);
        let diff = |current, desired| converge::RoleDiff {
            node: "master".into(),
            role: "zookeeper".into(),
            current,
            desired,
        };

        assert_eq!(
            format_change(&diff(None, Some(converge::Params::new()))),
            "absent → running"
        );
        assert_eq!(
            format_change(&diff(
                Some(RoleStatus::Running { params: port("2181") }),
                Some(port("2182"))
            )),
            "running (port=2181) → running (port=2182)"
        );
        assert_eq!(
            format_change(&diff(Some(RoleStatus::Failed { error: "boom".into() }), None)),
            "failed → stopped"
        );
    }
}
