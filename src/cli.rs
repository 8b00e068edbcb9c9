use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a cluster to its declared topology", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Topology file (default: convoy.toml in the config directory)
    #[arg(short, long, global = true, env = "CONVOY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate the topology: nodes, groups and role dependencies
    Validate,

    /// Show the roles each node resolves to
    Roles(RolesArgs),

    /// Show what apply would change, in execution order
    #[command(visible_alias = "plan")]
    Diff(SnapshotArgs),

    /// Converge the cluster to the declared topology
    Apply(ApplyArgs),

    /// Show desired vs recorded role status per node
    Status(StatusArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RolesArgs {
    /// Only show this node
    #[arg(short, long)]
    pub node: Option<String>,

    /// Show nodes per role instead of roles per node
    #[arg(long)]
    pub by_role: bool,
}

#[derive(Args, Clone)]
pub struct SnapshotArgs {
    /// Current-state snapshot (default: state.toml in the state directory)
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,

    /// Only include actions for this node (plus what they depend on)
    #[arg(short, long)]
    pub node: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: SnapshotArgs,

    /// Show what would happen without calling the backend
    #[arg(long)]
    pub dry_run: bool,

    /// Number of parallel actions (default: settings.jobs or CPU count)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Current-state snapshot (default: state.toml in the state directory)
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,

    /// Also show the most recent results from the result log
    #[arg(long)]
    pub history: Option<usize>,

    /// Only show results finished at or after this time
    #[arg(long, value_parser = parse_time)]
    pub since: Option<DateTime<Utc>>,

    /// Only show results finished at or before this time
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,

    /// Only show results for this node (repeatable)
    #[arg(long = "node", value_name = "NODE")]
    pub nodes: Vec<String>,

    /// Only show results for this role (repeatable)
    #[arg(long = "role", value_name = "ROLE")]
    pub roles: Vec<String>,
}

impl StatusArgs {
    /// Whether any result log option was given
    pub fn wants_history(&self) -> bool {
        self.history.is_some()
            || self.since.is_some()
            || self.until.is_some()
            || !self.nodes.is_empty()
            || !self.roles.is_empty()
    }
}

/// Parse a point in time: RFC 3339, or `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DD` in UTC
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(format!(
        "expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' or 'YYYY-MM-DD', got '{value}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "convoy", "-vv", "apply", "--dry-run", "-j", "8", "--yes", "--snapshot", "s.toml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert!(args.dry_run);
                assert!(args.yes);
                assert_eq!(args.jobs, Some(8));
                assert_eq!(args.target.snapshot, Some(PathBuf::from("s.toml")));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_parse_status_history_window() {
        let cli = Cli::try_parse_from([
            "convoy",
            "status",
            "--since",
            "2026-03-01",
            "--until",
            "2026-03-01T18:30:00+02:00",
            "--role",
            "zookeeper",
            "--role",
            "worker",
        ])
        .unwrap();
        match cli.command {
            Command::Status(args) => {
                assert!(args.wants_history());
                assert_eq!(args.history, None);
                assert_eq!(args.since.unwrap().to_rfc3339(), "2026-03-01T00:00:00+00:00");
                assert_eq!(args.until.unwrap().to_rfc3339(), "2026-03-01T16:30:00+00:00");
                assert_eq!(args.roles, ["zookeeper", "worker"]);
                assert!(args.nodes.is_empty());
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(
            parse_time("2026-03-01 08:15:00").unwrap().to_rfc3339(),
            "2026-03-01T08:15:00+00:00"
        );
        assert!(parse_time("yesterday").is_err());
        assert!(Cli::try_parse_from(["convoy", "status", "--since", "03/01/2026"]).is_err());
    }

    #[test]
    fn test_plan_alias() {
        let cli = Cli::try_parse_from(["convoy", "plan", "--node", "master"]).unwrap();
        assert!(matches!(cli.command, Command::Diff(ref a) if a.node.as_deref() == Some("master")));
    }
}
