//! Topology file: schema, discovery and loading
//!
//! A topology is read from `convoy.toml` (or `convoy.json`) and split into
//! the pieces the engine needs: the inventory, the role catalog, and the
//! command templates for the backend.

use anyhow::{Context, Result, bail};
use converge::{Params, RoleCatalog, RoleSpec};
use inventory::{GroupEntry, Inventory, InventorySpec, NodeSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

// ============================================================================
// Format Detection
// ============================================================================

/// On-disk format of a config or snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }

    /// Detect the format from a file extension (defaults to TOML)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    pub fn parse<T: serde::de::DeserializeOwned>(&self, content: &str) -> Result<T> {
        match self {
            Self::Toml => toml::from_str(content).context("Invalid TOML"),
            Self::Json => serde_json::from_str(content).context("Invalid JSON"),
        }
    }

    pub fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            Self::Toml => toml::to_string_pretty(value).context("Failed to serialize to TOML"),
            Self::Json => {
                serde_json::to_string_pretty(value).context("Failed to serialize to JSON")
            }
        }
    }
}

/// Find `<name>.toml` or `<name>.json` in `dir` (TOML wins when both exist)
pub fn find_config_file(dir: &Path, name: &str) -> Option<(PathBuf, ConfigFormat)> {
    [ConfigFormat::Toml, ConfigFormat::Json]
        .into_iter()
        .map(|format| (dir.join(format!("{name}.{}", format.extension())), format))
        .find(|(path, _)| path.is_file())
}

// ============================================================================
// Schema
// ============================================================================

/// Run-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Parallel actions (defaults to the number of CPUs)
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Default per-action timeout in seconds
    #[serde(default)]
    pub action_timeout_secs: Option<u64>,

    /// Shell used to run command templates
    #[serde(default)]
    pub shell: Option<String>,
}

/// Command templates for the three backend operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub reconfigure: Option<String>,
}

impl CommandTemplates {
    /// Fill unset templates from `defaults`
    pub fn or(&self, defaults: &Self) -> Self {
        Self {
            start: self.start.clone().or_else(|| defaults.start.clone()),
            stop: self.stop.clone().or_else(|| defaults.stop.clone()),
            reconfigure: self
                .reconfigure
                .clone()
                .or_else(|| defaults.reconfigure.clone()),
        }
    }
}

/// A role parameter value; scalars are accepted and stored as strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Per-role settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Roles that must be running before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(flatten)]
    pub commands: CommandTemplates,
}

/// The whole topology file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,

    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,

    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,

    /// Default command templates for roles that don't set their own
    #[serde(default)]
    pub backend: CommandTemplates,
}

/// A loaded topology file and where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TopologyConfig,
    pub path: PathBuf,
    pub format: ConfigFormat,
}

impl TopologyConfig {
    /// Load from an explicit path, or discover `convoy.{toml,json}` in the
    /// config directory
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        let (path, format) = match explicit {
            Some(path) => (path.to_path_buf(), ConfigFormat::from_path(path)),
            None => {
                let dir = paths::config_dir()?;
                find_config_file(&dir, paths::CONFIG_NAME).with_context(|| {
                    format!(
                        "No {}.toml or {}.json found in {} (use --config or set {})",
                        paths::CONFIG_NAME,
                        paths::CONFIG_NAME,
                        dir.display(),
                        paths::ENV_CONFIG_DIR
                    )
                })?
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::from_str_as(&content, format)
            .with_context(|| format!("Invalid topology file: {}", path.display()))?;

        log::debug!(
            "Loaded topology from {} ({} nodes, {} groups, {} roles)",
            path.display(),
            config.nodes.len(),
            config.groups.len(),
            config.roles.len()
        );

        Ok(LoadedConfig {
            config,
            path,
            format,
        })
    }

    /// Parse a topology from a string (used by tests and `validate`)
    pub fn from_str_as(content: &str, format: ConfigFormat) -> Result<Self> {
        format.parse(content)
    }

    /// Build and validate the inventory
    pub fn inventory(&self) -> Result<Inventory> {
        let spec = InventorySpec {
            nodes: self.nodes.clone(),
            groups: self.groups.clone(),
        };
        Ok(Inventory::from_spec(&spec)?)
    }

    /// Default per-action timeout
    pub fn default_timeout(&self) -> Duration {
        self.settings
            .action_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(converge::DEFAULT_TIMEOUT)
    }

    /// Build the role catalog
    ///
    /// Zero timeouts are rejected here so every command sees them, not just
    /// `validate`.
    pub fn catalog(&self) -> Result<RoleCatalog> {
        if self.settings.action_timeout_secs == Some(0) {
            bail!("settings.action_timeout_secs must be greater than zero");
        }
        let mut catalog = RoleCatalog::new(self.default_timeout());
        for (name, role) in &self.roles {
            if role.timeout_secs == Some(0) {
                bail!("Role '{name}': timeout_secs must be greater than zero");
            }
            let params: Params = role
                .params
                .iter()
                .map(|(key, value)| (key.clone(), value.render()))
                .collect();
            catalog.insert(
                name,
                RoleSpec {
                    depends_on: role.depends_on.clone(),
                    params,
                    timeout: role.timeout_secs.map(Duration::from_secs),
                },
            );
        }
        Ok(catalog)
    }

    /// Command templates per role, with `[backend]` defaults filled in
    pub fn templates(&self) -> BTreeMap<String, CommandTemplates> {
        self.roles
            .iter()
            .map(|(name, role)| (name.clone(), role.commands.or(&self.backend)))
            .collect()
    }

    /// Number of parallel jobs, clamped to at least one
    pub fn jobs(&self) -> usize {
        self.settings
            .jobs
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// Validate everything that can be checked without a snapshot
    ///
    /// Returns warnings for suspicious but legal input.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.settings.jobs == Some(0) {
            bail!("settings.jobs must be greater than zero");
        }

        let inventory = self.inventory()?;
        inventory::roles::check_acyclic(&inventory)?;

        let catalog = self.catalog()?;
        catalog.check_acyclic()?;

        let mut warnings = Vec::new();
        for role in catalog.unknown_roles(&inventory) {
            warnings.push(format!(
                "Role '{role}' is configured but no group of that name exists"
            ));
        }
        let known = inventory.group_names();
        for (role, spec) in catalog.roles() {
            for dependency in &spec.depends_on {
                if !known.contains(dependency.as_str()) {
                    warnings.push(format!(
                        "Role '{role}' depends on '{dependency}', which is not declared in the topology"
                    ));
                }
            }
        }
        for (role, templates) in self.templates() {
            if templates.start.is_none() {
                warnings.push(format!("Role '{role}' has no start command"));
            }
        }

        Ok(warnings)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"
[settings]
jobs = 3
action_timeout_secs = 60

[nodes.master]
address = "10.4.4.10"
memory_mb = 2048

[nodes.slave1]
address = "10.4.4.11"
memory_mb = 4096
groups = ["mesos-slaves"]

[groups]
zookeeper = ["master"]
mesos-masters = ["master"]
"mesos:children" = ["mesos-masters", "mesos-slaves"]

[roles.zookeeper]
params = { port = 2181, tick = "2000" }
timeout_secs = 30
start = "systemctl start zookeeper@{param.port}"

[roles.mesos-masters]
depends_on = ["zookeeper"]

[backend]
start = "ssh {address} start {role}"
stop = "ssh {address} stop {role}"
"#;

    fn parse(src: &str) -> TopologyConfig {
        TopologyConfig::from_str_as(src, ConfigFormat::Toml).unwrap()
    }

    #[test]
    fn test_parse_topology() {
        let config = parse(TOPOLOGY);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.jobs(), 3);
        assert_eq!(config.default_timeout(), Duration::from_secs(60));

        let inventory = config.inventory().unwrap();
        let resolution = inventory::roles::resolve(&inventory).unwrap();
        let master: Vec<_> = resolution.roles_of("master").unwrap().iter().collect();
        assert_eq!(master, vec!["mesos", "mesos-masters", "zookeeper"]);
    }

    #[test]
    fn test_catalog_from_roles() {
        let catalog = parse(TOPOLOGY).catalog().unwrap();

        let zookeeper = catalog.spec("zookeeper").unwrap();
        assert_eq!(zookeeper.params.get("port").map(String::as_str), Some("2181"));
        assert_eq!(zookeeper.timeout, Some(Duration::from_secs(30)));
        assert_eq!(catalog.dependencies("mesos-masters"), ["zookeeper".to_string()]);
        assert_eq!(catalog.timeout_for("mesos-masters"), Duration::from_secs(60));
    }

    #[test]
    fn test_templates_fall_back_to_backend() {
        let templates = parse(TOPOLOGY).templates();

        let zookeeper = &templates["zookeeper"];
        assert_eq!(
            zookeeper.start.as_deref(),
            Some("systemctl start zookeeper@{param.port}")
        );
        assert_eq!(zookeeper.stop.as_deref(), Some("ssh {address} stop {role}"));
        assert_eq!(zookeeper.reconfigure, None);
    }

    #[test]
    fn test_validate_reports_role_cycle() {
        let src = format!(
            "{TOPOLOGY}\n[roles.mesos]\ndepends_on = [\"mesos-masters\"]\n"
        )
        .replace(
            "[roles.zookeeper]",
            "[roles.zookeeper]\ndepends_on = [\"mesos\"]",
        );
        let err = parse(&src).validate().unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));
    }

    #[test]
    fn test_validate_warnings() {
        let src = format!("{TOPOLOGY}\n[roles.ghost]\ndepends_on = [\"phantom\"]\n");
        let warnings = parse(&src).validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("'ghost' is configured")));
        assert!(warnings.iter().any(|w| w.contains("'phantom'")));
    }

    #[test]
    fn test_zero_timeouts_fail_catalog() {
        let src = TOPOLOGY.replace("action_timeout_secs = 60", "action_timeout_secs = 0");
        let err = parse(&src).catalog().unwrap_err();
        assert!(err.to_string().contains("action_timeout_secs"));

        let src = TOPOLOGY.replace("timeout_secs = 30", "timeout_secs = 0");
        let err = parse(&src).catalog().unwrap_err();
        assert!(err.to_string().contains("Role 'zookeeper'"));
    }

    #[test]
    fn test_validate_rejects_zero_jobs() {
        let src = TOPOLOGY.replace("jobs = 3", "jobs = 0");
        assert!(parse(&src).validate().is_err());
    }

    #[test]
    fn test_json_topology() {
        let config = TopologyConfig::from_str_as(
            r#"{
                "nodes": { "n1": { "address": "10.0.0.1:22", "memory_mb": 512 } },
                "groups": { "web": { "members": ["n1"] } },
                "roles": { "web": { "params": { "workers": 4, "debug": false } } }
            }"#,
            ConfigFormat::Json,
        )
        .unwrap();

        let catalog = config.catalog().unwrap();
        let params = catalog.params_for("web");
        assert_eq!(params.get("workers").map(String::as_str), Some("4"));
        assert_eq!(params.get("debug").map(String::as_str), Some("false"));
        assert!(config.inventory().unwrap().node("n1").is_some());
    }

    #[test]
    fn test_find_config_file_prefers_toml() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_file(dir.path(), "convoy").is_none());

        fs::write(dir.path().join("convoy.json"), "{}").unwrap();
        let (_, format) = find_config_file(dir.path(), "convoy").unwrap();
        assert_eq!(format, ConfigFormat::Json);

        fs::write(dir.path().join("convoy.toml"), "").unwrap();
        let (path, format) = find_config_file(dir.path(), "convoy").unwrap();
        assert_eq!(format, ConfigFormat::Toml);
        assert!(path.ends_with("convoy.toml"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        fs::write(&path, TOPOLOGY).unwrap();

        let loaded = TopologyConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.format, ConfigFormat::Toml);
        assert_eq!(loaded.config.roles.len(), 2);
    }
}
