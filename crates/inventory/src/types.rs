//! Data types for the inventory crate

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// Suffix marking a group-of-groups in the legacy `"name:children"` spelling
pub const CHILDREN_SUFFIX: &str = ":children";

static HOST_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid host label regex")
});

// ============================================================================
// Address
// ============================================================================

/// Host part of a node address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// A validated network address: host name or IP, with an optional port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: Host,
    pub port: Option<u16>,
}

impl Address {
    /// Normalized form used for duplicate detection (lowercase host names)
    pub fn normalized(&self) -> String {
        match &self.host {
            Host::Name(name) => Self {
                host: Host::Name(name.to_ascii_lowercase()),
                port: self.port,
            }
            .to_string(),
            Host::Ip(_) => self.to_string(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.port) {
            (Host::Ip(IpAddr::V6(ip)), Some(port)) => write!(f, "[{ip}]:{port}"),
            (host, Some(port)) => write!(f, "{host}:{port}"),
            (host, None) => write!(f, "{host}"),
        }
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err("address is empty".to_string());
        }

        // Bracketed IPv6, optionally with a port: [::1]:22
        if let Some(rest) = input.strip_prefix('[') {
            let (inner, after) = rest
                .split_once(']')
                .ok_or_else(|| "missing closing ']'".to_string())?;
            let ip: IpAddr = inner
                .parse()
                .map_err(|_| format!("'{inner}' is not an IP address"))?;
            let port = match after {
                "" => None,
                _ => {
                    let raw = after
                        .strip_prefix(':')
                        .ok_or_else(|| format!("unexpected '{after}' after ']'"))?;
                    Some(parse_port(raw)?)
                }
            };
            return Ok(Self {
                host: Host::Ip(ip),
                port,
            });
        }

        // Bare IP (v4 or v6) without port
        if let Ok(ip) = input.parse::<IpAddr>() {
            return Ok(Self {
                host: Host::Ip(ip),
                port: None,
            });
        }

        let (host, port) = match input.split_once(':') {
            Some((_, rest)) if rest.contains(':') => {
                return Err("IPv6 addresses with a port must be bracketed".to_string());
            }
            Some((host, raw)) => (host, Some(parse_port(raw)?)),
            None => (input, None),
        };

        let host = match host.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Name(validate_host_name(host)?),
        };

        Ok(Self { host, port })
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.parse::<u16>() {
        Ok(0) => Err("port must be non-zero".to_string()),
        Ok(port) => Ok(port),
        Err(_) => Err(format!("'{raw}' is not a valid port")),
    }
}

fn validate_host_name(host: &str) -> Result<String, String> {
    if host.is_empty() {
        return Err("host is empty".to_string());
    }
    if host.len() > 253 {
        return Err("host name is longer than 253 characters".to_string());
    }

    let labels: Vec<&str> = host.split('.').collect();
    if let Some(bad) = labels.iter().find(|label| !HOST_LABEL.is_match(label)) {
        return Err(format!("'{bad}' is not a valid host label"));
    }

    // 300.1.1.1 passes the label check but is a broken IPv4 literal
    if labels
        .iter()
        .all(|label| label.chars().all(|c| c.is_ascii_digit()))
    {
        return Err("not a valid IPv4 address".to_string());
    }

    Ok(host.to_string())
}

// ============================================================================
// Nodes and groups
// ============================================================================

/// Resource allocation for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory in megabytes
    pub memory_mb: u64,
    /// Virtual CPUs, if specified
    pub cpus: Option<u32>,
}

/// A managed machine in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub address: Address,
    pub resources: Resources,
    /// Direct group memberships (declared on the node or via a group's member list)
    pub groups: BTreeSet<String>,
}

impl Node {
    /// Whether the node is a direct member of `group`
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Definition of a group: either a literal node list or a list of child groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSpec {
    Members(BTreeSet<String>),
    Children(BTreeSet<String>),
}

impl GroupSpec {
    pub fn is_children(&self) -> bool {
        matches!(self, Self::Children(_))
    }
}

// ============================================================================
// Declarative input
// ============================================================================

/// A node as written in the topology file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Host name or IP, optionally with `:port`
    pub address: String,
    /// Memory in megabytes
    pub memory_mb: u64,
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Groups the node belongs to directly
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A group entry as written in the topology file
///
/// Accepts a bare list (node names, or child groups when the key ends in
/// `:children`) or an explicit table with `members` or `children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupEntry {
    List(Vec<String>),
    Table {
        #[serde(default)]
        members: Option<Vec<String>>,
        #[serde(default)]
        children: Option<Vec<String>>,
    },
}

/// Raw topology input, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySpec {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_host_and_port() {
        let a = addr("zk1.cluster.local:2181");
        assert_eq!(a.host, Host::Name("zk1.cluster.local".to_string()));
        assert_eq!(a.port, Some(2181));
        assert_eq!(a.to_string(), "zk1.cluster.local:2181");
    }

    #[test]
    fn test_parse_ip_forms() {
        assert_eq!(addr("10.4.4.10").port, None);
        assert_eq!(addr("10.4.4.10:22").port, Some(22));
        assert!(matches!(addr("::1").host, Host::Ip(IpAddr::V6(_))));
        let v6 = addr("[fe80::1]:5051");
        assert_eq!(v6.port, Some(5051));
        assert_eq!(v6.to_string(), "[fe80::1]:5051");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "   ",
            "host:",
            "host:0",
            "host:70000",
            "bad_host",
            "-leading.example",
            "300.1.1.1",
            "fe80::1:22:x",
            "[::1",
            "[::1]x",
            "a..b",
        ] {
            assert!(bad.parse::<Address>().is_err(), "expected '{bad}' to fail");
        }
    }

    #[test]
    fn test_normalized_lowercases_names() {
        assert_eq!(addr("Master.Local:22").normalized(), "master.local:22");
    }

    #[test]
    fn test_group_entry_deserialize() {
        let toml_src = r#"
            plain = ["node1", "node2"]
            "cluster:children" = ["plain"]
            explicit = { children = ["plain"] }
            listed = { members = ["node3"] }
        "#;
        let groups: BTreeMap<String, GroupEntry> = toml::from_str(toml_src).unwrap();
        assert_eq!(
            groups["plain"],
            GroupEntry::List(vec!["node1".into(), "node2".into()])
        );
        assert_eq!(
            groups["explicit"],
            GroupEntry::Table {
                members: None,
                children: Some(vec!["plain".into()])
            }
        );
        assert!(matches!(groups["listed"], GroupEntry::Table { members: Some(_), .. }));
    }
}
