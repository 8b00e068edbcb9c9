//! Command backend - runs role command templates through a shell
//!
//! Templates may reference `{node}`, `{address}`, `{host}`, `{role}`,
//! `{memory_mb}`, `{action}` and `{param.KEY}`. Exit status 0 is success.
//! The child is killed once the action's timeout passes.

use anyhow::{Context, Result, bail};
use converge::{Action, ActionKind, Backend};
use inventory::Inventory;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::CommandTemplates;

/// Default shell for command templates
pub const DEFAULT_SHELL: &str = "sh";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lines of stderr kept for error messages
const STDERR_TAIL: usize = 5;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_.-]+)?)\}")
        .expect("valid placeholder regex")
});

/// Template rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("parameter '{0}' is not set for this role")]
    MissingParam(String),
}

/// Node facts available to templates beyond what the action carries
#[derive(Debug, Clone)]
struct NodeFacts {
    host: String,
    memory_mb: u64,
}

/// Values a template is rendered with
#[derive(Debug)]
pub struct TemplateVars<'a> {
    pub action: &'a Action,
    pub host: &'a str,
    pub memory_mb: u64,
}

/// Substitute placeholders in `template`
pub fn render(template: &str, vars: &TemplateVars<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        // `${VAR}` belongs to the shell
        if template[..whole.start()].ends_with('$') {
            out.push_str(whole.as_str());
            continue;
        }

        let name = name.as_str();
        let value = match name {
            "node" => vars.action.node.clone(),
            "address" => vars.action.address.clone(),
            "host" => vars.host.to_string(),
            "role" => vars.action.role.clone(),
            "memory_mb" => vars.memory_mb.to_string(),
            "action" => vars.action.kind.to_string(),
            _ => match name.strip_prefix("param.") {
                Some(key) => vars
                    .action
                    .params
                    .get(key)
                    .cloned()
                    .ok_or_else(|| TemplateError::MissingParam(key.to_string()))?,
                None => return Err(TemplateError::UnknownPlaceholder(name.to_string())),
            },
        };
        out.push_str(&value);
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Backend that shells out to per-role command templates
#[derive(Debug, Clone)]
pub struct CommandBackend {
    shell: String,
    templates: BTreeMap<String, CommandTemplates>,
    defaults: CommandTemplates,
    nodes: BTreeMap<String, NodeFacts>,
}

impl CommandBackend {
    pub fn new(
        inventory: &Inventory,
        templates: BTreeMap<String, CommandTemplates>,
        defaults: CommandTemplates,
        shell: Option<&str>,
    ) -> Self {
        let nodes = inventory
            .nodes()
            .map(|node| {
                let facts = NodeFacts {
                    host: node.address.host.to_string(),
                    memory_mb: node.resources.memory_mb,
                };
                (node.name.clone(), facts)
            })
            .collect();

        Self {
            shell: shell.unwrap_or(DEFAULT_SHELL).to_string(),
            templates,
            defaults,
            nodes,
        }
    }

    fn template_for(&self, action: &Action, kind: ActionKind) -> Option<&str> {
        fn field(templates: &CommandTemplates, kind: ActionKind) -> Option<&str> {
            match kind {
                ActionKind::Stop => templates.stop.as_deref(),
                ActionKind::Reconfigure => templates.reconfigure.as_deref(),
                ActionKind::Start | ActionKind::Restart => templates.start.as_deref(),
            }
        }

        self.templates
            .get(&action.role)
            .and_then(|t| field(t, kind))
            .or_else(|| field(&self.defaults, kind))
    }

    /// Render the command for `kind` of `action`
    pub fn command_for(&self, action: &Action, kind: ActionKind) -> Result<String> {
        let template = self.template_for(action, kind).with_context(|| {
            format!("role '{}' has no {kind} command configured", action.role)
        })?;

        let facts = self.nodes.get(&action.node);
        let vars = TemplateVars {
            action,
            host: facts.map_or(action.address.as_str(), |f| f.host.as_str()),
            memory_mb: facts.map_or(0, |f| f.memory_mb),
        };

        render(template, &vars)
            .with_context(|| format!("cannot render {kind} command for role '{}'", action.role))
    }

    fn run(&self, action: &Action, kind: ActionKind) -> Result<()> {
        let command = self.command_for(action, kind)?;
        log::debug!("[{}] {} -c {command}", action.id, self.shell);

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .env("CONVOY_NODE", &action.node)
            .env("CONVOY_ROLE", &action.role)
            .env("CONVOY_ADDRESS", &action.address)
            .env("CONVOY_ACTION", kind.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute: {} -c {command}", self.shell))?;

        wait_with_deadline(child, action.timeout, &action.id)
    }
}

impl Backend for CommandBackend {
    fn start(&self, action: &Action) -> Result<()> {
        self.run(action, ActionKind::Start)
    }

    fn stop(&self, action: &Action) -> Result<()> {
        self.run(action, ActionKind::Stop)
    }

    fn reconfigure(&self, action: &Action) -> Result<()> {
        self.run(action, ActionKind::Reconfigure)
    }
}

/// Wait for `child`, killing it when `timeout` passes
fn wait_with_deadline(mut child: Child, timeout: Duration, id: &str) -> Result<()> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait().context("Failed to poll child process")? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                log::warn!("[{id}] could not kill timed-out command: {e}");
            }
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // Grandchildren may still hold the pipes open; don't wait on the readers
    let Some(status) = status else {
        bail!("command killed after {}s", timeout.as_secs_f32());
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    for line in stdout.lines() {
        log::debug!("[{id}] {line}");
    }

    if !status.success() {
        let tail = tail_lines(&stderr, STDERR_TAIL);
        match status.code() {
            Some(code) if tail.is_empty() => bail!("command exited with status {code}"),
            Some(code) => bail!("command exited with status {code}: {tail}"),
            None => bail!("command terminated by signal"),
        }
    }
    Ok(())
}

/// Read a pipe to the end on a helper thread so the child never blocks on it
fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use converge::Params;
    use inventory::InventorySpec;

    fn action(kind: ActionKind, timeout: Duration) -> Action {
        Action {
            id: Action::make_id(kind, "zookeeper", "master"),
            node: "master".into(),
            address: "zk1.cluster.local:2181".into(),
            role: "zookeeper".into(),
            kind,
            params: Params::from([("port".to_string(), "2181".to_string())]),
            depends_on: Vec::new(),
            timeout,
        }
    }

    fn inventory() -> Inventory {
        let spec: InventorySpec = serde_json::from_str(
            r#"{ "nodes": { "master": { "address": "zk1.cluster.local:2181", "memory_mb": 2048 } } }"#,
        )
        .unwrap();
        Inventory::from_spec(&spec).unwrap()
    }

    fn backend(start: &str) -> CommandBackend {
        let templates = BTreeMap::from([(
            "zookeeper".to_string(),
            CommandTemplates {
                start: Some(start.to_string()),
                ..Default::default()
            },
        )]);
        let defaults = CommandTemplates {
            stop: Some("echo stop {role}".to_string()),
            ..Default::default()
        };
        CommandBackend::new(&inventory(), templates, defaults, None)
    }

    #[test]
    fn test_render_all_placeholders() {
        let a = action(ActionKind::Start, Duration::from_secs(1));
        let vars = TemplateVars {
            action: &a,
            host: "zk1.cluster.local",
            memory_mb: 2048,
        };
        let out = render(
            "{action} {role} on {node} at {host} ({address}) mem={memory_mb} port={param.port}",
            &vars,
        )
        .unwrap();
        assert_eq!(
            out,
            "start zookeeper on master at zk1.cluster.local (zk1.cluster.local:2181) mem=2048 port=2181"
        );
    }

    #[test]
    fn test_render_errors() {
        let a = action(ActionKind::Start, Duration::from_secs(1));
        let vars = TemplateVars {
            action: &a,
            host: "h",
            memory_mb: 1,
        };
        assert_eq!(
            render("{nope}", &vars),
            Err(TemplateError::UnknownPlaceholder("nope".into()))
        );
        assert_eq!(
            render("{param.heap}", &vars),
            Err(TemplateError::MissingParam("heap".into()))
        );
        assert_eq!(render("${HOME} {}", &vars).unwrap(), "${HOME} {}");
    }

    #[test]
    fn test_template_fallback_and_missing() {
        let backend = backend("echo start");
        let a = action(ActionKind::Stop, Duration::from_secs(1));

        assert_eq!(
            backend.command_for(&a, ActionKind::Stop).unwrap(),
            "echo stop zookeeper"
        );
        let err = backend
            .command_for(&a, ActionKind::Reconfigure)
            .unwrap_err();
        assert!(err.to_string().contains("no reconfigure command"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_success_and_failure() {
        let a = action(ActionKind::Start, Duration::from_secs(5));
        assert!(backend("test {param.port} = 2181").start(&a).is_ok());

        let err = backend("echo broken >&2; exit 3").start(&a).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("broken"), "{msg}");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_kills_at_deadline() {
        let a = action(ActionKind::Start, Duration::from_millis(200));
        let started = Instant::now();
        let err = backend("sleep 5").start(&a).unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.to_string().contains("killed"));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\n\nb\nc\n", 2), "b | c");
        assert_eq!(tail_lines("", 3), "");
    }
}
