//! Centralized path resolution for convoy
//!
//! # Environment Variables
//!
//! - `CONVOY_CONFIG_DIR` - Override config directory (where `convoy.toml` lives)
//! - `CONVOY_STATE_DIR` - Override state directory (snapshot and result log)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `CONVOY_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/convoy` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\convoy`
//!    - macOS/Linux: `~/.config/convoy`
//!
//! For state_dir():
//! 1. `CONVOY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/convoy` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\convoy`
//!    - macOS/Linux: `~/.local/state/convoy`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "CONVOY_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CONVOY_STATE_DIR";

/// Base name of the topology file (`convoy.toml` or `convoy.json`)
pub const CONFIG_NAME: &str = "convoy";

/// Snapshot file inside the state directory
pub const SNAPSHOT_FILE: &str = "state.toml";

/// Result log inside the state directory
pub const RESULTS_FILE: &str = "results.jsonl";

/// Get the convoy config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("convoy");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("convoy");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("convoy");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the convoy state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("convoy");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("convoy");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("convoy");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default snapshot location
pub fn snapshot_file() -> Result<PathBuf> {
    Ok(state_dir()?.join(SNAPSHOT_FILE))
}

/// Default result log location
pub fn results_file() -> Result<PathBuf> {
    Ok(state_dir()?.join(RESULTS_FILE))
}

/// Result log for a run: next to an explicit snapshot, else in the state dir
pub fn results_file_for(snapshot: Option<&Path>) -> Result<PathBuf> {
    match snapshot.and_then(Path::parent) {
        Some(dir) => Ok(dir.join(RESULTS_FILE)),
        None => results_file(),
    }
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as-is.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Helper to run a test with temporary env var
    pub(crate) fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let original = env::var(key).ok();
        // SAFETY: env access is serialized by ENV_LOCK
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: env access is serialized by ENV_LOCK
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    /// Helper to run a test with env vars removed
    fn without_env_vars<F, R>(keys: &[&str], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let originals: Vec<_> = keys.iter().map(|k| (*k, env::var(k).ok())).collect();
        for key in keys {
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe { env::remove_var(key) };
        }
        let result = f();
        for (key, value) in originals {
            if let Some(v) = value {
                // SAFETY: env access is serialized by ENV_LOCK
                unsafe { env::set_var(key, v) };
            }
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/config/path", || {
            let result = config_dir().unwrap();
            assert_eq!(result, PathBuf::from("/custom/config/path"));
        });
    }

    #[test]
    fn test_config_dir_env_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        let expected = home.join("dotfiles").join("convoy-tilde-test");
        with_env_var(ENV_CONFIG_DIR, "~/dotfiles/convoy-tilde-test", || {
            let result = config_dir().unwrap();
            assert_eq!(result, expected);
        });
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
            assert_eq!(
                snapshot_file().unwrap(),
                PathBuf::from("/custom/state/path/state.toml")
            );
            assert_eq!(
                results_file().unwrap(),
                PathBuf::from("/custom/state/path/results.jsonl")
            );
        });
    }

    #[test]
    fn test_results_file_next_to_snapshot() {
        let result = results_file_for(Some(Path::new("/srv/cluster/state.toml"))).unwrap();
        assert_eq!(result, PathBuf::from("/srv/cluster/results.jsonl"));

        let bare = results_file_for(Some(Path::new("state.toml"))).unwrap();
        assert_eq!(bare, PathBuf::from("results.jsonl"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        without_env_vars(&[ENV_STATE_DIR, "XDG_STATE_HOME"], || {
            let result = state_dir().unwrap();
            let home = dirs::home_dir().unwrap();
            assert_eq!(result, home.join(".local").join("state").join("convoy"));
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_default_config_dir_unix() {
        without_env_vars(&[ENV_CONFIG_DIR, "XDG_CONFIG_HOME"], || {
            let result = config_dir().unwrap();
            let home = dirs::home_dir().unwrap();
            assert_eq!(result, home.join(".config").join("convoy"));
        });
    }
}
