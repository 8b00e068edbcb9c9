//! Current-state snapshot persistence
//!
//! The snapshot records which roles each node runs. It lives in
//! `<state dir>/state.toml` unless an explicit file is given; `.json`
//! snapshots are accepted too.

use anyhow::{Context, Result};
use chrono::Utc;
use converge::Snapshot;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigFormat;
use crate::paths;

/// A snapshot bound to the file it is read from and written to
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Use `explicit` if given, else the default state file
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => paths::snapshot_file()?,
        };
        Ok(Self::at(path))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or an empty one if the file doesn't exist
    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            log::debug!(
                "Snapshot {} does not exist, assuming nothing is running",
                self.path.display()
            );
            return Ok(Snapshot::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let snapshot: Snapshot = ConfigFormat::from_path(&self.path)
            .parse(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", self.path.display()))?;

        log::debug!("Loaded snapshot from {}", self.path.display());
        Ok(snapshot)
    }

    /// Save the snapshot, stamping `updated_at`
    pub fn save(&self, snapshot: &mut Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        snapshot.updated_at = Some(Utc::now());
        let content = ConfigFormat::from_path(&self.path).render(snapshot)?;

        // Replace atomically: write a sibling file, then rename over
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &content)
            .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace snapshot: {}", self.path.display()))?;

        log::debug!("Saved snapshot to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Params, RoleStatus};

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.set(
            "master",
            "zookeeper",
            RoleStatus::Running {
                params: Params::from([("port".to_string(), "2181".to_string())]),
            },
        );
        snapshot.set(
            "slave1",
            "worker",
            RoleStatus::Failed {
                error: "exit status 3".into(),
            },
        );
        snapshot
    }

    #[test]
    fn test_missing_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path().join("state.toml"));
        assert_eq!(store.load().unwrap(), Snapshot::new());
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path().join("nested").join("state.toml"));

        let mut snapshot = sample();
        store.save(&mut snapshot).unwrap();
        assert!(snapshot.updated_at.is_some());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!dir.path().join("nested").join("state.tmp").exists());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(dir.path().join("state.json"));

        let mut snapshot = sample();
        store.save(&mut snapshot).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"status\": \"failed\""));
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "nodes = 3").unwrap();

        let err = SnapshotStore::at(&path).load().unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse snapshot"));
    }
}
