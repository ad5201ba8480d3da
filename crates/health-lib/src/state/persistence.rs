//! Durable snapshots of the monitor state store
//!
//! Snapshots are written to a temp file, synced and renamed over the target
//! so a crash mid-write leaves the previous snapshot intact. Loading never
//! fails: anything unreadable is logged and treated as an empty store.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::store::{MonitorStateRecord, MonitorStateStore};
use crate::error::PersistenceError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub states: BTreeMap<String, MonitorStateRecord>,
}

impl StateSnapshot {
    pub fn from_store(store: &MonitorStateStore, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            states: store.states().clone(),
        }
    }
}

/// Result of reading the snapshot file
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedState {
    Restored(StateSnapshot),
    /// No usable snapshot; start from an empty store
    Empty,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError {
    let path = path.to_path_buf();
    move |source| PersistenceError::Io { path, source }
}

pub struct StateSerializer {
    path: PathBuf,
}

impl StateSerializer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, store: &MonitorStateStore, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let snapshot = StateSnapshot::from_store(store, now);
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(io_err(&temp_path))?;
        file.write_all(&json).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;

        std::fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))?;

        debug!(path = %self.path.display(), instances = store.len(), "State snapshot saved");
        Ok(())
    }
}

pub struct StateDeserializer {
    path: PathBuf,
}

impl StateDeserializer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> LoadedState {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state snapshot found, starting fresh");
                return LoadedState::Empty;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state snapshot, starting fresh");
                return LoadedState::Empty;
            }
        };

        let snapshot: StateSnapshot = match serde_json::from_slice(&data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt state snapshot, starting fresh");
                return LoadedState::Empty;
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                path = %self.path.display(),
                version = snapshot.version,
                supported = SNAPSHOT_VERSION,
                "Unsupported state snapshot version, starting fresh"
            );
            return LoadedState::Empty;
        }

        info!(
            path = %self.path.display(),
            instances = snapshot.states.len(),
            saved_at = %snapshot.saved_at,
            "Restored state snapshot"
        );
        LoadedState::Restored(snapshot)
    }
}
