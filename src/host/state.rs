//! Persisted local-only state.
//!
//! A small key-value blob under the working copy's metadata directory
//! records, per project, the last fetched commit a notification was
//! already shown for, and per-path forced-unlock timestamps used to
//! avoid re-locking a file the user explicitly unlocked. Everything is
//! explicit load/save; there is no hidden process-lifetime cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::types::Oid;

/// Errors from state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("could not read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Stable key for one project, derived from its working tree path.
pub fn project_key(work_dir: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(work_dir.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct StateBlob {
    /// Last fetched commit already notified about, per project key.
    #[serde(default)]
    last_notified: BTreeMap<String, Oid>,
    /// When the user explicitly unlocked a path, per relative path.
    #[serde(default)]
    forced_unlocks: BTreeMap<String, DateTime<Utc>>,
}

/// Explicit-load, explicit-save store over one state file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    blob: StateBlob,
}

impl StateStore {
    /// Load the store; an absent file yields empty state.
    pub fn load(path: PathBuf) -> Result<Self, StateError> {
        let blob = match std::fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| StateError::Malformed {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StateBlob::default(),
            Err(source) => {
                return Err(StateError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(Self { path, blob })
    }

    /// Write the store back to disk.
    pub fn save(&self) -> Result<(), StateError> {
        let write = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write)?;
        }
        let json = serde_json::to_string_pretty(&self.blob).map_err(|source| {
            StateError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, json).map_err(write)
    }

    /// The last commit a fetch notification was shown for.
    pub fn last_notified(&self, project: &str) -> Option<&Oid> {
        self.blob.last_notified.get(project)
    }

    pub fn set_last_notified(&mut self, project: &str, commit: Oid) {
        self.blob.last_notified.insert(project.to_string(), commit);
    }

    /// When the user explicitly unlocked `path`, if they did.
    pub fn forced_unlock_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.blob.forced_unlocks.get(path).copied()
    }

    pub fn record_forced_unlock(&mut self, path: &str, when: DateTime<Utc>) {
        self.blob.forced_unlocks.insert(path.to_string(), when);
    }

    pub fn clear_forced_unlock(&mut self, path: &str) {
        self.blob.forced_unlocks.remove(path);
    }
}
