//! host
//!
//! Interfaces to the embedding application.
//!
//! The sync layer never assumes a UI exists: progress, background
//! execution, file locking, settings, and the activity feed are all
//! reached through these traits, and every one has a headless
//! implementation so the layer is fully usable from tests and scripts.

pub mod state;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::repo::{HistoryEntry, MergeCaption};

pub use state::{StateError, StateStore};

/// Receives progress from long-running operations.
///
/// `set_fraction(None)` means indeterminate. The `is_canceled` poll is
/// the only cancellation channel; it is consulted at progress-line
/// granularity during transfer phases.
pub trait ProgressSink {
    fn set_text(&self, text: &str);
    fn set_fraction(&self, fraction: Option<f64>);
    fn is_canceled(&self) -> bool;
}

/// Headless sink: swallows progress, never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_text(&self, _text: &str) {}
    fn set_fraction(&self, _fraction: Option<f64>) {}
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Fire-and-forget background execution provided by the host.
pub trait TaskRunner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs tasks synchronously on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

impl TaskRunner for InlineRunner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// Identity of a lock holder in the team's lock directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Display name of the holding user.
    pub user: String,
    /// Whether the holder is the local user.
    pub is_self: bool,
}

/// A lock is keyed by path and branch together: the same path may be
/// locked independently on two branches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Repository-relative path.
    pub path: String,
    /// Branch the lock applies to.
    pub branch: String,
}

/// The team's exclusive-hold directory for binary assets.
pub trait LockDirectory {
    /// Who holds `path` exclusively, if anyone.
    fn holder_of(&self, path: &str) -> Option<LockHolder>;
    fn acquire(&self, key: &LockKey) -> bool;
    fn release(&self, key: &LockKey);
}

/// In-memory directory for headless use.
#[derive(Debug, Default)]
pub struct MemoryLockDirectory {
    held: Mutex<HashMap<LockKey, LockHolder>>,
}

impl MemoryLockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a path as held, as the given user.
    pub fn insert(&self, key: LockKey, holder: LockHolder) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(key, holder);
        }
    }
}

impl LockDirectory for MemoryLockDirectory {
    fn holder_of(&self, path: &str) -> Option<LockHolder> {
        let held = self.held.lock().ok()?;
        held.iter()
            .find(|(key, _)| key.path == path)
            .map(|(_, holder)| holder.clone())
    }

    fn acquire(&self, key: &LockKey) -> bool {
        let Ok(mut held) = self.held.lock() else {
            return false;
        };
        if held.contains_key(key) {
            return false;
        }
        held.insert(
            key.clone(),
            LockHolder {
                user: String::new(),
                is_self: true,
            },
        );
        true
    }

    fn release(&self, key: &LockKey) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(key);
        }
    }
}

/// Settings, split into a per-user-local scope and a scope shared with
/// the whole team (checked in alongside the project).
pub trait SettingsStore {
    fn get_local(&self, key: &str) -> Option<serde_json::Value>;
    fn set_local(&self, key: &str, value: serde_json::Value);
    fn get_shared(&self, key: &str) -> Option<serde_json::Value>;
    fn set_shared(&self, key: &str, value: serde_json::Value);
}

/// In-memory settings for headless use.
#[derive(Debug, Default)]
pub struct MemorySettings {
    local: Mutex<HashMap<String, serde_json::Value>>,
    shared: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_local(&self, key: &str) -> Option<serde_json::Value> {
        self.local.lock().ok()?.get(key).cloned()
    }

    fn set_local(&self, key: &str, value: serde_json::Value) {
        if let Ok(mut local) = self.local.lock() {
            local.insert(key.to_string(), value);
        }
    }

    fn get_shared(&self, key: &str) -> Option<serde_json::Value> {
        self.shared.lock().ok()?.get(key).cloned()
    }

    fn set_shared(&self, key: &str, value: serde_json::Value) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.insert(key.to_string(), value);
        }
    }
}

/// One event of the project activity feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    /// The underlying history entry.
    pub entry: HistoryEntry,
    /// Synthesized caption for merge commits; `None` for ordinary
    /// commits (the raw subject is shown instead).
    pub caption: Option<MergeCaption>,
}

/// Receives mapped history for the host's activity feed.
pub trait TimelineSink {
    fn publish(&self, events: Vec<TimelineEvent>);
}

/// Map history entries to timeline events, synthesizing merge
/// captions from the engine's auto-generated merge subjects.
pub fn map_timeline(entries: Vec<HistoryEntry>) -> Vec<TimelineEvent> {
    entries
        .into_iter()
        .map(|entry| {
            let caption = if entry.is_merge() {
                crate::repo::history::parse_merge_caption(&entry.message)
            } else {
                None
            };
            TimelineEvent { entry, caption }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod lock_directory {
        use super::*;

        #[test]
        fn acquire_is_exclusive() {
            let dir = MemoryLockDirectory::new();
            let key = LockKey {
                path: "Assets/hero.fbx".into(),
                branch: "main".into(),
            };
            assert!(dir.acquire(&key));
            assert!(!dir.acquire(&key));
            dir.release(&key);
            assert!(dir.acquire(&key));
        }

        #[test]
        fn same_path_different_branch_locks_independently() {
            let dir = MemoryLockDirectory::new();
            let on_main = LockKey {
                path: "Assets/hero.fbx".into(),
                branch: "main".into(),
            };
            let on_feature = LockKey {
                path: "Assets/hero.fbx".into(),
                branch: "feature".into(),
            };
            assert!(dir.acquire(&on_main));
            assert!(dir.acquire(&on_feature));
        }
    }

    mod settings {
        use super::*;

        #[test]
        fn scopes_are_independent() {
            let settings = MemorySettings::new();
            settings.set_local("policy", serde_json::json!("never"));
            settings.set_shared("policy", serde_json::json!("always"));
            assert_eq!(
                settings.get_local("policy"),
                Some(serde_json::json!("never"))
            );
            assert_eq!(
                settings.get_shared("policy"),
                Some(serde_json::json!("always"))
            );
        }
    }
}
