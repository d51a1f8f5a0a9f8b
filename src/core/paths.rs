//! core::paths
//!
//! Centralized path routing for working-copy storage locations.
//!
//! All on-disk artifacts Towline reads or writes are computed here:
//! the engine's lock files, the repo-local exclude file, the sparse
//! checkout definition, and Towline's own metadata directory. No code
//! outside this module should compute `.git/...` paths by hand.
//!
//! # Storage layout
//!
//! Towline's own data lives under `<git_dir>/towline/`:
//! - `state.json` - persisted local state (notification and unlock bookkeeping)
//!
//! Everything else under `<git_dir>` belongs to the engine; Towline only
//! touches the lock artifacts it is allowed to self-heal.

use std::path::{Path, PathBuf};

/// Path routing for one working copy.
///
/// # Example
///
/// ```
/// use towline::core::paths::WorkingCopyPaths;
/// use std::path::PathBuf;
///
/// let paths = WorkingCopyPaths::new(
///     PathBuf::from("/project"),
///     PathBuf::from("/project/.git"),
/// );
/// assert_eq!(paths.index_lock(), PathBuf::from("/project/.git/index.lock"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopyPaths {
    /// Root of the materialized working tree.
    pub work_dir: PathBuf,

    /// The `.git` directory for this working copy.
    pub git_dir: PathBuf,
}

impl WorkingCopyPaths {
    /// Create path routing from a working tree root and its git dir.
    pub fn new(work_dir: PathBuf, git_dir: PathBuf) -> Self {
        Self { work_dir, git_dir }
    }

    /// The index lock artifact left behind by a crashed engine process.
    pub fn index_lock(&self) -> PathBuf {
        self.git_dir.join("index.lock")
    }

    /// The shallow lock artifact, second most common crash leftover.
    pub fn shallow_lock(&self) -> PathBuf {
        self.git_dir.join("shallow.lock")
    }

    /// The sparse checkout definition file.
    pub fn sparse_checkout_file(&self) -> PathBuf {
        self.git_dir.join("info").join("sparse-checkout")
    }

    /// Lock artifact guarding the sparse checkout definition.
    pub fn sparse_checkout_lock(&self) -> PathBuf {
        self.git_dir.join("info").join("sparse-checkout.lock")
    }

    /// The repo-local exclude file (ignore rules that are never committed).
    pub fn info_exclude(&self) -> PathBuf {
        self.git_dir.join("info").join("exclude")
    }

    /// The in-progress merge marker.
    pub fn merge_head(&self) -> PathBuf {
        self.git_dir.join("MERGE_HEAD")
    }

    /// Towline's metadata directory.
    pub fn towline_dir(&self) -> PathBuf {
        self.git_dir.join("towline")
    }

    /// The persisted local state blob.
    pub fn state_file(&self) -> PathBuf {
        self.towline_dir().join("state.json")
    }

    /// Resolve a repository-relative path against the working tree root.
    pub fn in_work_dir(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> WorkingCopyPaths {
        WorkingCopyPaths::new(PathBuf::from("/project"), PathBuf::from("/project/.git"))
    }

    #[test]
    fn lock_artifacts() {
        let p = paths();
        assert_eq!(p.index_lock(), PathBuf::from("/project/.git/index.lock"));
        assert_eq!(p.shallow_lock(), PathBuf::from("/project/.git/shallow.lock"));
    }

    #[test]
    fn info_files() {
        let p = paths();
        assert_eq!(
            p.sparse_checkout_file(),
            PathBuf::from("/project/.git/info/sparse-checkout")
        );
        assert_eq!(p.info_exclude(), PathBuf::from("/project/.git/info/exclude"));
    }

    #[test]
    fn towline_storage() {
        let p = paths();
        assert_eq!(
            p.state_file(),
            PathBuf::from("/project/.git/towline/state.json")
        );
    }

    #[test]
    fn work_dir_resolution() {
        let p = paths();
        assert_eq!(
            p.in_work_dir("Assets/Textures"),
            PathBuf::from("/project/Assets/Textures")
        );
    }
}
