//! repo::lock
//!
//! Index-lock self-healing.
//!
//! A crashed engine process leaves `index.lock` (or `shallow.lock`)
//! behind, permanently wedging the repository. Before any mutating
//! call, the handle probes the artifact: if no process is holding it
//! and it is old enough to rule out a racing invocation, it is removed.
//!
//! The "is anyone holding this" probe is best-effort: an
//! exclusive OS lock attempt via `fs2` plus an age threshold. It is not
//! a mutex; concurrent invocations against the same working copy from
//! two processes are not guaranteed safe (see the concurrency model).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use crate::core::paths::WorkingCopyPaths;

/// Minimum age before a lock artifact is considered stale. A live
/// invocation creates and releases its lock well inside this window.
const STALE_AGE: Duration = Duration::from_secs(3);

/// Remove stale engine lock artifacts, returning the paths removed.
///
/// Errors from the probe itself are swallowed: a lock we cannot probe
/// is a lock we leave alone. The alternative to this routine is a
/// permanently stuck repository, so false negatives (leaving a stale
/// lock in place) are acceptable and false positives are ruled out by
/// the exclusive-lock attempt.
pub fn heal_stale_locks(paths: &WorkingCopyPaths) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for candidate in [
        paths.index_lock(),
        paths.shallow_lock(),
        paths.sparse_checkout_lock(),
    ] {
        if probe_and_remove(&candidate) {
            tracing::warn!("removed stale engine lock: {}", candidate.display());
            removed.push(candidate);
        }
    }
    removed
}

/// Probe one lock artifact; remove it iff it exists, nothing holds it,
/// and it is older than [`STALE_AGE`].
fn probe_and_remove(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false; // absent, nothing to heal
    };

    let age = metadata
        .modified()
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
    match age {
        Some(age) if age >= STALE_AGE => {}
        _ => return false, // too fresh, or clock skew: leave it
    }

    // If another process has the file open with a lock, this fails and
    // the artifact is left for its owner.
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    if file.try_lock_exclusive().is_err() {
        return false;
    }
    let _ = file.unlock();
    drop(file);

    std::fs::remove_file(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn paths_in(dir: &TempDir) -> WorkingCopyPaths {
        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        WorkingCopyPaths::new(dir.path().to_path_buf(), git_dir)
    }

    /// Push a file's mtime past the stale threshold.
    fn backdate(path: &Path) {
        let old = SystemTime::now() - Duration::from_secs(60);
        let file = OpenOptions::new().write(true).open(path).unwrap();
        let times = std::fs::FileTimes::new().set_modified(old);
        file.set_times(times).unwrap();
    }

    #[test]
    fn absent_lock_is_noop() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        assert!(heal_stale_locks(&paths).is_empty());
    }

    #[test]
    fn old_unheld_lock_is_removed() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        let lock = paths.index_lock();
        std::fs::write(&lock, "").unwrap();
        backdate(&lock);

        let removed = heal_stale_locks(&paths);
        assert_eq!(removed, vec![lock.clone()]);
        assert!(!lock.exists());
    }

    #[test]
    fn fresh_lock_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        let lock = paths.index_lock();
        std::fs::write(&lock, "").unwrap();

        assert!(heal_stale_locks(&paths).is_empty());
        assert!(lock.exists());
    }

    #[test]
    fn held_lock_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        let lock = paths.index_lock();
        std::fs::write(&lock, "").unwrap();
        backdate(&lock);

        let holder = OpenOptions::new().read(true).write(true).open(&lock).unwrap();
        holder.try_lock_exclusive().unwrap();

        assert!(heal_stale_locks(&paths).is_empty());
        assert!(lock.exists());

        let _ = holder.unlock();
    }

    #[test]
    fn both_artifacts_healed() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        for lock in [paths.index_lock(), paths.shallow_lock()] {
            std::fs::write(&lock, "").unwrap();
            backdate(&lock);
        }

        let removed: Vec<PathBuf> = heal_stale_locks(&paths);
        assert_eq!(removed.len(), 2);
    }
}
