//! Engine-facing sparse materialization.
//!
//! Drives `sparse-checkout` and the large-file helper around the pure
//! root-set algebra. Ordering rule: content for newly materialized
//! folders is fetched before the definition widens, and eviction of
//! no-longer-needed content happens only after the definition narrows,
//! so a materialized file never exists without its content.

use thiserror::Error;

use crate::process::bridge::{CancelToken, StreamLine};
use crate::repo::{RepoError, Repository};
use crate::sparse::set::SparseRootSet;

/// Shared settings key naming the always-materialized bookkeeping
/// folder.
pub const BOOKKEEPING_ROOT_KEY: &str = "sparse.bookkeeping-root";

/// Default bookkeeping folder when the shared settings carry none.
pub const DEFAULT_BOOKKEEPING_ROOT: &str = ".project";

/// Errors from sparse materialization.
#[derive(Debug, Error)]
pub enum SparseError {
    /// The folder (or a descendant) has uncommitted changes; unloading
    /// would lose them.
    #[error("'{folder}' has uncommitted changes; commit or discard them before unloading")]
    PendingChanges {
        /// The folder that was refused.
        folder: String,
    },

    /// Unloading would leave no materialized root.
    #[error("cannot unload '{folder}': it is the last materialized root")]
    LastRoot {
        /// The folder that was refused.
        folder: String,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Sparse checkout manager bound to one repository handle.
pub struct SparseManager<'a> {
    repo: &'a Repository,
    bookkeeping_root: String,
}

impl<'a> SparseManager<'a> {
    /// Create a manager; the bookkeeping root comes from the shared
    /// settings ([`BOOKKEEPING_ROOT_KEY`], default
    /// [`DEFAULT_BOOKKEEPING_ROOT`]).
    pub fn new(repo: &'a Repository, bookkeeping_root: impl Into<String>) -> Self {
        Self {
            repo,
            bookkeeping_root: bookkeeping_root.into(),
        }
    }

    /// Whether the working copy is in sparse mode at all.
    pub fn is_sparse(&self) -> Result<bool, SparseError> {
        let out = self
            .repo
            .engine()
            .run_unchecked(
                &["config", "--bool", "core.sparseCheckout"],
                self.repo.work_dir(),
            )
            .map_err(RepoError::from)?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    /// The current root set. A non-sparse working copy reports every
    /// top-level folder as a root (fully materialized).
    pub fn roots(&self) -> Result<SparseRootSet, SparseError> {
        if !self.is_sparse()? {
            return Ok(SparseRootSet::from_roots(self.top_level_folders()?));
        }
        let out = self
            .repo
            .engine()
            .run(&["sparse-checkout", "list"], self.repo.work_dir())
            .map_err(RepoError::from)?;
        Ok(SparseRootSet::from_roots(
            out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()),
        ))
    }

    /// Top-level folders of HEAD.
    pub fn top_level_folders(&self) -> Result<Vec<String>, SparseError> {
        self.folders_under(None)
    }

    fn folders_under(&self, parent: Option<&str>) -> Result<Vec<String>, SparseError> {
        let mut args = vec!["ls-tree", "-d", "--name-only", "HEAD"];
        let scoped;
        if let Some(parent) = parent {
            scoped = format!("{}/", parent.trim_end_matches('/'));
            args.push(&scoped);
        }
        let out = self
            .repo
            .engine()
            .run_unchecked(&args, self.repo.work_dir())
            .map_err(RepoError::from)?;
        if !out.success() {
            // Unborn HEAD has no tree to walk.
            return Ok(Vec::new());
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Materialize `folder`, fetching its large-file content first.
    ///
    /// If the resulting root set covers every top-level folder, sparse
    /// mode is disabled outright instead of keeping an equivalent but
    /// inefficient explicit list.
    pub fn load_folder(
        &self,
        folder: &str,
        on_line: &mut dyn FnMut(&StreamLine),
        cancel: &CancelToken,
    ) -> Result<(), SparseError> {
        let mut next = self.roots()?;
        if !next.add(folder) && next.covers(folder) {
            return Ok(());
        }

        self.fetch_lfs_content(folder, on_line, cancel)?;

        self.repo.remove_stale_locks();
        if next.covers_all(&self.top_level_folders()?) {
            self.repo
                .engine()
                .run(&["sparse-checkout", "disable"], self.repo.work_dir())
                .map_err(RepoError::from)?;
            tracing::info!("root set now covers everything; sparse mode disabled");
            return Ok(());
        }
        self.apply_roots(&next)
    }

    /// Dematerialize `folder`'s subtree.
    ///
    /// Refused when the subtree has pending changes or when unloading
    /// would leave no root. Unloading an already-unloaded folder is a
    /// no-op, never an error.
    pub fn unload_folder(&self, folder: &str) -> Result<SparseRootSet, SparseError> {
        let current = self.roots()?;

        let scan = self.repo.status_scan().map_err(SparseError::Repo)?;
        let dirty = scan.changes(true).touches_prefix(folder)
            || scan.changes(false).touches_prefix(folder)
            || !self.repo.conflicts(Some(folder))?.is_empty();
        if dirty {
            return Err(SparseError::PendingChanges {
                folder: folder.to_string(),
            });
        }

        let mut walk_error: Option<SparseError> = None;
        let mut children = |parent: Option<&str>| -> Vec<String> {
            match self.folders_under(parent) {
                Ok(folders) => folders,
                Err(err) => {
                    walk_error.get_or_insert(err);
                    Vec::new()
                }
            }
        };
        let mut next = current.unload(folder, &mut children);
        if let Some(err) = walk_error {
            return Err(err);
        }

        // The bookkeeping folder is implicitly included and never
        // removable; a root set without any content root is refused.
        let bookkeeping_gone = !next.covers(&self.bookkeeping_root)
            && current.covers(&self.bookkeeping_root);
        let no_content_root = next.roots().all(|r| r == self.bookkeeping_root);
        if bookkeeping_gone || no_content_root {
            return Err(SparseError::LastRoot {
                folder: folder.to_string(),
            });
        }

        next.add(&self.bookkeeping_root);
        if next == current {
            return Ok(next);
        }

        self.repo.remove_stale_locks();
        self.apply_roots(&next)?;
        self.evict_unneeded_content();
        Ok(next)
    }

    fn apply_roots(&self, set: &SparseRootSet) -> Result<(), SparseError> {
        let mut args = vec!["sparse-checkout", "set", "--cone", "--"];
        args.extend(set.roots());
        self.repo
            .engine()
            .run(&args, self.repo.work_dir())
            .map_err(RepoError::from)?;
        Ok(())
    }

    /// Fetch large-file content for a folder before it materializes.
    fn fetch_lfs_content(
        &self,
        folder: &str,
        on_line: &mut dyn FnMut(&StreamLine),
        cancel: &CancelToken,
    ) -> Result<(), SparseError> {
        if !self.repo.uses_lfs() {
            return Ok(());
        }
        let Some(remote) = self.repo.default_remote()? else {
            return Ok(()); // nothing to fetch from
        };
        let include = format!("{}/**", folder.trim_end_matches('/'));
        self.repo
            .engine()
            .run_streaming(
                &["lfs", "fetch", &remote, "--include", &include],
                self.repo.work_dir(),
                on_line,
                cancel,
            )
            .map_err(RepoError::from)?;
        Ok(())
    }

    /// Let the local object cache drop content the narrowed tree no
    /// longer references. Best-effort; a failed prune only costs disk.
    fn evict_unneeded_content(&self) {
        if !self.repo.uses_lfs() {
            return;
        }
        let result = self
            .repo
            .engine()
            .run_unchecked(&["lfs", "prune"], self.repo.work_dir());
        match result {
            Ok(out) if !out.success() => {
                tracing::warn!("large-object prune failed: {}", out.stderr.trim());
            }
            Err(err) => tracing::warn!("large-object prune failed: {err}"),
            _ => {}
        }
    }
}
