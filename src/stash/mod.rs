//! One-shelf-per-branch change parking.
//!
//! Before an update integrates remote work, local pending changes are
//! parked on a shelf; after integration they come back. Each branch
//! owns at most one shelf at a time, identified by a message that
//! encodes the branch name, so shelves survive process restarts and
//! can be found again by scanning the stash list.

use thiserror::Error;

use crate::core::types::BranchName;
use crate::process::BridgeError;
use crate::repo::{RepoError, Repository};

/// Message prefix that marks a shelf as ours and binds it to a branch.
const SHELF_PREFIX: &str = "shelf:";

/// Errors from shelf operations.
#[derive(Debug, Error)]
pub enum ShelfError {
    /// A shelf already exists for this branch; it must be restored or
    /// dropped before a new one can be made.
    #[error("a shelf already exists for branch '{branch}'")]
    AlreadyShelved {
        /// The branch that owns the existing shelf.
        branch: BranchName,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A shelf found in the stash list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shelf {
    /// Stash reference (`stash@{2}`).
    pub reference: String,
    /// The branch this shelf belongs to.
    pub branch: BranchName,
}

/// Result of a restore attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The shelf applied cleanly and was dropped.
    Applied,
    /// No shelf existed for the branch.
    NothingToRestore,
    /// Applying produced conflicts; the shelf is kept so nothing is
    /// lost, and the conflicted paths need resolution.
    Conflicted {
        /// Paths left in conflict by the apply.
        paths: Vec<String>,
    },
}

/// Shelf manager bound to one repository handle.
pub struct ShelfManager<'a> {
    repo: &'a Repository,
}

impl<'a> ShelfManager<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    fn shelf_message(branch: &BranchName) -> String {
        format!("{}{}", SHELF_PREFIX, branch)
    }

    /// List all shelves, newest first.
    pub fn list(&self) -> Result<Vec<Shelf>, ShelfError> {
        let out = self
            .repo
            .engine()
            .run(&["stash", "list", "--format=%gd\u{1f}%gs"], self.repo.work_dir())
            .map_err(RepoError::from)?;

        let mut shelves = Vec::new();
        for line in out.stdout.lines() {
            let Some((reference, subject)) = line.split_once('\u{1f}') else {
                continue;
            };
            // Stash subjects look like "On main: shelf:main" or
            // "WIP on main: <oid> <subject>"; only ours carry the
            // shelf marker after the colon.
            let Some((_, message)) = subject.split_once(": ") else {
                continue;
            };
            let Some(branch_name) = message.strip_prefix(SHELF_PREFIX) else {
                continue;
            };
            let Ok(branch) = BranchName::new(branch_name.trim()) else {
                continue;
            };
            shelves.push(Shelf {
                reference: reference.to_string(),
                branch,
            });
        }
        Ok(shelves)
    }

    /// The shelf for `branch`, if one exists.
    pub fn find(&self, branch: &BranchName) -> Result<Option<Shelf>, ShelfError> {
        Ok(self.list()?.into_iter().find(|s| &s.branch == branch))
    }

    /// Park all pending changes on a new shelf for `branch`;
    /// `include_untracked` parks loose files too.
    ///
    /// Returns `false` when there was nothing to shelve (which
    /// includes only-untracked trees shelved without the flag).
    ///
    /// # Errors
    ///
    /// - [`ShelfError::AlreadyShelved`] when the branch already has a
    ///   shelf. Stacking shelves would make restore order ambiguous,
    ///   so the existing one must be dealt with first.
    pub fn shelve(&self, branch: &BranchName, include_untracked: bool) -> Result<bool, ShelfError> {
        if self.find(branch)?.is_some() {
            return Err(ShelfError::AlreadyShelved {
                branch: branch.clone(),
            });
        }
        if !self.repo.has_pending_changes()? {
            return Ok(false);
        }
        let message = Self::shelf_message(branch);
        let mut args = vec!["stash", "push"];
        if include_untracked {
            args.push("--include-untracked");
        }
        args.push("--message");
        args.push(&message);
        self.repo
            .engine()
            .run(&args, self.repo.work_dir())
            .map_err(RepoError::from)?;
        // "stash push" exits zero without creating anything when the
        // eligible set is empty, so report what actually happened.
        let created = self.find(branch)?.is_some();
        if created {
            tracing::debug!("shelved pending changes for branch {branch}");
        }
        Ok(created)
    }

    /// Bring the shelf for `branch` back into the working copy.
    ///
    /// Files the shelf recreates that already exist unchanged in the
    /// working tree are removed first, so an apply after a pull that
    /// delivered the same file does not fail spuriously. On conflict
    /// the shelf is kept; on clean apply it is dropped.
    pub fn restore(&self, branch: &BranchName) -> Result<RestoreOutcome, ShelfError> {
        let Some(shelf) = self.find(branch)? else {
            return Ok(RestoreOutcome::NothingToRestore);
        };

        if !self.repo.has_pending_changes()? {
            self.remove_recreated_clean_files(&shelf)?;
        }

        let out = self
            .repo
            .engine()
            .run_unchecked(
                &["stash", "apply", "--index", &shelf.reference],
                self.repo.work_dir(),
            )
            .map_err(RepoError::from)?;

        if !out.success() {
            // --index can fail where a plain apply would not; retry
            // without index restoration before giving up.
            let retry = self
                .repo
                .engine()
                .run_unchecked(&["stash", "apply", &shelf.reference], self.repo.work_dir())
                .map_err(RepoError::from)?;
            if !retry.success() {
                let conflicted = self.repo.conflicts(None)?;
                if !conflicted.is_empty() {
                    tracing::warn!(
                        "shelf for {branch} applied with {} conflict(s); keeping shelf",
                        conflicted.len()
                    );
                    return Ok(RestoreOutcome::Conflicted { paths: conflicted });
                }
                return Err(RepoError::Bridge(BridgeError::Exit {
                    code: retry.code,
                    stdout: retry.stdout,
                    stderr: retry.stderr,
                    args: vec!["stash".into(), "apply".into(), shelf.reference.clone()],
                })
                .into());
            }
        }

        self.drop_shelf(&shelf)?;
        Ok(RestoreOutcome::Applied)
    }

    /// Discard the shelf for `branch` without applying it.
    ///
    /// Destructive; callers confirm with the user first.
    pub fn discard(&self, branch: &BranchName) -> Result<bool, ShelfError> {
        let Some(shelf) = self.find(branch)? else {
            return Ok(false);
        };
        self.drop_shelf(&shelf)?;
        Ok(true)
    }

    fn drop_shelf(&self, shelf: &Shelf) -> Result<(), ShelfError> {
        self.repo
            .engine()
            .run(&["stash", "drop", &shelf.reference], self.repo.work_dir())
            .map_err(RepoError::from)?;
        Ok(())
    }

    /// Delete working-tree files the shelf's untracked snapshot is
    /// about to recreate.
    ///
    /// The engine refuses to restore an untracked file over an
    /// existing one ("already exists"), which happens routinely when a
    /// pull delivered the same file the user had created locally.
    /// Only runs when the working copy is clean, so every file removed
    /// here comes straight back from the shelf.
    fn remove_recreated_clean_files(&self, shelf: &Shelf) -> Result<(), ShelfError> {
        // The untracked snapshot is the shelf commit's third parent;
        // a shelf without untracked files has none.
        let untracked_tree = format!("{}^3", shelf.reference);
        let out = self
            .repo
            .engine()
            .run_unchecked(
                &["ls-tree", "-r", "--name-only", &untracked_tree],
                self.repo.work_dir(),
            )
            .map_err(RepoError::from)?;
        if !out.success() {
            return Ok(());
        }
        for name in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = self.repo.paths().in_work_dir(name);
            if path.is_file() {
                if let Err(err) = std::fs::remove_file(&path) {
                    tracing::warn!("could not clear {} before restore: {err}", path.display());
                }
            }
        }
        Ok(())
    }
}
