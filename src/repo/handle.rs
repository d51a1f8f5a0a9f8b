//! repo::handle
//!
//! The `Repository` façade.
//!
//! One handle is bound to exactly one working-copy root, created by
//! [`Repository::load`] (walks up to find the root),
//! [`Repository::init`], or [`Repository::clone_from`]. The handle
//! holds no long-lived OS resources; every operation is one or more
//! engine invocations plus in-process computation over their output.
//!
//! # Error semantics
//!
//! Mutating calls surface a typed error carrying the raw engine
//! message; nothing is swallowed except where a no-op is semantically a
//! success. Text interpretation happens only in [`crate::classify`].

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::paths::WorkingCopyPaths;
use crate::core::types::{BranchName, Oid, TypeError};
use crate::process::bridge::{BridgeError, CancelToken, Engine, Output, StreamLine};
use crate::repo::history::{
    classify_entries, parse_log, HistoryEntry, LOG_FORMAT,
};
use crate::repo::lfs::{parse_pointer, track_attribute_line, LfsObjectRef};
use crate::repo::lock::heal_stale_locks;
use crate::repo::status::{Changes, ConflictCode, StatusScan};

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The path is not inside a working copy.
    #[error("not a working copy: {path}")]
    NotAWorkingCopy {
        /// The path that was searched.
        path: PathBuf,
    },

    /// A merge stopped on conflicts; resolve, then continue.
    #[error("merge produced {} conflicted path(s)", paths.len())]
    MergeConflicts {
        /// The conflicted paths.
        paths: Vec<String>,
    },

    /// HEAD is not on a branch.
    #[error("not on a branch (detached HEAD)")]
    DetachedHead,

    /// The engine failed; raw stderr is inside for the classifier.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Validation failure on engine output.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Filesystem failure outside the engine.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A local or remote-tracking branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Short branch name (`main`, `origin/main`).
    pub name: String,
    /// The commit the branch points at.
    pub head_id: Oid,
    /// Committer time of the tip.
    pub last_changed_at: DateTime<Utc>,
    /// Author of the tip commit.
    pub author: String,
    /// Whether the branch is local (`refs/heads/`).
    pub is_local: bool,
}

/// Parameters for a history query.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Lower timestamp bound.
    pub since: Option<DateTime<Utc>>,
    /// Upper timestamp bound.
    pub until: Option<DateTime<Utc>>,
    /// Only entries that exist upstream but not locally.
    pub remote_only: bool,
    /// Cap the number of entries.
    pub max_count: Option<usize>,
}

/// The repository handle.
///
/// Not thread-safe: callers serialize operations per working copy. The
/// upstream lookaside is the only cached state and is invalidated on
/// every mutating call.
pub struct Repository {
    engine: Engine,
    paths: WorkingCopyPaths,
    /// `None` = not yet resolved; `Some(None)` = no upstream.
    upstream: RefCell<Option<Option<String>>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("work_dir", &self.paths.work_dir)
            .finish()
    }
}

impl Repository {
    // =========================================================================
    // Binding
    // =========================================================================

    /// Attach to the working copy containing `path`, walking up to find
    /// its root.
    ///
    /// # Errors
    ///
    /// - [`RepoError::NotAWorkingCopy`] if no working copy is found
    pub fn load(path: &Path) -> Result<Self, RepoError> {
        Self::load_with_engine(path, Engine::new())
    }

    /// Attach using a preconfigured engine (overlay, binary path).
    pub fn load_with_engine(path: &Path, engine: Engine) -> Result<Self, RepoError> {
        let out = engine
            .run_unchecked(&["rev-parse", "--show-toplevel", "--absolute-git-dir"], path)
            .map_err(RepoError::Bridge)?;
        if !out.success() {
            return Err(RepoError::NotAWorkingCopy {
                path: path.to_path_buf(),
            });
        }
        let mut lines = out.stdout.lines();
        let (Some(work_dir), Some(git_dir)) = (lines.next(), lines.next()) else {
            return Err(RepoError::NotAWorkingCopy {
                path: path.to_path_buf(),
            });
        };
        Ok(Self {
            engine,
            paths: WorkingCopyPaths::new(PathBuf::from(work_dir), PathBuf::from(git_dir)),
            upstream: RefCell::new(None),
        })
    }

    /// Initialize a fresh working copy at `path` and attach to it.
    pub fn init(path: &Path) -> Result<Self, RepoError> {
        std::fs::create_dir_all(path)?;
        let engine = Engine::new();
        engine.run(&["init"], path)?;
        Self::load_with_engine(path, engine)
    }

    /// Clone `url` into `path` with streamed progress, then attach.
    ///
    /// Cancellation kills the transfer before anything is attached; a
    /// partially written clone directory is removed.
    pub fn clone_from(
        url: &str,
        path: &Path,
        on_line: &mut dyn FnMut(&StreamLine),
        cancel: &CancelToken,
    ) -> Result<Self, RepoError> {
        std::fs::create_dir_all(path)?;
        let engine = Engine::new();
        let result = engine.run_streaming(
            &["clone", "--progress", url, "."],
            path,
            on_line,
            cancel,
        );
        if let Err(err) = result {
            if matches!(err, BridgeError::Canceled) {
                let _ = std::fs::remove_dir_all(path);
            }
            return Err(err.into());
        }
        Self::load_with_engine(path, engine)
    }

    /// The working tree root this handle is bound to.
    pub fn work_dir(&self) -> &Path {
        &self.paths.work_dir
    }

    /// Path routing for this working copy.
    pub fn paths(&self) -> &WorkingCopyPaths {
        &self.paths
    }

    /// The engine bridge (for the sync and sparse layers).
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Mutable engine access, for environment remediations.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    // =========================================================================
    // Invocation helpers
    // =========================================================================

    fn git(&self, args: &[&str]) -> Result<Output, RepoError> {
        Ok(self.engine.run(args, &self.paths.work_dir)?)
    }

    fn git_unchecked(&self, args: &[&str]) -> Result<Output, RepoError> {
        Ok(self.engine.run_unchecked(args, &self.paths.work_dir)?)
    }

    /// Heal stale locks and drop lookaside state before a mutation.
    fn before_mutation(&self) {
        heal_stale_locks(&self.paths);
        self.upstream.borrow_mut().take();
    }

    fn exit_error(args: &[&str], out: Output) -> RepoError {
        RepoError::Bridge(BridgeError::Exit {
            code: out.code,
            stdout: out.stdout,
            stderr: out.stderr,
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    // =========================================================================
    // Status and pending changes
    // =========================================================================

    /// Run one porcelain status scan.
    ///
    /// Both views (staged and unstaged) project from this single scan,
    /// so they are always mutually consistent.
    pub fn status_scan(&self) -> Result<StatusScan, RepoError> {
        let out = self.git(&["status", "--porcelain", "-z", "--branch"])?;
        Ok(StatusScan::parse(&out.stdout))
    }

    /// Pending changes of one view.
    pub fn pending_changes(&self, staged: bool) -> Result<Changes, RepoError> {
        Ok(self.status_scan()?.changes(staged))
    }

    /// Whether anything (staged, unstaged, or conflicted) is pending.
    pub fn has_pending_changes(&self) -> Result<bool, RepoError> {
        Ok(self.status_scan()?.has_pending())
    }

    /// Conflicted paths, optionally below a path prefix.
    pub fn conflicts(&self, below: Option<&str>) -> Result<Vec<String>, RepoError> {
        let all = self.status_scan()?.conflicts();
        let below = below.map(|p| p.trim_end_matches('/').to_string());
        Ok(all
            .into_iter()
            .map(|(path, _)| path)
            .filter(|path| match &below {
                Some(prefix) => {
                    path == prefix
                        || path
                            .strip_prefix(prefix.as_str())
                            .is_some_and(|rest| rest.starts_with('/'))
                }
                None => true,
            })
            .collect())
    }

    /// Conflicted paths with their merge-status codes.
    pub fn conflict_entries(&self) -> Result<Vec<(String, ConflictCode)>, RepoError> {
        Ok(self.status_scan()?.conflicts())
    }

    // =========================================================================
    // Staging and committing
    // =========================================================================

    /// Stage the given repository-relative paths.
    pub fn stage_files(&self, paths: &[&str]) -> Result<(), RepoError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.before_mutation();
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;
        Ok(())
    }

    /// Stage everything, including deletions and untracked files.
    pub fn stage_all(&self) -> Result<(), RepoError> {
        self.before_mutation();
        self.git(&["add", "--all"])?;
        Ok(())
    }

    /// Commit the staged changes, returning the new commit id.
    pub fn commit(&self, message: &str) -> Result<Oid, RepoError> {
        self.before_mutation();
        self.git(&["commit", "-m", message])?;
        self.head_oid()?.ok_or(RepoError::DetachedHead)
    }

    /// Restore one file to its content at `commit`, leaving the
    /// restored content staged.
    pub fn restore_file(&self, path: &str, commit: &str) -> Result<(), RepoError> {
        self.before_mutation();
        self.git(&["checkout", commit, "--", path])?;
        Ok(())
    }

    /// Discard unstaged edits to the given paths.
    pub fn discard(&self, paths: &[&str]) -> Result<(), RepoError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.before_mutation();
        let mut args = vec!["checkout", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;
        Ok(())
    }

    // =========================================================================
    // Refs and branches
    // =========================================================================

    /// HEAD commit id, or `None` on an unborn branch.
    pub fn head_oid(&self) -> Result<Option<Oid>, RepoError> {
        let out = self.git_unchecked(&["rev-parse", "--verify", "HEAD"])?;
        if !out.success() {
            return Ok(None);
        }
        Ok(Some(Oid::new(out.stdout.trim())?))
    }

    /// Whether the repository has no commits yet.
    pub fn is_unborn(&self) -> Result<bool, RepoError> {
        Ok(self.head_oid()?.is_none())
    }

    /// The current branch, or `None` when HEAD is detached.
    ///
    /// An unborn branch (no commits yet) still reports its name.
    pub fn current_branch(&self) -> Result<Option<BranchName>, RepoError> {
        let out = self.git_unchecked(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !out.success() {
            return Ok(None);
        }
        let name = out.stdout.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(BranchName::new(name)?))
    }

    /// The configured upstream of the current branch (`origin/main`),
    /// resolved once per handle state and invalidated on mutation.
    pub fn upstream(&self) -> Result<Option<String>, RepoError> {
        if let Some(cached) = self.upstream.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let out = self.git_unchecked(&[
            "rev-parse",
            "--abbrev-ref",
            "--symbolic-full-name",
            "@{upstream}",
        ])?;
        let resolved = if out.success() {
            Some(out.stdout.trim().to_string())
        } else {
            None
        };
        *self.upstream.borrow_mut() = Some(resolved.clone());
        Ok(resolved)
    }

    /// The ref to classify history against: the upstream when
    /// configured, else a same-named remote-tracking ref when one
    /// exists (covers "pushed but never tracked").
    fn classification_ref(&self) -> Result<Option<String>, RepoError> {
        if let Some(upstream) = self.upstream()? {
            return Ok(Some(upstream));
        }
        let Some(branch) = self.current_branch()? else {
            return Ok(None);
        };
        let Some(remote) = self.default_remote()? else {
            return Ok(None);
        };
        let candidate = format!("{}/{}", remote, branch);
        let out = self.git_unchecked(&["rev-parse", "--verify", "--quiet", &candidate])?;
        Ok(out.success().then_some(candidate))
    }

    /// Switch the working copy to an existing branch.
    pub fn switch_branch(&self, name: &BranchName) -> Result<(), RepoError> {
        self.before_mutation();
        self.git(&["checkout", name.as_str()])?;
        Ok(())
    }

    /// Create a branch at HEAD and switch to it.
    pub fn create_branch(&self, name: &BranchName) -> Result<(), RepoError> {
        self.before_mutation();
        self.git(&["checkout", "-b", name.as_str()])?;
        Ok(())
    }

    /// Merge `name` into the current branch.
    ///
    /// Returns `true` when a merge commit or fast-forward happened,
    /// `false` when there was nothing to merge.
    ///
    /// # Errors
    ///
    /// - [`RepoError::MergeConflicts`] when the merge stops on
    ///   conflicts; the conflicted paths are inside, and the working
    ///   copy is left mid-merge for the resolution engine.
    pub fn merge_branch(&self, name: &BranchName) -> Result<bool, RepoError> {
        self.before_mutation();
        let args = ["merge", "--no-edit", name.as_str()];
        let out = self.git_unchecked(&args)?;
        if out.success() {
            return Ok(!reported_up_to_date(&out.stdout));
        }
        let conflicted: Vec<String> = self
            .conflict_entries()?
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        if !conflicted.is_empty() {
            return Err(RepoError::MergeConflicts { paths: conflicted });
        }
        Err(Self::exit_error(&args, out))
    }

    /// List local and remote-tracking branches.
    pub fn branches(&self) -> Result<Vec<Branch>, RepoError> {
        let out = self.git(&[
            "for-each-ref",
            "--format=%(refname)%1f%(refname:short)%1f%(objectname)%1f%(committerdate:unix)%1f%(authorname)",
            "refs/heads",
            "refs/remotes",
        ])?;

        let mut branches = Vec::new();
        for line in out.stdout.lines() {
            let fields: Vec<&str> = line.split('\u{1f}').collect();
            let [refname, short, oid, date, author] = fields.as_slice() else {
                continue;
            };
            // origin/HEAD is a symref, not a branch.
            if short.ends_with("/HEAD") {
                continue;
            }
            let Ok(head_id) = Oid::new(*oid) else { continue };
            let last_changed_at = date
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(DateTime::UNIX_EPOCH);
            branches.push(Branch {
                name: short.to_string(),
                head_id,
                last_changed_at,
                author: author.to_string(),
                is_local: refname.starts_with("refs/heads/"),
            });
        }
        Ok(branches)
    }

    // =========================================================================
    // Remotes
    // =========================================================================

    /// The remote to sync against: `origin` when present, else the
    /// first configured remote.
    pub fn default_remote(&self) -> Result<Option<String>, RepoError> {
        let out = self.git(&["remote"])?;
        let mut first = None;
        for name in out.stdout.lines().map(str::trim).filter(|n| !n.is_empty()) {
            if name == "origin" {
                return Ok(Some(name.to_string()));
            }
            if first.is_none() {
                first = Some(name.to_string());
            }
        }
        Ok(first)
    }

    /// Add `origin` pointing at `url`.
    pub fn add_remote(&self, url: &str) -> Result<(), RepoError> {
        self.before_mutation();
        self.git(&["remote", "add", "origin", url])?;
        Ok(())
    }

    /// Repoint the default remote at a new URL.
    pub fn set_remote_url(&self, url: &str) -> Result<(), RepoError> {
        self.before_mutation();
        let remote = self
            .default_remote()?
            .unwrap_or_else(|| "origin".to_string());
        self.git(&["remote", "set-url", &remote, url])?;
        Ok(())
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Commit ids reachable from `tip` but not `exclude`.
    fn rev_set(&self, range: &str) -> Result<HashSet<Oid>, RepoError> {
        let out = self.git_unchecked(&["rev-list", range])?;
        if !out.success() {
            return Ok(HashSet::new());
        }
        Ok(out
            .stdout
            .lines()
            .filter_map(|l| Oid::new(l.trim()).ok())
            .collect())
    }

    /// Query history with three-way classification.
    ///
    /// Every entry carries exactly one [`crate::repo::HistoryKind`]:
    /// commits reachable from HEAD but not the upstream are `Local`,
    /// the reverse are `Remote`, the rest of the window `Synced`.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, RepoError> {
        if self.is_unborn()? && self.classification_ref()?.is_none() {
            return Ok(Vec::new());
        }

        let upstream = self.classification_ref()?;

        let (local_only, remote_only) = match &upstream {
            Some(up) => (
                self.rev_set(&format!("{}..HEAD", up))?,
                self.rev_set(&format!("HEAD..{}", up))?,
            ),
            // No upstream and no pushed counterpart: everything local.
            None => (self.rev_set("HEAD")?, HashSet::new()),
        };

        let format_arg = format!("--format={}", LOG_FORMAT);
        let mut args: Vec<String> = vec!["log".into(), format_arg];
        if let Some(max) = query.max_count {
            args.push(format!("--max-count={}", max));
        }
        if let Some(since) = &query.since {
            args.push(format!("--since={}", since.to_rfc3339()));
        }
        if let Some(until) = &query.until {
            args.push(format!("--until={}", until.to_rfc3339()));
        }
        if query.remote_only {
            match &upstream {
                Some(up) => args.push(format!("HEAD..{}", up)),
                None => return Ok(Vec::new()),
            }
        } else {
            if !self.is_unborn()? {
                args.push("HEAD".into());
            }
            if let Some(up) = &upstream {
                args.push(up.clone());
            }
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.git_unchecked(&arg_refs)?;
        if !out.success() {
            return Ok(Vec::new());
        }
        Ok(classify_entries(
            parse_log(&out.stdout),
            &local_only,
            &remote_only,
        ))
    }

    // =========================================================================
    // Large files
    // =========================================================================

    /// Resolve the LFS content hash of `path` at `commit`.
    ///
    /// A deleted path has no content at the target commit, so the
    /// lookup falls back to the commit's first parent; this two-step
    /// resolution is what makes "what did X look like before the
    /// delete" answerable.
    pub fn lfs_object_at(
        &self,
        commit: &str,
        path: &str,
    ) -> Result<Option<LfsObjectRef>, RepoError> {
        for spec in [format!("{}:{}", commit, path), format!("{}^:{}", commit, path)] {
            let out = self.git_unchecked(&["cat-file", "-p", &spec])?;
            if !out.success() {
                continue;
            }
            if let Some(pointer) = parse_pointer(&out.stdout) {
                return Ok(Some(LfsObjectRef {
                    content_hash: pointer.hash,
                    relative_path: path.to_string(),
                }));
            }
            // Found content that is not a pointer: not LFS-tracked.
            return Ok(None);
        }
        Ok(None)
    }

    /// Whether the working copy tracks anything through the
    /// large-file extension.
    pub fn uses_lfs(&self) -> bool {
        let attributes = self.paths.in_work_dir(".gitattributes");
        std::fs::read_to_string(attributes)
            .map(|content| content.contains("filter=lfs"))
            .unwrap_or(false)
    }

    /// Ensure the given patterns are LFS-tracked in `.gitattributes`,
    /// staging the file when it changed.
    pub fn track_lfs_patterns(&self, patterns: &[&str]) -> Result<(), RepoError> {
        let attributes = self.paths.in_work_dir(".gitattributes");
        let existing = std::fs::read_to_string(&attributes).unwrap_or_default();
        let mut appended = existing.clone();
        let mut changed = false;
        for pattern in patterns {
            let line = track_attribute_line(pattern);
            if !existing.lines().any(|l| l.trim() == line) {
                if !appended.is_empty() && !appended.ends_with('\n') {
                    appended.push('\n');
                }
                appended.push_str(&line);
                appended.push('\n');
                changed = true;
            }
        }
        if changed {
            std::fs::write(&attributes, appended)?;
            self.stage_files(&[".gitattributes"])?;
        }
        Ok(())
    }

    // =========================================================================
    // Local excludes and file modes
    // =========================================================================

    /// Append repository-local ignore rules that must never be
    /// committed (`.git/info/exclude`), skipping rules already there.
    pub fn append_local_excludes(&self, rules: &[&str]) -> Result<(), RepoError> {
        let exclude = self.paths.info_exclude();
        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = std::fs::read_to_string(&exclude).unwrap_or_default();
        let mut content = existing.clone();
        for rule in rules {
            if !existing.lines().any(|l| l.trim() == *rule) {
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(rule);
                content.push('\n');
            }
        }
        if content != existing {
            std::fs::write(&exclude, content)?;
        }
        Ok(())
    }

    /// Toggle the read-only bit of a working-tree file.
    ///
    /// Used after a pull to re-protect files whose lock the user holds
    /// for deliberate editing only.
    pub fn set_readonly(&self, relative: &str, readonly: bool) -> Result<(), RepoError> {
        let path = self.paths.in_work_dir(relative);
        let metadata = std::fs::metadata(&path)?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(readonly);
        std::fs::set_permissions(&path, permissions)?;
        Ok(())
    }

    // =========================================================================
    // Classifier-driven repairs
    // =========================================================================

    /// Remove stale engine lock artifacts (automatic recovery).
    pub fn remove_stale_locks(&self) -> Vec<PathBuf> {
        heal_stale_locks(&self.paths)
    }

    /// Delete and rebuild a corrupt index (automatic recovery).
    pub fn rebuild_index(&self) -> Result<(), RepoError> {
        let index = self.paths.git_dir.join("index");
        if index.exists() {
            std::fs::remove_file(&index)?;
        }
        tracing::warn!("rebuilding corrupt index for {}", self.paths.work_dir.display());
        self.git(&["reset", "--mixed"])?;
        Ok(())
    }

    /// Register the working copy as a trusted directory (automatic
    /// recovery for dubious-ownership failures on shared drives).
    pub fn trust_working_copy(&self) -> Result<(), RepoError> {
        let work_dir = self.paths.work_dir.display().to_string();
        self.git(&["config", "--global", "--add", "safe.directory", &work_dir])?;
        Ok(())
    }
}

/// Merge output for a no-op merge. Git 2.16 dropped the hyphens, older
/// installs still print "Already up-to-date.".
fn reported_up_to_date(stdout: &str) -> bool {
    stdout.contains("Already up to date") || stdout.contains("Already up-to-date")
}
