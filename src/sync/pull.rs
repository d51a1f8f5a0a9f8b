//! The pull transaction.
//!
//! `Idle -> ShelvingLocalEdits -> Fetching -> Integrating ->
//! {Ok | Conflict | Cancel} -> RestoringShelvedEdits -> Idle`.
//!
//! Local edits are always shelved before integration and restored
//! after, except when integration reports a conflict, in which case
//! the shelf is left in place so the user's work survives resolution.
//! Cancellation is honored only during the fetch phase, before any ref
//! mutation.

use crate::core::types::BranchName;
use crate::host::{LockHolder, LockKey};
use crate::process::bridge::CancelToken;
use crate::repo::RepoError;
use crate::stash::{RestoreOutcome, ShelfManager};
use crate::sync::{diagnose, is_cancel, PrunePolicy, SyncEngine, SyncError, UpdateState};

impl<'a> SyncEngine<'a> {
    /// Pull remote work into the current branch.
    pub fn pull(&self) -> Result<UpdateState, SyncError> {
        let repo = self.repo();

        let Some(branch) = repo.current_branch().map_err(diagnose)? else {
            return Err(SyncError::NoBranch);
        };
        let Some(upstream) = repo.upstream().map_err(diagnose)? else {
            return Ok(UpdateState::NoRemote);
        };
        // The upstream carries both halves of what to fetch; the local
        // branch name may differ from the remote one it tracks.
        let Some((remote, merge_ref)) = upstream.split_once('/') else {
            return Ok(UpdateState::NoRemote);
        };

        self.acquire_locks_for_edits(&branch)?;

        let shelves = ShelfManager::new(repo);
        let shelved = shelves.shelve(&branch, true)?;
        if shelved {
            tracing::debug!("shelved local edits before pull on {branch}");
        }

        let before = repo.head_oid().map_err(diagnose)?;

        // Fetch phase: the only window where cancellation is honored.
        let cancel = CancelToken::new();
        let fetch = {
            let mut on_line = self.forward_progress(&cancel);
            repo.engine().run_streaming(
                &["fetch", "--progress", remote, merge_ref],
                repo.work_dir(),
                &mut on_line,
                &cancel,
            )
        };
        if let Err(err) = fetch {
            let err = RepoError::from(err);
            if is_cancel(&err) {
                if shelved {
                    self.restore_shelf(&shelves, &branch)?;
                }
                return Ok(UpdateState::Cancel);
            }
            return Err(diagnose(err));
        }

        // Integration: from here on cancellation is refused.
        self.make_incoming_writable(&upstream)?;
        let upstream_branch = BranchName::new(&upstream).map_err(RepoError::from).map_err(diagnose)?;
        match repo.merge_branch(&upstream_branch) {
            Ok(_) => {}
            Err(RepoError::MergeConflicts { paths }) => {
                // The shelf stays put: dropping it now would lose the
                // user's edits in the middle of resolution.
                return Ok(UpdateState::Conflict { paths });
            }
            Err(err) => return Err(diagnose(err)),
        }

        self.reprotect_held_files(before.as_ref().map(|o| o.as_str()))?;

        if shelved {
            if let RestoreOutcome::Conflicted { paths } = self.restore_shelf(&shelves, &branch)? {
                return Ok(UpdateState::Conflict { paths });
            }
        }

        self.auto_prune();
        Ok(UpdateState::Ok)
    }

    fn restore_shelf(
        &self,
        shelves: &ShelfManager<'_>,
        branch: &BranchName,
    ) -> Result<RestoreOutcome, SyncError> {
        Ok(shelves.restore(branch)?)
    }

    /// Locally edited files are claimed in the team lock directory so
    /// teammates see the work in flight. Paths someone else already
    /// holds are left alone; the merge conflict surfaces later anyway.
    fn acquire_locks_for_edits(&self, branch: &BranchName) -> Result<(), SyncError> {
        let Some(locks) = self.locks else {
            return Ok(());
        };
        let repo = self.repo();
        let scan = repo.status_scan().map_err(diagnose)?;
        for view in [scan.changes(true), scan.changes(false)] {
            for change in view.iter() {
                if locks.holder_of(&change.path).is_some() {
                    continue;
                }
                locks.acquire(&LockKey {
                    path: change.path.clone(),
                    branch: branch.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Files integration is about to rewrite must be writable first:
    /// lock protection marks them read-only, and a merge cannot
    /// replace a read-only file everywhere.
    fn make_incoming_writable(&self, upstream: &str) -> Result<(), SyncError> {
        let repo = self.repo();
        let range = format!("HEAD..{}", upstream);
        let out = repo
            .engine()
            .run_unchecked(&["diff", "--name-only", &range], repo.work_dir())
            .map_err(RepoError::from)
            .map_err(diagnose)?;
        if !out.success() {
            return Ok(());
        }
        for path in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !repo.paths().in_work_dir(path).exists() {
                continue; // incoming file that does not exist here yet
            }
            if let Err(err) = repo.set_readonly(path, false) {
                tracing::warn!("could not unprotect {path} before integration: {err}");
            }
        }
        Ok(())
    }

    /// Files the pull rewrote whose lock the local user holds for
    /// deliberate editing are made read-only again, so the next edit
    /// is intentional. Paths the user explicitly force-unlocked are
    /// left writable; that choice is recorded by the host state store.
    fn reprotect_held_files(&self, before: Option<&str>) -> Result<(), SyncError> {
        let Some(locks) = self.locks else {
            return Ok(());
        };
        let Some(before) = before else {
            return Ok(()); // first pull into an unborn branch rewrites nothing held
        };
        let repo = self.repo();
        let range = format!("{}..HEAD", before);
        let out = repo
            .engine()
            .run_unchecked(&["diff", "--name-only", &range], repo.work_dir())
            .map_err(RepoError::from)
            .map_err(diagnose)?;
        if !out.success() {
            return Ok(());
        }
        for path in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let forced_open = self
                .state
                .is_some_and(|state| state.forced_unlock_at(path).is_some());
            if forced_open {
                continue;
            }
            let held_by_self = matches!(
                locks.holder_of(path),
                Some(LockHolder { is_self: true, .. })
            );
            if held_by_self {
                if let Err(err) = repo.set_readonly(path, true) {
                    tracing::warn!("could not re-protect {path}: {err}");
                }
            }
        }
        Ok(())
    }

    /// Reclaim local large-object cache space per the configured
    /// policy. Best-effort: a failed prune never fails the pull.
    fn auto_prune(&self) {
        let repo = self.repo();
        if !repo.uses_lfs() {
            return;
        }
        let args: Vec<String> = match self.prune_policy {
            PrunePolicy::Never => return,
            PrunePolicy::Always => {
                vec!["lfs".into(), "prune".into(), "--verify-remote".into()]
            }
            PrunePolicy::AfterDays(days) => vec![
                "-c".into(),
                format!("lfs.pruneoffsetdays={}", days),
                "lfs".into(),
                "prune".into(),
                "--verify-remote".into(),
            ],
        };
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match repo.engine().run_unchecked(&arg_refs, repo.work_dir()) {
            Ok(out) if !out.success() => {
                tracing::warn!("large-object prune failed: {}", out.stderr.trim());
            }
            Err(err) => tracing::warn!("large-object prune failed: {err}"),
            _ => {}
        }
    }
}
