//! The push transaction.
//!
//! Large-file objects move first, then refs. The ref push runs in
//! porcelain mode and every per-ref result line is inspected: a
//! rejected ref is a hard failure even when the process exit code is
//! zero, because partial ref rejection is the transport's most common
//! non-fatal-looking failure mode.

use crate::core::types::BranchName;
use crate::host::{LockHolder, LockKey};
use crate::process::bridge::{BridgeError, CancelToken};
use crate::repo::RepoError;
use crate::sync::{diagnose, is_cancel, SyncEngine, SyncError, UpdateState};

/// One per-ref result line of a porcelain push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPushResult {
    /// The porcelain flag character (`' '`, `'+'`, `'-'`, `'*'`,
    /// `'='`, or `'!'` for rejected).
    pub flag: char,
    /// The `from:to` refspec.
    pub spec: String,
    /// The human-readable summary (`[rejected] (fetch first)`, ...).
    pub summary: String,
}

impl RefPushResult {
    pub fn is_rejected(&self) -> bool {
        self.flag == '!'
    }
}

/// Parse the per-ref result lines of `push --porcelain` output.
///
/// Result lines are `<flag>\t<from>:<to>\t<summary>`; the `To <url>`
/// header and the `Done` trailer are skipped.
pub fn parse_push_results(stdout: &str) -> Vec<RefPushResult> {
    let mut results = Vec::new();
    for line in stdout.lines() {
        let mut fields = line.splitn(3, '\t');
        let (Some(flag_field), Some(spec), Some(summary)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let mut flag_chars = flag_field.chars();
        let (Some(flag), None) = (flag_chars.next(), flag_chars.next()) else {
            continue;
        };
        results.push(RefPushResult {
            flag,
            spec: spec.to_string(),
            summary: summary.trim().to_string(),
        });
    }
    results
}

impl<'a> SyncEngine<'a> {
    /// Push the current branch, large-file objects first.
    pub fn push(&self) -> Result<UpdateState, SyncError> {
        let repo = self.repo();

        let Some(branch) = repo.current_branch().map_err(diagnose)? else {
            return Err(SyncError::NoBranch);
        };
        let Some(remote) = repo.default_remote().map_err(diagnose)? else {
            return Ok(UpdateState::NoRemote);
        };

        // Large objects first: a ref push that lands before its
        // objects would advertise files nobody can fetch. Skipped
        // entirely when nothing is LFS-tracked.
        let cancel = CancelToken::new();
        if repo.uses_lfs() {
            let lfs_push = {
                let mut on_line = self.forward_progress(&cancel);
                repo.engine().run_streaming(
                    &["lfs", "push", &remote, branch.as_str()],
                    repo.work_dir(),
                    &mut on_line,
                    &cancel,
                )
            };
            if let Err(err) = lfs_push {
                let err = RepoError::from(err);
                if is_cancel(&err) {
                    return Ok(UpdateState::Cancel);
                }
                return Err(diagnose(err));
            }
        }

        // Paths this push publishes; their locks are released once the
        // work is shared.
        let outgoing = self.outgoing_paths();

        // Ref push: cancellation is refused from here on.
        let args = [
            "push",
            "--porcelain",
            "--set-upstream",
            remote.as_str(),
            branch.as_str(),
        ];
        let out = repo
            .engine()
            .run_unchecked(&args, repo.work_dir())
            .map_err(RepoError::from)
            .map_err(diagnose)?;

        let rejected: Vec<RefPushResult> = parse_push_results(&out.stdout)
            .into_iter()
            .filter(RefPushResult::is_rejected)
            .collect();

        if !rejected.is_empty() || !out.success() {
            let mut stderr = out.stderr.clone();
            for result in &rejected {
                stderr.push('\n');
                stderr.push_str(&format!("! {} {}", result.spec, result.summary));
            }
            return Err(diagnose(RepoError::Bridge(BridgeError::Exit {
                code: out.code,
                stdout: out.stdout,
                stderr,
                args: args.iter().map(|s| s.to_string()).collect(),
            })));
        }

        self.release_published_locks(&branch, &outgoing);
        Ok(UpdateState::Ok)
    }

    /// Paths changed between the upstream and HEAD, before the push
    /// moves the upstream. Empty when no lock directory is wired in or
    /// nothing tracks an upstream yet.
    fn outgoing_paths(&self) -> Vec<String> {
        if self.locks.is_none() {
            return Vec::new();
        }
        let repo = self.repo();
        let Ok(Some(upstream)) = repo.upstream() else {
            return Vec::new();
        };
        let range = format!("{}..HEAD", upstream);
        match repo
            .engine()
            .run_unchecked(&["diff", "--name-only", &range], repo.work_dir())
        {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Published work no longer needs its exclusive holds; release the
    /// ones this user took out.
    fn release_published_locks(&self, branch: &BranchName, paths: &[String]) {
        let Some(locks) = self.locks else {
            return;
        };
        for path in paths {
            let held_by_self = matches!(
                locks.holder_of(path),
                Some(LockHolder { is_self: true, .. })
            );
            if held_by_self {
                locks.release(&LockKey {
                    path: path.clone(),
                    branch: branch.as_str().to_string(),
                });
            }
        }
    }
}
