//! sync
//!
//! Pull and push as multi-step transactions.
//!
//! A pull shelves local edits, fetches with streamed progress,
//! integrates, then restores the shelf; a push moves large-file
//! objects before refs and treats a rejected ref as a hard failure
//! even on a clean exit code. Both report a terminal [`UpdateState`]
//! rather than burying "no remote" or "canceled" in error variants.
//!
//! Every engine failure that escapes this module has already been run
//! through the [`crate::classify`] taxonomy exactly once.

pub mod pull;
pub mod push;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{classify, Diagnosis};
use crate::host::{LockDirectory, NullProgress, ProgressSink, SettingsStore, StateStore};
use crate::process::bridge::{BridgeError, CancelToken, StreamLine};
use crate::process::progress::{classify_line, LineClass};
use crate::repo::{RepoError, Repository};
use crate::stash::ShelfError;

/// Terminal result of a sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    /// The operation completed.
    Ok,
    /// The branch has no remote counterpart; nothing to sync with.
    NoRemote,
    /// Integration stopped on conflicts; they are listed for the
    /// conflict resolution engine.
    Conflict {
        /// The conflicted paths.
        paths: Vec<String>,
    },
    /// The user canceled during a transfer phase; no refs were
    /// mutated.
    Cancel,
}

/// When to reclaim local large-object cache space after a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrunePolicy {
    /// Prune after every successful pull.
    Always,
    /// Prune objects unreferenced for longer than this many days.
    AfterDays(u32),
    /// Never prune automatically.
    Never,
}

/// Local settings key holding the serialized [`PrunePolicy`].
pub const PRUNE_POLICY_KEY: &str = "cache.prune-policy";

impl PrunePolicy {
    /// Read the policy from local settings; unset or unparseable
    /// settings fall back to [`PrunePolicy::Never`].
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        settings
            .get_local(PRUNE_POLICY_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(PrunePolicy::Never)
    }
}

/// Errors from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An engine invocation failed; the failure has been classified
    /// and carries its remedy.
    #[error("{}", diagnosis.failure)]
    Engine {
        /// The classified failure and its remedy.
        diagnosis: Diagnosis,
        /// The raw engine error text, for logs and feedback reports.
        stderr: String,
    },

    /// The working copy is not on a branch.
    #[error("not on a branch; sync requires a checked-out branch")]
    NoBranch,

    #[error(transparent)]
    Shelf(#[from] ShelfError),

    #[error(transparent)]
    Repo(RepoError),
}

impl SyncError {
    /// The diagnosis, when this is a classified engine failure.
    pub fn diagnosis(&self) -> Option<&Diagnosis> {
        match self {
            SyncError::Engine { diagnosis, .. } => Some(diagnosis),
            _ => None,
        }
    }
}

/// Run a repository error through the classifier exactly once.
///
/// Exit failures become [`SyncError::Engine`]; everything else passes
/// through untouched. Cancellation is not an error at this layer and
/// must be intercepted by the caller before diagnosing.
pub(crate) fn diagnose(err: RepoError) -> SyncError {
    match err {
        RepoError::Bridge(BridgeError::Exit { stderr, .. }) => SyncError::Engine {
            diagnosis: classify(&stderr),
            stderr,
        },
        other => SyncError::Repo(other),
    }
}

pub(crate) fn is_cancel(err: &RepoError) -> bool {
    matches!(err, RepoError::Bridge(BridgeError::Canceled))
}

/// The sync engine, bound to one repository and its host collaborators.
pub struct SyncEngine<'a> {
    repo: &'a Repository,
    progress: &'a dyn ProgressSink,
    locks: Option<&'a dyn LockDirectory>,
    state: Option<&'a StateStore>,
    prune_policy: PrunePolicy,
}

impl<'a> SyncEngine<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            progress: &NullProgress,
            locks: None,
            state: None,
            prune_policy: PrunePolicy::Never,
        }
    }

    /// Report progress and poll cancellation through this sink.
    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Consult this lock directory when re-protecting pulled files.
    pub fn with_locks(mut self, locks: &'a dyn LockDirectory) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Consult this state store for explicit force-unlocks; a path the
    /// user force-unlocked is never silently re-protected.
    pub fn with_state(mut self, state: &'a StateStore) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_prune_policy(mut self, policy: PrunePolicy) -> Self {
        self.prune_policy = policy;
        self
    }

    pub(crate) fn repo(&self) -> &Repository {
        self.repo
    }

    /// Stream-line callback wiring: progress lines go to the sink,
    /// everything else to the log, and the sink's cancel poll is
    /// folded into the bridge token each line.
    pub(crate) fn forward_progress<'t>(
        &'t self,
        cancel: &'t CancelToken,
    ) -> impl FnMut(&StreamLine) + 't {
        move |line: &StreamLine| {
            match classify_line(&line.text) {
                LineClass::Progress(update) => {
                    self.progress.set_text(update.op.label());
                    self.progress.set_fraction(update.fraction());
                }
                LineClass::Other(text) => {
                    if !text.trim().is_empty() {
                        tracing::debug!("engine: {text}");
                    }
                }
            }
            if self.progress.is_canceled() {
                cancel.cancel();
            }
        }
    }
}
