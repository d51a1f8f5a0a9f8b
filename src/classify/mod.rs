//! classify
//!
//! The Error Classifier: the single place of pattern truth for raw
//! engine error text.
//!
//! # Architecture
//!
//! The Process Bridge never interprets errors, and the Repository
//! Handle and Sync Engine propagate them raw. Every call site that
//! talks to the engine routes failure text through [`classify`], which
//! matches against a **closed, ordered** set of patterns and maps each
//! hit to one of four outcomes:
//!
//! 1. Recoverable-automatic: handled silently (stale lock removal,
//!    index rebuild, ownership trust), caller retries.
//! 2. Recoverable-with-consent: one environment remediation gated on a
//!    single user confirmation (the HTTP/1.1 transport fallback for one
//!    hosting provider's HTTP/2 bug).
//! 3. Recoverable-with-user-action: surfaced with exactly one primary
//!    remediation action.
//! 4. Blocking or unclassified: routed to conflict resolution, or
//!    surfaced as a generic failure with the first `fatal:`/`error:`
//!    line extracted. Never silently dropped.
//!
//! # Ordering
//!
//! Match order matters: several specific failures (a provider's HTTP/2
//! signature, SSO enforcement) also contain generic substrings
//! ("authentication failed"), so specific patterns are tested first.
//! The table in [`classify`] is the one ordered list.

use thiserror::Error;

/// Classified engine failure.
///
/// Each variant corresponds to a known engine failure signature with an
/// associated recovery path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFailure {
    /// A lock artifact from a crashed prior invocation is in the way.
    #[error("stale lock file blocks the repository")]
    StaleLock,

    /// The index file is corrupt and must be rebuilt.
    #[error("repository index is corrupt")]
    CorruptIndex,

    /// The working copy is owned by another OS user.
    #[error("working copy ownership is not trusted")]
    DubiousOwnership,

    /// The provider's HTTP/2 transport bug reset the connection.
    #[error("transport failed over HTTP/2")]
    Http2Transport,

    /// The organization enforces single sign-on re-authorization.
    #[error("single sign-on authorization required")]
    SsoRequired,

    /// Credentials are missing, invalid, or expired.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The remote's large-file storage quota is exhausted.
    #[error("large-file storage quota exceeded")]
    LfsQuotaExceeded,

    /// The disk is full.
    #[error("no space left on device")]
    DiskFull,

    /// A checkout path exceeds the platform path length limit.
    #[error("filename too long for this platform")]
    FilenameTooLong,

    /// A working-tree file is held open by another application.
    #[error("file is locked by another application: {path}")]
    FileInUse {
        /// The path the engine could not replace.
        path: String,
    },

    /// The push was rejected because the remote moved on.
    #[error("remote rejected the update")]
    RemoteRejected,

    /// The remote host is unreachable.
    #[error("remote is unreachable")]
    RemoteUnreachable,

    /// Unmerged paths block the operation.
    #[error("unresolved conflicts block this operation")]
    ConflictsPresent,

    /// A merge or rebase is already in progress.
    #[error("another merge or rebase is in progress")]
    OperationInProgress,

    /// No known pattern matched.
    #[error("{summary}")]
    Unclassified {
        /// First `fatal:`/`error:` line, or a truncated excerpt.
        summary: String,
    },
}

/// Fully automatic, silent recovery steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFix {
    /// Remove the stale lock artifact and retry.
    RemoveStaleLock,
    /// Delete and rebuild the index, then retry.
    RebuildIndex,
    /// Register the working copy as a trusted (safe) directory.
    TrustWorkingCopy,
    /// Enable long path support in the environment overlay.
    EnableLongPaths,
}

/// The single primary action offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Renew or re-enter credentials (covers SSO re-authorization).
    RenewCredentials,
    /// Free disk space and retry.
    FreeDiskSpace,
    /// Reduce checkout scope or clear the large-object cache.
    ReduceScope,
    /// Ask the project administrator (quota, permissions).
    ContactAdministrator,
    /// Pull remote changes first, then retry the push.
    PullFirst,
    /// Close the application holding the file, then retry.
    CloseOtherApplication,
    /// Check connectivity and retry later.
    RetryLater,
}

/// What should happen next, per the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remedy {
    /// Recoverable-automatic: apply silently, then retry.
    Auto(AutoFix),

    /// Recoverable with one consent step: explain, then remediate the
    /// environment if the user agrees.
    WithConsent {
        /// What will be changed and why, shown before consent.
        explanation: String,
        /// The environment fix to apply on consent.
        fix: ConsentFix,
    },

    /// Recoverable with exactly one primary user action.
    UserAction {
        /// The message shown to the user.
        message: String,
        /// The single remediation action offered.
        action: UserAction,
    },

    /// Blocking until resolved; route to the conflict resolution
    /// engine (or finish the in-progress operation).
    Blocked,

    /// Unclassified; surface generically with a feedback channel.
    Report,
}

/// Consent-gated environment remediations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentFix {
    /// Downgrade the transport to HTTP/1.1 for this working copy.
    ForceHttp11,
}

/// A classified failure with its remedy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    /// The recognized failure.
    pub failure: EngineFailure,
    /// The deterministic next step.
    pub remedy: Remedy,
}

impl Diagnosis {
    /// Whether the remedy runs without any user involvement.
    pub fn is_automatic(&self) -> bool {
        matches!(self.remedy, Remedy::Auto(_))
    }

    /// Whether the failure blocks until conflicts are resolved.
    pub fn is_blocking(&self) -> bool {
        matches!(self.remedy, Remedy::Blocked)
    }
}

/// Classify raw engine error text.
///
/// The pattern table is ordered: provider-specific signatures come
/// before the generic substrings they embed. Matching is
/// case-insensitive on the engine's stable message fragments.
pub fn classify(stderr: &str) -> Diagnosis {
    let text = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    // 1. Crash leftovers: fully automatic.
    if has(&["index.lock", "shallow.lock"]) && has(&["file exists", "unable to create"]) {
        return diagnosis(EngineFailure::StaleLock, Remedy::Auto(AutoFix::RemoveStaleLock));
    }
    if has(&["index file corrupt", "index file smaller than expected", "bad index file"]) {
        return diagnosis(EngineFailure::CorruptIndex, Remedy::Auto(AutoFix::RebuildIndex));
    }
    if has(&["detected dubious ownership"]) {
        return diagnosis(
            EngineFailure::DubiousOwnership,
            Remedy::Auto(AutoFix::TrustWorkingCopy),
        );
    }
    if has(&["filename too long", "unable to create file"]) && has(&["too long"]) {
        return diagnosis(
            EngineFailure::FilenameTooLong,
            Remedy::Auto(AutoFix::EnableLongPaths),
        );
    }

    // 2. Provider HTTP/2 signature, before anything mentioning auth or
    // generic transport failure (the same stderr often carries both).
    if has(&["http/2 stream", "curl 92", "curl 16"])
        || (has(&["rpc failed"]) && has(&["http/2"]))
    {
        return diagnosis(
            EngineFailure::Http2Transport,
            Remedy::WithConsent {
                explanation:
                    "The remote's HTTP/2 endpoint dropped the transfer. Towline can switch \
                     this working copy to HTTP/1.1, which avoids the known server bug."
                        .into(),
                fix: ConsentFix::ForceHttp11,
            },
        );
    }

    // 3. SSO before generic authentication: SSO stderr also says the
    // credentials were rejected.
    if has(&["saml sso", "single sign-on", "sso authorization"]) {
        return diagnosis(
            EngineFailure::SsoRequired,
            user_action(
                "Your organization requires single sign-on re-authorization for this remote.",
                UserAction::RenewCredentials,
            ),
        );
    }
    if has(&[
        "authentication failed",
        "could not read username",
        "could not read password",
        "invalid username or password",
        "access denied: 403",
    ]) {
        return diagnosis(
            EngineFailure::AuthenticationFailed,
            user_action(
                "The remote rejected your credentials. Renew them and try again.",
                UserAction::RenewCredentials,
            ),
        );
    }

    // 4. Quota and disk.
    if has(&["over its data quota", "lfs budget", "exceeded your lfs storage"]) {
        return diagnosis(
            EngineFailure::LfsQuotaExceeded,
            user_action(
                "The remote's large-file storage quota is exhausted.",
                UserAction::ContactAdministrator,
            ),
        );
    }
    if has(&["no space left on device", "disk full", "not enough space"]) {
        return diagnosis(
            EngineFailure::DiskFull,
            user_action(
                "The disk is full. Free space or clear the large-file cache.",
                UserAction::FreeDiskSpace,
            ),
        );
    }

    // 5. Locked working-tree files, common under DCC tools on Windows.
    if has(&["unable to unlink", "permission denied", "device or resource busy"])
        && has(&["unlink", "unable to create file", "permission denied"])
    {
        let path = extract_quoted_path(stderr).unwrap_or_default();
        return diagnosis(
            EngineFailure::FileInUse { path },
            user_action(
                "A file is held open by another application. Close it and retry.",
                UserAction::CloseOtherApplication,
            ),
        );
    }

    // 6. Blocking states.
    if has(&[
        "fix conflicts and then commit",
        "you have unmerged files",
        "needs merge",
        "unmerged paths",
        "pulling is not possible",
    ]) {
        return diagnosis(EngineFailure::ConflictsPresent, Remedy::Blocked);
    }
    if has(&[
        "rebase in progress",
        "merge_head exists",
        "in the middle of a merge",
        "cherry-pick is already in progress",
    ]) {
        return diagnosis(EngineFailure::OperationInProgress, Remedy::Blocked);
    }

    // 7. Push rejection and reachability.
    if has(&["[rejected]", "failed to push some refs", "non-fast-forward", "fetch first"]) {
        return diagnosis(
            EngineFailure::RemoteRejected,
            user_action(
                "The remote has newer commits. Pull first, then push again.",
                UserAction::PullFirst,
            ),
        );
    }
    if has(&[
        "could not resolve host",
        "couldn't connect to server",
        "connection timed out",
        "network is unreachable",
    ]) {
        return diagnosis(
            EngineFailure::RemoteUnreachable,
            user_action(
                "The remote is unreachable. Check your connection and retry.",
                UserAction::RetryLater,
            ),
        );
    }

    // 8. Nothing matched: extract the first fatal/error line.
    diagnosis(
        EngineFailure::Unclassified {
            summary: extract_summary(stderr),
        },
        Remedy::Report,
    )
}

fn diagnosis(failure: EngineFailure, remedy: Remedy) -> Diagnosis {
    Diagnosis { failure, remedy }
}

fn user_action(message: &str, action: UserAction) -> Remedy {
    Remedy::UserAction {
        message: message.to_string(),
        action,
    }
}

/// First `fatal:`/`error:` line of the text, else a truncated excerpt.
fn extract_summary(stderr: &str) -> String {
    for line in stderr.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("fatal:") || lower.starts_with("error:") {
            return trimmed.to_string();
        }
    }
    let first = stderr.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        "engine failed with no output".to_string()
    } else {
        first.chars().take(200).collect()
    }
}

/// Pull the first single-quoted path out of an engine message.
fn extract_quoted_path(stderr: &str) -> Option<String> {
    let start = stderr.find('\'')?;
    let rest = &stderr[start + 1..];
    let end = rest.find('\'')?;
    let path = &rest[..end];
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
