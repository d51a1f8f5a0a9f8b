//! repo::history
//!
//! History entries and their three-way classification.
//!
//! Every entry carries exactly one [`HistoryKind`]: `Local` (committed
//! but not yet pushed), `Remote` (upstream but not yet pulled), or
//! `Synced` (present on both sides). The kinds are computed from
//! reachability set differences between HEAD and the upstream ref; this
//! is the single most important invariant for the host's UI.
//!
//! Merge commits additionally get a synthesized caption distinguishing
//! "merged branch X into Y" from "pulled and merged", extracted from
//! the engine's auto-generated merge subject.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::core::types::Oid;

/// Where a commit exists relative to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    /// Committed locally, not yet pushed.
    Local,
    /// Exists upstream, not yet pulled.
    Remote,
    /// Present both locally and upstream.
    Synced,
}

/// One commit in the queried history window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The commit id.
    pub id: Oid,
    /// Author name.
    pub author: String,
    /// The commit subject line.
    pub message: String,
    /// Author timestamp.
    pub timestamp: DateTime<Utc>,
    /// Parent commit ids; more than one for merges.
    pub parents: Vec<Oid>,
    /// The three-way classification.
    pub kind: HistoryKind,
}

impl HistoryEntry {
    /// Whether this is a merge commit.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Field and record separators used in the log format string.
pub const LOG_FIELD_SEP: char = '\u{1f}';
pub const LOG_RECORD_SEP: char = '\u{1e}';

/// The `--format` argument producing parseable records:
/// `id FS author FS unix-time FS parents FS subject RS`.
pub const LOG_FORMAT: &str = "%H%x1f%an%x1f%at%x1f%P%x1f%s%x1e";

/// Parse `git log` output produced with [`LOG_FORMAT`].
///
/// Malformed records are skipped rather than failing the whole query;
/// the engine occasionally interleaves warnings on stdout.
pub fn parse_log(stdout: &str) -> Vec<ParsedCommit> {
    let mut commits = Vec::new();
    for record in stdout.split(LOG_RECORD_SEP) {
        let record = record.trim_matches(['\n', '\r', ' ']);
        if record.is_empty() {
            continue;
        }
        let mut fields = record.split(LOG_FIELD_SEP);
        let (Some(id), Some(author), Some(time), Some(parents), Some(subject)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            continue;
        };
        let Ok(id) = Oid::new(id.trim()) else { continue };
        let Ok(secs) = time.trim().parse::<i64>() else {
            continue;
        };
        let timestamp = DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
        let parents = parents
            .split_whitespace()
            .filter_map(|p| Oid::new(p).ok())
            .collect();
        commits.push(ParsedCommit {
            id,
            author: author.to_string(),
            timestamp,
            parents,
            message: subject.to_string(),
        });
    }
    commits
}

/// A commit parsed from the log, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommit {
    pub id: Oid,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub parents: Vec<Oid>,
    pub message: String,
}

/// Classify parsed commits against the reachability sets.
///
/// `local_only` holds ids reachable from HEAD but not the upstream;
/// `remote_only` the reverse. Everything else in the window is Synced.
/// The sets are disjoint by construction (rev-list set differences), so
/// each entry gets exactly one kind.
pub fn classify_entries(
    commits: Vec<ParsedCommit>,
    local_only: &HashSet<Oid>,
    remote_only: &HashSet<Oid>,
) -> Vec<HistoryEntry> {
    commits
        .into_iter()
        .map(|c| {
            let kind = if local_only.contains(&c.id) {
                HistoryKind::Local
            } else if remote_only.contains(&c.id) {
                HistoryKind::Remote
            } else {
                HistoryKind::Synced
            };
            HistoryEntry {
                id: c.id,
                author: c.author,
                message: c.message,
                timestamp: c.timestamp,
                parents: c.parents,
                kind,
            }
        })
        .collect()
}

/// The synthesized caption for a merge commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeCaption {
    /// A deliberate branch merge: "merged branch X into Y".
    MergedBranch {
        /// The source branch named in the merge subject.
        source: String,
        /// The target branch, when the subject names one.
        target: Option<String>,
    },
    /// A pull that merged remote work into the local branch.
    PulledAndMerged {
        /// The remote branch that was integrated.
        source: String,
    },
}

impl std::fmt::Display for MergeCaption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeCaption::MergedBranch {
                source,
                target: Some(target),
            } => write!(f, "Merged branch {} into {}", source, target),
            MergeCaption::MergedBranch { source, target: None } => {
                write!(f, "Merged branch {}", source)
            }
            MergeCaption::PulledAndMerged { source } => {
                write!(f, "Pulled and merged {}", source)
            }
        }
    }
}

/// Extract a merge caption from an engine auto-generated merge subject.
///
/// Recognized shapes:
/// - `Merge branch 'X' of <url> [into Y]` -> pulled and merged
/// - `Merge remote-tracking branch 'origin/X' [into Y]` -> pulled and merged
/// - `Merge branch 'X' into Y` / `Merge branch 'X'` -> merged branch
///
/// Returns `None` for hand-written merge subjects.
pub fn parse_merge_caption(subject: &str) -> Option<MergeCaption> {
    if let Some(rest) = subject.strip_prefix("Merge remote-tracking branch ") {
        let (source, _) = quoted_then_target(rest)?;
        return Some(MergeCaption::PulledAndMerged { source });
    }

    let rest = subject.strip_prefix("Merge branch ")?;
    let (source, tail) = quoted_then_target(rest)?;

    if let Some(tail) = &tail {
        if let Some(after_of) = tail.strip_prefix("of ") {
            // "of <url>" marks a pull; the URL may itself be followed
            // by "into Y", which does not change the caption.
            let _ = after_of;
            return Some(MergeCaption::PulledAndMerged { source });
        }
        if let Some(target) = tail.strip_prefix("into ") {
            return Some(MergeCaption::MergedBranch {
                source,
                target: Some(target.trim().to_string()),
            });
        }
        return None;
    }

    Some(MergeCaption::MergedBranch {
        source,
        target: None,
    })
}

/// Split `'quoted' rest...` into the quoted text and the trimmed tail.
fn quoted_then_target(rest: &str) -> Option<(String, Option<String>)> {
    let rest = rest.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    let quoted = rest[..end].to_string();
    let tail = rest[end + 1..].trim();
    if quoted.is_empty() {
        return None;
    }
    Some((
        quoted,
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        },
    ))
}
