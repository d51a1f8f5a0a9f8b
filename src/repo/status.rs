//! repo::status
//!
//! Pending-change model and porcelain status parsing.
//!
//! A single two-column status scan (`git status --porcelain -z`) feeds
//! both the staged and unstaged views, so they are always consistent
//! with one engine invocation. The index column projects the staged
//! view, the worktree column the unstaged view; conflicts are derived
//! from the two-letter code, never stored.

use crate::core::types::BranchName;

/// Status of one pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    /// Newly added (or untracked, in the unstaged view).
    New,
    /// Content modified.
    Modified,
    /// Deleted.
    Deleted,
    /// Renamed; `renamed_from` carries the old path.
    Renamed,
    /// Unresolved two-sided conflict.
    Conflicted,
}

/// One pending change in the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Repository-relative path.
    pub path: String,
    /// Old path, for renames.
    pub renamed_from: Option<String>,
    /// The change status.
    pub status: ChangeStatus,
}

impl Change {
    fn new(path: impl Into<String>, status: ChangeStatus) -> Self {
        Self {
            path: path.into(),
            renamed_from: None,
            status,
        }
    }
}

/// The pending changes of one view (staged or unstaged), grouped by
/// status. Conflicted paths are reported via [`StatusScan::conflicts`],
/// not here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Added files, in engine order.
    pub new_files: Vec<Change>,
    /// Modified files.
    pub modified: Vec<Change>,
    /// Deleted files.
    pub deleted: Vec<Change>,
    /// Renamed files.
    pub renamed: Vec<Change>,
}

impl Changes {
    /// Total number of changes across all groups.
    pub fn len(&self) -> usize {
        self.new_files.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }

    /// Whether there are no changes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate all changes in group order.
    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.new_files
            .iter()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
            .chain(self.renamed.iter())
    }

    /// Whether any change touches a path with the given prefix.
    pub fn touches_prefix(&self, prefix: &str) -> bool {
        let normalized = prefix.trim_end_matches('/');
        self.iter().any(|c| {
            path_has_prefix(&c.path, normalized)
                || c.renamed_from
                    .as_deref()
                    .is_some_and(|old| path_has_prefix(old, normalized))
        })
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// The two-letter merge-status code of a conflicted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConflictCode {
    /// The index (ours) column.
    pub ours: char,
    /// The worktree (theirs) column.
    pub theirs: char,
}

impl ConflictCode {
    /// The conflict codes the engine emits.
    const CONFLICT_PAIRS: &'static [(char, char)] = &[
        ('U', 'U'),
        ('A', 'A'),
        ('D', 'D'),
        ('A', 'U'),
        ('U', 'A'),
        ('D', 'U'),
        ('U', 'D'),
    ];

    fn is_conflict(ours: char, theirs: char) -> bool {
        Self::CONFLICT_PAIRS.contains(&(ours, theirs))
    }
}

impl std::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.ours, self.theirs)
    }
}

/// One raw entry of the porcelain scan.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEntry {
    index: char,
    worktree: char,
    path: String,
    orig_path: Option<String>,
}

/// The parsed result of one status scan.
#[derive(Debug, Clone, Default)]
pub struct StatusScan {
    entries: Vec<RawEntry>,
    /// The branch the scan ran on, when known.
    pub branch: Option<BranchName>,
}

impl StatusScan {
    /// Parse NUL-delimited porcelain v1 output
    /// (`git status --porcelain -z [--branch]`).
    pub fn parse(data: &str) -> Self {
        let mut entries = Vec::new();
        let mut branch = None;
        let mut fields = data.split('\0').peekable();

        while let Some(field) = fields.next() {
            if field.len() < 3 {
                continue;
            }
            // "## branch...upstream" header line from --branch.
            if let Some(header) = field.strip_prefix("## ") {
                let name = header.split("...").next().unwrap_or("");
                branch = BranchName::new(name).ok();
                continue;
            }
            let mut chars = field.chars();
            let index = chars.next().unwrap_or(' ');
            let worktree = chars.next().unwrap_or(' ');
            let sep = chars.next().unwrap_or(' ');
            if sep != ' ' {
                continue;
            }
            let path = field[3..].to_string();

            // Renames carry the original path in the following field.
            let orig_path = if index == 'R' || worktree == 'R' || index == 'C' {
                fields.next().map(|s| s.to_string())
            } else {
                None
            };

            entries.push(RawEntry {
                index,
                worktree,
                path,
                orig_path,
            });
        }

        Self { entries, branch }
    }

    /// Project one view out of the scan.
    ///
    /// `staged` selects the index column; otherwise the worktree column
    /// (where untracked `??` entries count as new). Conflicted entries
    /// belong to neither view.
    pub fn changes(&self, staged: bool) -> Changes {
        let mut changes = Changes::default();
        for entry in &self.entries {
            if ConflictCode::is_conflict(entry.index, entry.worktree) {
                continue;
            }
            if entry.index == '?' {
                if !staged {
                    changes
                        .new_files
                        .push(Change::new(entry.path.clone(), ChangeStatus::New));
                }
                continue;
            }
            let code = if staged { entry.index } else { entry.worktree };
            match code {
                'A' => changes
                    .new_files
                    .push(Change::new(entry.path.clone(), ChangeStatus::New)),
                'M' | 'T' => changes
                    .modified
                    .push(Change::new(entry.path.clone(), ChangeStatus::Modified)),
                'D' => changes
                    .deleted
                    .push(Change::new(entry.path.clone(), ChangeStatus::Deleted)),
                'R' => changes.renamed.push(Change {
                    path: entry.path.clone(),
                    renamed_from: entry.orig_path.clone(),
                    status: ChangeStatus::Renamed,
                }),
                _ => {}
            }
        }
        changes
    }

    /// Conflicted paths with their two-letter codes, in engine order.
    pub fn conflicts(&self) -> Vec<(String, ConflictCode)> {
        self.entries
            .iter()
            .filter(|e| ConflictCode::is_conflict(e.index, e.worktree))
            .map(|e| {
                (
                    e.path.clone(),
                    ConflictCode {
                        ours: e.index,
                        theirs: e.worktree,
                    },
                )
            })
            .collect()
    }

    /// Whether the scan found any entry at all (conflicts included).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether either view has changes or conflicts exist.
    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(entries: &[&str]) -> StatusScan {
        StatusScan::parse(&format!("{}\0", entries.join("\0")))
    }

    #[test]
    fn empty_scan() {
        let s = StatusScan::parse("");
        assert!(s.is_empty());
        assert!(s.changes(true).is_empty());
        assert!(s.changes(false).is_empty());
    }

    #[test]
    fn staged_and_unstaged_from_one_scan() {
        let s = scan(&["A  added.png", " M edited.txt", "MM both.txt", "?? untracked.bin"]);

        let staged = s.changes(true);
        assert_eq!(staged.new_files.len(), 1);
        assert_eq!(staged.new_files[0].path, "added.png");
        assert_eq!(staged.modified.len(), 1);
        assert_eq!(staged.modified[0].path, "both.txt");

        let unstaged = s.changes(false);
        assert_eq!(unstaged.modified.len(), 2);
        assert_eq!(unstaged.new_files.len(), 1);
        assert_eq!(unstaged.new_files[0].path, "untracked.bin");
    }

    #[test]
    fn rename_carries_old_path() {
        // -z format: "R  new\0old"
        let s = StatusScan::parse("R  new_name.txt\0old_name.txt\0");
        let staged = s.changes(true);
        assert_eq!(staged.renamed.len(), 1);
        assert_eq!(staged.renamed[0].path, "new_name.txt");
        assert_eq!(staged.renamed[0].renamed_from.as_deref(), Some("old_name.txt"));
    }

    #[test]
    fn deleted_in_both_views() {
        let s = scan(&["D  staged_gone.txt", " D unstaged_gone.txt"]);
        assert_eq!(s.changes(true).deleted.len(), 1);
        assert_eq!(s.changes(false).deleted.len(), 1);
    }

    #[test]
    fn conflicts_are_derived_not_stored() {
        let s = scan(&["UU both_modified.txt", "AA both_added.txt", "M  staged.txt"]);
        let conflicts = s.conflicts();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].0, "both_modified.txt");
        assert_eq!(conflicts[0].1.to_string(), "UU");

        // Conflicted paths never appear in either change view.
        assert!(!s.changes(true).iter().any(|c| c.path.contains("both_")));
        assert!(!s.changes(false).iter().any(|c| c.path.contains("both_")));
    }

    #[test]
    fn all_conflict_codes_recognized() {
        let s = scan(&[
            "UU a", "AA b", "DD c", "AU d", "UA e", "DU f", "UD g",
        ]);
        assert_eq!(s.conflicts().len(), 7);
    }

    #[test]
    fn branch_header_parsed() {
        let s = StatusScan::parse("## main...origin/main\0 M file.txt\0");
        assert_eq!(s.branch.as_ref().map(|b| b.as_str()), Some("main"));
        assert_eq!(s.changes(false).modified.len(), 1);
    }

    #[test]
    fn touches_prefix_matches_folders_not_substrings() {
        let mut changes = Changes::default();
        changes
            .modified
            .push(Change::new("Assets/Textures/rock.png", ChangeStatus::Modified));
        assert!(changes.touches_prefix("Assets"));
        assert!(changes.touches_prefix("Assets/Textures"));
        assert!(changes.touches_prefix("Assets/Textures/rock.png"));
        assert!(!changes.touches_prefix("Asset"));
        assert!(!changes.touches_prefix("Assets/Tex"));
    }

    #[test]
    fn touches_prefix_sees_rename_origin() {
        let mut changes = Changes::default();
        changes.renamed.push(Change {
            path: "NewHome/file.txt".into(),
            renamed_from: Some("OldHome/file.txt".into()),
            status: ChangeStatus::Renamed,
        });
        assert!(changes.touches_prefix("OldHome"));
        assert!(changes.touches_prefix("NewHome"));
    }

    #[test]
    fn typechange_counts_as_modified() {
        let s = scan(&["T  pointer.bin"]);
        assert_eq!(s.changes(true).modified.len(), 1);
    }
}
