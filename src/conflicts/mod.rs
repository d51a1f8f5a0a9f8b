//! Merge conflict classification and bulk resolution.
//!
//! Each conflicted path is classified by its two-letter merge-status
//! code into one of six categories; resolution is bulk "take ours" or
//! "take theirs", mapping deterministically per category to
//! checkout-ours, checkout-theirs, or remove. The one exception is the
//! line-oriented attributes file, which is reconciled by keeping the
//! union of both sides: dropping either side's declarations would
//! silently break large-file tracking.

use thiserror::Error;

use crate::repo::{ConflictCode, RepoError, Repository};

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local side.
    TakeOurs,
    /// Keep the incoming side.
    TakeTheirs,
}

/// The six conflict categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// `UU`: modified on both sides.
    BothModified,
    /// `AU`: added by us, updated by them.
    AddedByUs,
    /// `UA`: added by them, updated by us.
    AddedByThem,
    /// `AA`: added independently on both sides.
    BothAdded,
    /// `DU`: deleted by us, updated by them.
    DeletedByUs,
    /// `UD`: updated by us, deleted by them.
    DeletedByThem,
    /// `DD`: deleted on both sides.
    BothDeleted,
}

impl ConflictKind {
    /// Classify a two-letter merge-status code.
    pub fn from_code(code: ConflictCode) -> Option<Self> {
        match (code.ours, code.theirs) {
            ('U', 'U') => Some(Self::BothModified),
            ('A', 'U') => Some(Self::AddedByUs),
            ('U', 'A') => Some(Self::AddedByThem),
            ('A', 'A') => Some(Self::BothAdded),
            ('D', 'U') => Some(Self::DeletedByUs),
            ('U', 'D') => Some(Self::DeletedByThem),
            ('D', 'D') => Some(Self::BothDeleted),
            _ => None,
        }
    }

    /// The concrete action a resolution maps to for this category.
    ///
    /// Both-deleted always removes regardless of the requested side;
    /// "keeping" a file neither side has is meaningless. Taking a side
    /// that does not have the file likewise removes: the side that
    /// deleted it, or, for a one-sided add, the side that never added
    /// it (there is no index stage to check out there).
    pub fn action(self, resolution: Resolution) -> ResolveAction {
        use ConflictKind::*;
        use Resolution::*;
        match (self, resolution) {
            (BothDeleted, _) => ResolveAction::Remove,
            (DeletedByUs, TakeOurs) => ResolveAction::Remove,
            (DeletedByThem, TakeTheirs) => ResolveAction::Remove,
            (AddedByUs, TakeTheirs) => ResolveAction::Remove,
            (AddedByThem, TakeOurs) => ResolveAction::Remove,
            (_, TakeOurs) => ResolveAction::CheckoutOurs,
            (_, TakeTheirs) => ResolveAction::CheckoutTheirs,
        }
    }
}

/// The per-path action applied during bulk resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    CheckoutOurs,
    CheckoutTheirs,
    Remove,
}

/// Errors from conflict resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The path's merge-status code is not a known conflict shape.
    #[error("unrecognized conflict code {code} for '{path}'")]
    UnknownCode {
        /// The conflicted path.
        path: String,
        /// Its two-letter code.
        code: ConflictCode,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Opening marker of a conflicted region.
const MARKER_OURS: &str = "<<<<<<<";
/// Separator between the two sides.
const MARKER_SPLIT: &str = "=======";
/// Closing marker of a conflicted region.
const MARKER_THEIRS: &str = ">>>>>>>";

/// Reconcile a line-oriented file by keeping the union of both sides.
///
/// Lines outside conflicted regions pass through; within a region both
/// sides' lines are kept (ours first), with duplicates across the
/// whole file collapsed to their first occurrence.
pub fn union_merge(content: &str) -> String {
    #[derive(PartialEq)]
    enum Region {
        Outside,
        Ours,
        Theirs,
    }

    let mut region = Region::Outside;
    let mut seen = std::collections::HashSet::new();
    let mut merged = String::new();

    for line in content.lines() {
        if line.starts_with(MARKER_OURS) {
            region = Region::Ours;
            continue;
        }
        if line.starts_with(MARKER_SPLIT) && region == Region::Ours {
            region = Region::Theirs;
            continue;
        }
        if line.starts_with(MARKER_THEIRS) {
            region = Region::Outside;
            continue;
        }
        let keep = line.trim().is_empty() || seen.insert(line.trim().to_string());
        if keep {
            merged.push_str(line);
            merged.push('\n');
        }
    }
    merged
}

/// Resolver bound to one repository handle.
pub struct ConflictResolver<'a> {
    repo: &'a Repository,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Conflicted paths with their categories.
    pub fn classified(&self) -> Result<Vec<(String, ConflictKind)>, ResolveError> {
        let mut out = Vec::new();
        for (path, code) in self.repo.conflict_entries()? {
            let kind = ConflictKind::from_code(code)
                .ok_or_else(|| ResolveError::UnknownCode {
                    path: path.clone(),
                    code,
                })?;
            out.push((path, kind));
        }
        Ok(out)
    }

    /// Resolve conflicts in bulk, taking one side.
    ///
    /// With `paths = None` every conflicted path is resolved; otherwise
    /// only the listed ones. Each resolved path is staged, so an empty
    /// conflict list afterwards means the merge can be committed.
    pub fn resolve(
        &self,
        resolution: Resolution,
        paths: Option<&[&str]>,
    ) -> Result<(), ResolveError> {
        let selected: Vec<(String, ConflictKind)> = self
            .classified()?
            .into_iter()
            .filter(|(path, _)| match paths {
                Some(wanted) => wanted.contains(&path.as_str()),
                None => true,
            })
            .collect();

        let mut checkout_ours = Vec::new();
        let mut checkout_theirs = Vec::new();
        let mut remove = Vec::new();

        for (path, kind) in &selected {
            if path == ".gitattributes" && *kind == ConflictKind::BothModified {
                self.reconcile_attributes(path)?;
                continue;
            }
            match kind.action(resolution) {
                ResolveAction::CheckoutOurs => checkout_ours.push(path.clone()),
                ResolveAction::CheckoutTheirs => checkout_theirs.push(path.clone()),
                ResolveAction::Remove => remove.push(path.clone()),
            }
        }

        self.checkout_side("--ours", &checkout_ours)?;
        self.checkout_side("--theirs", &checkout_theirs)?;

        if !remove.is_empty() {
            let mut args = vec!["rm", "--force", "--"];
            args.extend(remove.iter().map(String::as_str));
            self.repo
                .engine()
                .run(&args, self.repo.work_dir())
                .map_err(RepoError::from)?;
        }

        let staged: Vec<&str> = checkout_ours
            .iter()
            .chain(checkout_theirs.iter())
            .map(String::as_str)
            .collect();
        self.repo.stage_files(&staged)?;
        Ok(())
    }

    fn checkout_side(&self, side: &str, paths: &[String]) -> Result<(), ResolveError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["checkout", side, "--"];
        args.extend(paths.iter().map(String::as_str));
        self.repo
            .engine()
            .run(&args, self.repo.work_dir())
            .map_err(RepoError::from)?;
        Ok(())
    }

    /// Union-merge the attributes file instead of taking one side.
    fn reconcile_attributes(&self, path: &str) -> Result<(), ResolveError> {
        let full = self.repo.paths().in_work_dir(path);
        let content = std::fs::read_to_string(&full).map_err(RepoError::from)?;
        std::fs::write(&full, union_merge(&content)).map_err(RepoError::from)?;
        self.repo.stage_files(&[path])?;
        tracing::info!("kept both sides of {path} during conflict resolution");
        Ok(())
    }
}
