//! Pure root-set algebra for sparse materialization.
//!
//! A folder is materialized iff it or an ancestor is in the root set.
//! All mutation here is pure computation over normalized relative
//! paths; the engine-facing side lives in [`super::manager`].

use std::collections::BTreeSet;

/// Normalize a folder path: forward slashes, no leading or trailing
/// separators.
fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Parent folder of a normalized path; `None` at top level.
fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// The set of materialized root folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseRootSet {
    roots: BTreeSet<String>,
}

impl SparseRootSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roots<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for root in roots {
            set.add(root.as_ref());
        }
        set
    }

    /// The roots, in lexicographic order.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether `path` is materialized by this set.
    pub fn covers(&self, path: &str) -> bool {
        let path = normalize(&path);
        self.roots
            .iter()
            .any(|root| *root == path || is_descendant(&path, root))
    }

    /// Whether every listed top-level folder is materialized.
    pub fn covers_all(&self, top_level: &[String]) -> bool {
        !top_level.is_empty() && top_level.iter().all(|f| self.covers(f))
    }

    /// Add a folder as a root, keeping the set minimal: roots made
    /// redundant by the new folder are dropped, and adding an
    /// already-covered folder changes nothing.
    pub fn add(&mut self, folder: &str) -> bool {
        let folder = normalize(folder);
        if folder.is_empty() {
            return false;
        }
        if self.covers(&folder) {
            // Already materialized; still drop redundant descendants
            // so {A, A/B} collapses to {A} on a redundant re-add.
            let before = self.roots.len();
            self.roots.retain(|root| !is_descendant(root, &folder));
            return self.roots.len() != before;
        }
        self.roots.retain(|root| !is_descendant(root, &folder));
        self.roots.insert(folder)
    }

    /// The covering set after removing `folder`'s subtree.
    ///
    /// Removing a root whose ancestor is also a root requires
    /// re-deriving a minimal covering set that keeps everything except
    /// the unloaded subtree: walk up from the folder, re-adding every
    /// sibling at each level (queried through `children_of`), until the
    /// covering ancestor root is reached. Unloading a folder that is
    /// not covered is the identity.
    pub fn unload(
        &self,
        folder: &str,
        children_of: &mut dyn FnMut(Option<&str>) -> Vec<String>,
    ) -> SparseRootSet {
        let folder = normalize(folder);
        let touches = self.covers(&folder)
            || self.roots.iter().any(|root| is_descendant(root, &folder));
        if folder.is_empty() || !touches {
            return self.clone();
        }

        let mut next = self.clone();
        next.roots
            .retain(|root| *root != folder && !is_descendant(root, &folder));

        // Still covered means an ancestor root provides the coverage:
        // replace that root by the sibling frontier around the
        // unloaded path.
        if next.covers(&folder) {
            let ancestor = next
                .roots
                .iter()
                .find(|root| is_descendant(&folder, root))
                .cloned();
            if let Some(ancestor) = ancestor {
                next.roots.remove(&ancestor);
                let mut current = folder.clone();
                loop {
                    let parent = parent_of(&current).map(str::to_string);
                    for sibling in children_of(parent.as_deref()) {
                        let sibling = normalize(&sibling);
                        if sibling != current && !sibling.is_empty() {
                            next.add(&sibling);
                        }
                    }
                    match parent {
                        Some(parent) if parent != ancestor => current = parent,
                        _ => break,
                    }
                }
            }
        }
        next
    }
}
