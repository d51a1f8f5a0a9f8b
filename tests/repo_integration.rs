//! Integration tests for the repository handle.
//!
//! These tests drive real repositories created via tempfile to verify
//! the handle against actual engine behavior: status projection,
//! history classification, branching, merging, and shelving.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use towline::conflicts::{ConflictKind, ConflictResolver, Resolution};
use towline::core::types::BranchName;
use towline::repo::{HistoryKind, HistoryQuery, RepoError, Repository};
use towline::stash::{RestoreOutcome, ShelfError, ShelfManager};

/// Test fixture that creates a real repository with one commit.
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        std::fs::write(dir.path().join("README.md"), "# Test Repo\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-m", "Initial commit"]);

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn repo(&self) -> Repository {
        Repository::load(self.path()).expect("failed to load test repo")
    }

    fn write(&self, path: &str, content: &str) {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    fn commit_file(&self, path: &str, content: &str, message: &str) {
        self.write(path, content);
        run_git(self.path(), &["add", path]);
        run_git(self.path(), &["commit", "-m", message]);
    }

    fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.path().join(path)).unwrap()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");

    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

fn branch(name: &str) -> BranchName {
    BranchName::new(name).unwrap()
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn load_valid_working_copy() {
    let repo = TestRepo::new();
    assert!(Repository::load(repo.path()).is_ok());
}

#[test]
fn load_from_subdirectory_finds_root() {
    let repo = TestRepo::new();
    let subdir = repo.path().join("subdir");
    std::fs::create_dir(&subdir).unwrap();

    let handle = Repository::load(&subdir).unwrap();
    assert_eq!(
        handle.work_dir().canonicalize().unwrap(),
        repo.path().canonicalize().unwrap()
    );
}

#[test]
fn load_non_repository_fails() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Repository::load(dir.path()),
        Err(RepoError::NotAWorkingCopy { .. })
    ));
}

#[test]
fn init_creates_unborn_working_copy() {
    let dir = TempDir::new().unwrap();
    let handle = Repository::init(&dir.path().join("fresh")).unwrap();
    assert!(handle.is_unborn().unwrap());
    assert!(handle.head_oid().unwrap().is_none());
    assert!(handle.history(&HistoryQuery::default()).unwrap().is_empty());
}

#[test]
fn unborn_branch_still_has_a_name() {
    let dir = TempDir::new().unwrap();
    let handle = Repository::init(&dir.path().join("fresh")).unwrap();
    assert!(handle.current_branch().unwrap().is_some());
}

// =============================================================================
// Status
// =============================================================================

#[test]
fn staged_and_unstaged_views_from_one_scan() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    repo.write("staged.txt", "staged\n");
    run_git(repo.path(), &["add", "staged.txt"]);
    repo.write("untracked.txt", "loose\n");
    repo.write("README.md", "# Edited\n");

    let staged = handle.pending_changes(true).unwrap();
    assert_eq!(staged.new_files.len(), 1);
    assert_eq!(staged.new_files[0].path, "staged.txt");

    let unstaged = handle.pending_changes(false).unwrap();
    assert_eq!(unstaged.new_files.len(), 1);
    assert_eq!(unstaged.new_files[0].path, "untracked.txt");
    assert_eq!(unstaged.modified.len(), 1);
    assert_eq!(unstaged.modified[0].path, "README.md");
}

#[test]
fn clean_tree_has_nothing_pending() {
    let repo = TestRepo::new();
    assert!(!repo.repo().has_pending_changes().unwrap());
}

#[test]
fn commit_through_the_handle() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    repo.write("file.txt", "content\n");
    handle.stage_files(&["file.txt"]).unwrap();
    let oid = handle.commit("Add file").unwrap();

    assert_eq!(handle.head_oid().unwrap(), Some(oid));
    assert!(!handle.has_pending_changes().unwrap());
}

#[test]
fn restore_file_resurrects_old_content() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let first = handle.head_oid().unwrap().unwrap();

    repo.commit_file("README.md", "# Rewritten\n", "Rewrite readme");
    handle.restore_file("README.md", first.as_str()).unwrap();

    assert_eq!(repo.read("README.md"), "# Test Repo\n");
    let staged = handle.pending_changes(true).unwrap();
    assert!(staged.iter().any(|c| c.path == "README.md"));
}

#[test]
fn discard_restores_committed_content() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    repo.write("README.md", "# Scribbled over\n");
    handle.discard(&["README.md"]).unwrap();
    assert_eq!(repo.read("README.md"), "# Test Repo\n");
}

// =============================================================================
// Branches and history
// =============================================================================

#[test]
fn create_and_switch_branches() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.create_branch(&branch("feature/fx")).unwrap();
    assert_eq!(
        handle.current_branch().unwrap().unwrap().as_str(),
        "feature/fx"
    );

    handle.switch_branch(&branch("main")).unwrap();
    assert_eq!(handle.current_branch().unwrap().unwrap().as_str(), "main");

    let branches = handle.branches().unwrap();
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    assert!(names.contains(&"main"));
    assert!(names.contains(&"feature/fx"));
    assert!(branches.iter().all(|b| b.is_local));
}

#[test]
fn history_without_upstream_is_all_local() {
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a\n", "Second commit");

    let entries = repo.repo().history(&HistoryQuery::default()).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.kind == HistoryKind::Local));
    assert_eq!(entries[0].message, "Second commit");
}

#[test]
fn history_classifies_against_upstream() {
    let remote_dir = TempDir::new().unwrap();
    run_git(remote_dir.path(), &["init", "--bare"]);
    let remote_url = remote_dir.path().to_string_lossy().to_string();

    let repo = TestRepo::new();
    run_git(repo.path(), &["remote", "add", "origin", &remote_url]);
    run_git(repo.path(), &["push", "--set-upstream", "origin", "main"]);

    repo.commit_file("local.txt", "mine\n", "Local only");

    let entries = repo.repo().history(&HistoryQuery::default()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].kind, HistoryKind::Local);
    assert_eq!(entries[1].kind, HistoryKind::Synced);
}

#[test]
fn max_count_caps_the_window() {
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a\n", "Two");
    repo.commit_file("b.txt", "b\n", "Three");

    let query = HistoryQuery {
        max_count: Some(2),
        ..Default::default()
    };
    assert_eq!(repo.repo().history(&query).unwrap().len(), 2);
}

// =============================================================================
// Merging and conflicts
// =============================================================================

/// Two branches touching different files merge cleanly.
#[test]
fn merge_without_conflicts_reports_did_merge() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.create_branch(&branch("side")).unwrap();
    repo.commit_file("side.txt", "side\n", "Side work");
    handle.switch_branch(&branch("main")).unwrap();

    assert!(handle.merge_branch(&branch("side")).unwrap());
    // Merging again has nothing to do.
    assert!(!handle.merge_branch(&branch("side")).unwrap());
}

/// Two branches modifying the same line: the merge raises a
/// conflict-flavored error and the path classifies as both-modified.
#[test]
fn conflicting_merge_surfaces_the_paths() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.create_branch(&branch("side")).unwrap();
    repo.commit_file("shared.txt", "theirs\n", "Their line");
    handle.switch_branch(&branch("main")).unwrap();
    repo.commit_file("shared.txt", "ours\n", "Our line");

    let err = handle.merge_branch(&branch("side")).unwrap_err();
    let RepoError::MergeConflicts { paths } = err else {
        panic!("expected merge conflicts, got {err}");
    };
    assert_eq!(paths, vec!["shared.txt".to_string()]);

    let classified = ConflictResolver::new(&handle).classified().unwrap();
    assert_eq!(
        classified,
        vec![("shared.txt".to_string(), ConflictKind::BothModified)]
    );
}

#[test]
fn bulk_resolution_takes_one_side_and_stages() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.create_branch(&branch("side")).unwrap();
    repo.commit_file("shared.txt", "theirs\n", "Their line");
    handle.switch_branch(&branch("main")).unwrap();
    repo.commit_file("shared.txt", "ours\n", "Our line");
    let _ = handle.merge_branch(&branch("side"));

    ConflictResolver::new(&handle)
        .resolve(Resolution::TakeTheirs, None)
        .unwrap();

    assert!(handle.conflicts(None).unwrap().is_empty());
    assert_eq!(repo.read("shared.txt"), "theirs\n");
}

/// A file/directory collision produces a one-sided `AU` conflict (the
/// colliding file has no "theirs" stage); bulk resolution must still
/// succeed on it by removing the file when the absent side is taken.
#[test]
fn one_sided_add_conflict_resolves_by_removal() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.create_branch(&branch("side")).unwrap();
    repo.commit_file("conf/f.txt", "dir side\n", "Add directory");
    handle.switch_branch(&branch("main")).unwrap();
    repo.commit_file("conf", "file side\n", "Add file");

    let err = handle.merge_branch(&branch("side")).unwrap_err();
    assert!(matches!(err, RepoError::MergeConflicts { .. }));

    ConflictResolver::new(&handle)
        .resolve(Resolution::TakeTheirs, None)
        .unwrap();
    assert!(handle.conflicts(None).unwrap().is_empty());
}

// =============================================================================
// Shelving
// =============================================================================

#[test]
fn shelve_restore_round_trip_is_lossless() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);
    let main = branch("main");

    repo.write("README.md", "# Edited\n");
    repo.write("untracked.txt", "loose\n");

    assert!(shelves.shelve(&main, true).unwrap());
    assert!(!handle.has_pending_changes().unwrap());

    assert_eq!(shelves.restore(&main).unwrap(), RestoreOutcome::Applied);
    assert_eq!(repo.read("README.md"), "# Edited\n");
    assert_eq!(repo.read("untracked.txt"), "loose\n");

    // The shelf is gone after a clean restore.
    assert!(shelves.find(&main).unwrap().is_none());
}

#[test]
fn second_shelve_on_same_branch_fails_fast() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);
    let main = branch("main");

    repo.write("README.md", "# First edit\n");
    assert!(shelves.shelve(&main, true).unwrap());

    repo.write("README.md", "# Second edit\n");
    assert!(matches!(
        shelves.shelve(&main, true),
        Err(ShelfError::AlreadyShelved { .. })
    ));
}

#[test]
fn shelving_a_clean_tree_is_nothing_to_do() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);

    assert!(!shelves.shelve(&branch("main"), true).unwrap());
    assert_eq!(
        shelves.restore(&branch("main")).unwrap(),
        RestoreOutcome::NothingToRestore
    );
}

#[test]
fn shelve_without_untracked_leaves_loose_files() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);
    let main = branch("main");

    repo.write("README.md", "# Edited\n");
    repo.write("untracked.txt", "loose\n");

    assert!(shelves.shelve(&main, false).unwrap());
    // The tracked edit went into the shelf; the loose file stayed behind.
    assert_eq!(repo.read("README.md"), "# Test Repo\n");
    assert_eq!(repo.read("untracked.txt"), "loose\n");

    assert_eq!(shelves.restore(&main).unwrap(), RestoreOutcome::Applied);
    assert_eq!(repo.read("README.md"), "# Edited\n");
}

#[test]
fn shelve_without_untracked_on_loose_only_tree_is_nothing_to_do() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);

    repo.write("untracked.txt", "loose\n");

    assert!(!shelves.shelve(&branch("main"), false).unwrap());
    assert_eq!(repo.read("untracked.txt"), "loose\n");
}

#[test]
fn discard_drops_the_shelf_without_applying() {
    let repo = TestRepo::new();
    let handle = repo.repo();
    let shelves = ShelfManager::new(&handle);
    let main = branch("main");

    repo.write("README.md", "# Edited\n");
    shelves.shelve(&main, true).unwrap();

    assert!(shelves.discard(&main).unwrap());
    assert!(shelves.find(&main).unwrap().is_none());
    assert_eq!(repo.read("README.md"), "# Test Repo\n");
}

// =============================================================================
// Local excludes and attributes
// =============================================================================

#[test]
fn local_excludes_append_without_duplicates() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.append_local_excludes(&["*.tmp", "cache/"]).unwrap();
    handle.append_local_excludes(&["*.tmp", "*.bak"]).unwrap();

    let exclude = std::fs::read_to_string(handle.paths().info_exclude()).unwrap();
    assert_eq!(exclude.matches("*.tmp").count(), 1);
    assert!(exclude.contains("cache/"));
    assert!(exclude.contains("*.bak"));
}

#[test]
fn tracking_patterns_writes_and_stages_attributes() {
    let repo = TestRepo::new();
    let handle = repo.repo();

    handle.track_lfs_patterns(&["*.png", "*.fbx"]).unwrap();
    handle.track_lfs_patterns(&["*.png"]).unwrap();

    let attributes = repo.read(".gitattributes");
    assert_eq!(attributes.matches("*.png filter=lfs").count(), 1);
    assert!(attributes.contains("*.fbx filter=lfs"));
    assert!(handle.uses_lfs());

    let staged = handle.pending_changes(true).unwrap();
    assert!(staged.iter().any(|c| c.path == ".gitattributes"));
}
