//! Integration tests for sparse materialization.
//!
//! A committed tree with several top-level folders is narrowed and
//! widened through the manager; safety rules (dirty folders, last
//! root, bookkeeping folder) are exercised against the real engine.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use towline::process::bridge::CancelToken;
use towline::repo::Repository;
use towline::sparse::{SparseError, SparseManager, DEFAULT_BOOKKEEPING_ROOT};

/// A repository with folders `Art/{Props,Maps}`, `Audio`, `Code`, and
/// the bookkeeping folder, all committed.
struct SparseFixture {
    dir: TempDir,
}

impl SparseFixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        for file in [
            "Art/Props/crate.txt",
            "Art/Maps/town.txt",
            "Audio/theme.txt",
            "Code/main.txt",
            ".project/settings.txt",
        ] {
            let full = dir.path().join(file);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, "content\n").unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# Project\n").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "Initial layout"]);

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn repo(&self) -> Repository {
        Repository::load(self.path()).expect("failed to load fixture repo")
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

fn manager(repo: &Repository) -> SparseManager<'_> {
    SparseManager::new(repo, DEFAULT_BOOKKEEPING_ROOT)
}

#[test]
fn full_working_copy_reports_every_top_level_root() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    assert!(!sparse.is_sparse().unwrap());
    let roots = sparse.roots().unwrap();
    for folder in ["Art", "Audio", "Code", ".project"] {
        assert!(roots.covers(folder), "expected {folder} covered");
    }
}

#[test]
fn unloading_a_folder_dematerializes_its_subtree() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    let roots = sparse.unload_folder("Audio").unwrap();
    assert!(!roots.covers("Audio"));
    assert!(roots.covers("Art"));
    assert!(roots.covers(DEFAULT_BOOKKEEPING_ROOT));

    assert!(sparse.is_sparse().unwrap());
    assert!(!fixture.path().join("Audio/theme.txt").exists());
    assert!(fixture.path().join("Art/Props/crate.txt").exists());
    // Top-level files survive narrowing.
    assert!(fixture.path().join("README.md").exists());
}

#[test]
fn unloading_twice_is_idempotent() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    let once = sparse.unload_folder("Audio").unwrap();
    let twice = sparse.unload_folder("Audio").unwrap();
    assert_eq!(once, twice);
}

#[test]
fn unloading_a_subfolder_keeps_its_siblings() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    let roots = sparse.unload_folder("Art/Props").unwrap();
    assert!(!roots.covers("Art/Props"));
    assert!(roots.covers("Art/Maps"));
    assert!(roots.covers("Audio"));

    assert!(!fixture.path().join("Art/Props/crate.txt").exists());
    assert!(fixture.path().join("Art/Maps/town.txt").exists());
}

#[test]
fn unloading_a_dirty_folder_is_refused() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    std::fs::write(fixture.path().join("Audio/new.txt"), "unsaved\n").unwrap();

    let err = sparse.unload_folder("Audio").unwrap_err();
    assert!(matches!(err, SparseError::PendingChanges { .. }));
    // Nothing was narrowed.
    assert!(fixture.path().join("Audio/theme.txt").exists());
}

#[test]
fn unloading_the_last_content_root_is_refused() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    sparse.unload_folder("Audio").unwrap();
    sparse.unload_folder("Code").unwrap();

    let err = sparse.unload_folder("Art").unwrap_err();
    assert!(matches!(err, SparseError::LastRoot { .. }));
    assert!(fixture.path().join("Art/Props/crate.txt").exists());
}

#[test]
fn the_bookkeeping_folder_is_never_removable() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    sparse.unload_folder("Audio").unwrap();
    let err = sparse.unload_folder(DEFAULT_BOOKKEEPING_ROOT).unwrap_err();
    assert!(matches!(err, SparseError::LastRoot { .. }));
}

#[test]
fn reloading_every_folder_collapses_to_full() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    sparse.unload_folder("Audio").unwrap();
    assert!(sparse.is_sparse().unwrap());

    let cancel = CancelToken::new();
    sparse
        .load_folder("Audio", &mut |_line| {}, &cancel)
        .unwrap();

    // The root set covered everything again, so sparse mode was
    // disabled outright rather than kept as an explicit full list.
    assert!(!sparse.is_sparse().unwrap());
    assert!(fixture.path().join("Audio/theme.txt").exists());
}

#[test]
fn loading_an_already_materialized_folder_is_a_noop() {
    let fixture = SparseFixture::new();
    let repo = fixture.repo();
    let sparse = manager(&repo);

    let cancel = CancelToken::new();
    sparse
        .load_folder("Art", &mut |_line| {}, &cancel)
        .unwrap();
    assert!(!sparse.is_sparse().unwrap());
}
