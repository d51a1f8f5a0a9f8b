//! repo
//!
//! The Repository Handle: the façade bound to one working copy.
//!
//! All mutating operations (stage, commit, branch, merge, remote) and
//! pure queries (status, history, conflicts) live on
//! [`handle::Repository`]. The handle owns the engine bridge, heals
//! stale lock artifacts before every mutation, and keeps no persistent
//! state of its own beyond short-lived lookaside fields invalidated on
//! each mutating call.
//!
//! A handle is not thread-safe; callers serialize operations per
//! working copy and run long operations through the host task runner.
//!
//! # Modules
//!
//! - [`handle`] - The `Repository` façade
//! - [`status`] - Pending-change model and porcelain parsing
//! - [`history`] - History entries and three-way classification
//! - [`lfs`] - Large-file pointers and content addressing
//! - [`lock`] - Index-lock self-healing

pub mod handle;
pub mod history;
pub mod lfs;
pub mod lock;
pub mod status;

pub use handle::{Branch, HistoryQuery, RepoError, Repository};
pub use history::{HistoryEntry, HistoryKind, MergeCaption};
pub use status::{Change, ChangeStatus, Changes, ConflictCode};
