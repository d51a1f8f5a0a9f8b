//! Towline - A synchronization layer over an external version-control engine
//!
//! Towline drives the `git` binary and its large-file helper to give a
//! host application team-friendly version control: pull and push as
//! safe multi-step transactions, sparse materialization of huge
//! working trees, shelving around updates, bulk conflict resolution,
//! and a deterministic taxonomy over raw engine failures.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`process`] - Subprocess bridge (environment overlay, streaming, progress parsing)
//! - [`repo`] - The repository handle: one façade per working copy
//! - [`sync`] - Pull/push transactions with shelving and cancellation
//! - [`sparse`] - Sparse checkout root-set algebra and materialization
//! - [`stash`] - One-shelf-per-branch change parking
//! - [`conflicts`] - Conflict classification and bulk resolution
//! - [`classify`] - The ordered failure taxonomy and its remedies
//! - [`host`] - Interfaces to the embedding application
//! - [`core`] - Validated domain types and path routing
//!
//! # Correctness Invariants
//!
//! Towline maintains the following invariants:
//!
//! 1. Every history entry carries exactly one local/remote/synced kind
//! 2. At most one shelf exists per branch; a duplicate shelve fails
//! 3. Cancellation never interrupts ref or index mutation
//! 4. Engine error text is interpreted in exactly one place
//! 5. Dematerializing a folder with pending changes is refused

pub mod classify;
pub mod conflicts;
pub mod core;
pub mod host;
pub mod process;
pub mod repo;
pub mod sparse;
pub mod stash;
pub mod sync;
