//! sparse
//!
//! Sparse checkout: materializing only a subset of the working tree's
//! folders while keeping full history.
//!
//! [`set`] is the pure root-set algebra (coverage, minimal covering
//! sets, collapse detection); [`manager`] drives the engine around it
//! and enforces the safety rules (no unload with pending changes, no
//! removal of the last root, content fetched before widening and
//! evicted only after narrowing).

pub mod manager;
pub mod set;

pub use manager::{SparseError, SparseManager, BOOKKEEPING_ROOT_KEY, DEFAULT_BOOKKEEPING_ROOT};
pub use set::SparseRootSet;
