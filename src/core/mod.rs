//! core
//!
//! Core domain types and path routing for Towline.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, ContentHash
//! - [`paths`] - Centralized path routing for working-copy storage
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Everything crossing the subprocess boundary is validated here

pub mod paths;
pub mod types;
