//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Oid`] - Git object identifier (SHA-1, 40 hex chars)
//! - [`ContentHash`] - LFS content address (SHA-256, 64 hex chars)
//! - [`BranchName`] - Validated Git branch name
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs downstream
//! of the subprocess boundary, where everything starts life as text.
//!
//! # Examples
//!
//! ```
//! use towline::core::types::{BranchName, Oid};
//!
//! let branch = BranchName::new("feature/lighting-pass").unwrap();
//! let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
//!
//! assert!(BranchName::new("invalid..name").is_err());
//! assert!(Oid::new("not-a-sha").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid content hash: {0}")]
    InvalidContentHash(String),
}

/// A validated Git object identifier (full 40-character SHA-1 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` unless the input is exactly 40
    /// hex characters.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into();
        if oid.len() != 40 || !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(oid));
        }
        Ok(Self(oid.to_ascii_lowercase()))
    }

    /// Get the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get an abbreviated prefix for display.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

/// An LFS content address: the SHA-256 of the large object's bytes.
///
/// This is the `oid sha256:<hash>` field of an LFS pointer file, not a
/// Git object id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new validated content hash.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidContentHash` unless the input is
    /// exactly 64 hex characters.
    pub fn new(hash: impl Into<String>) -> Result<Self, TypeError> {
        let hash = hash.into();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidContentHash(hash));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Get the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see
/// `git check-ref-format`): non-empty, no leading `.` or `-`, no
/// trailing `.lock` or `/`, no `..`, `@{`, `//`, no spaces or
/// `~ ^ : \ ? * [`, not exactly `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates
    /// Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }
        if name == "@" {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be '@'".into(),
            ));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name cannot start with '{}'",
                &name[..1]
            )));
        }
        if name.ends_with(".lock") || name.ends_with('/') || name.ends_with('.') {
            return Err(TypeError::InvalidBranchName(
                "invalid branch name suffix".into(),
            ));
        }
        for forbidden in ["..", "@{", "//"] {
            if name.contains(forbidden) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{}'",
                    forbidden
                )));
            }
        }
        for ch in name.chars() {
            if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '\\' | '?' | '*' | '[')
            {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{}'",
                    ch.escape_default()
                )));
            }
        }
        Ok(())
    }

    /// Get the branch name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The full local ref for this branch (`refs/heads/<name>`).
    pub fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.0)
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod oid {
        use super::*;

        #[test]
        fn valid_oid() {
            let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
            assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
        }

        #[test]
        fn uppercase_is_normalized() {
            let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
            assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
        }

        #[test]
        fn wrong_length_rejected() {
            assert!(Oid::new("abc123").is_err());
            assert!(Oid::new("").is_err());
        }

        #[test]
        fn non_hex_rejected() {
            assert!(Oid::new("zzz123def4567890abc123def4567890abc12345").is_err());
        }

        #[test]
        fn short_prefix() {
            let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
            assert_eq!(oid.short(7), "abc123d");
        }
    }

    mod content_hash {
        use super::*;

        #[test]
        fn valid_hash() {
            let h = "a".repeat(64);
            assert!(ContentHash::new(h).is_ok());
        }

        #[test]
        fn sha1_length_rejected() {
            assert!(ContentHash::new("a".repeat(40)).is_err());
        }
    }

    mod branch_name {
        use super::*;

        #[test]
        fn valid_names() {
            for name in ["main", "feature/lighting-pass", "user@feature", "v1.2"] {
                assert!(BranchName::new(name).is_ok(), "{name} should be valid");
            }
        }

        #[test]
        fn invalid_names() {
            for name in [
                "", "@", ".hidden", "-flag", "a..b", "a@{b", "a//b", "end.lock", "end/",
                "has space", "car^et", "col:on", "ques?tion", "st*ar",
            ] {
                assert!(BranchName::new(name).is_err(), "{name} should be invalid");
            }
        }

        #[test]
        fn local_ref() {
            let name = BranchName::new("main").unwrap();
            assert_eq!(name.local_ref(), "refs/heads/main");
        }
    }
}
