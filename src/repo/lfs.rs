//! repo::lfs
//!
//! Large-file pointer parsing and content addressing.
//!
//! Binary-tracked files are versioned as small pointer files; the real
//! content lives in the LFS store and is fetched on demand. This module
//! parses pointers and models the lazily-resolved object reference. The
//! two-step hash lookup (commit, then its first parent for deleted
//! paths) lives on the repository handle, which owns the engine.

use crate::core::types::ContentHash;

/// A parsed LFS pointer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    /// SHA-256 of the object's content.
    pub hash: ContentHash,
    /// Object size in bytes.
    pub size: u64,
}

/// A lazily-resolved large object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsObjectRef {
    /// The content address.
    pub content_hash: ContentHash,
    /// Repository-relative path of the pointer file.
    pub relative_path: String,
}

/// Maximum size of a plausible pointer file. Real content is never
/// this small and pointers are never larger; used to skip reading
/// binary blobs when probing.
pub const MAX_POINTER_SIZE: u64 = 1024;

/// Parse LFS pointer text.
///
/// A pointer is line-oriented: a `version` line with the LFS spec URL,
/// an `oid sha256:<hash>` line, and a `size <bytes>` line, in that
/// order. Returns `None` for anything else (including real file
/// content that happens to be small).
///
/// # Example
///
/// ```
/// use towline::repo::lfs::parse_pointer;
///
/// let text = "version https://git-lfs.github.com/spec/v1\n\
///             oid sha256:4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393\n\
///             size 12345\n";
/// let pointer = parse_pointer(text).unwrap();
/// assert_eq!(pointer.size, 12345);
/// ```
pub fn parse_pointer(text: &str) -> Option<LfsPointer> {
    let mut lines = text.lines();

    let version = lines.next()?;
    if !version.starts_with("version https://git-lfs.github.com/spec/")
        && !version.starts_with("version https://hawser.github.com/spec/")
    {
        return None;
    }

    let mut hash = None;
    let mut size = None;
    for line in lines {
        if let Some(rest) = line.strip_prefix("oid sha256:") {
            hash = ContentHash::new(rest.trim()).ok();
        } else if let Some(rest) = line.strip_prefix("size ") {
            size = rest.trim().parse::<u64>().ok();
        }
    }

    Some(LfsPointer {
        hash: hash?,
        size: size?,
    })
}

/// Render a `.gitattributes` track line for one file pattern.
pub fn track_attribute_line(pattern: &str) -> String {
    format!("{} filter=lfs diff=lfs merge=lfs -text", pattern)
}
