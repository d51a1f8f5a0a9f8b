//! process::progress
//!
//! Classification of engine progress lines.
//!
//! The engine paints free-text progress on stderr while transferring
//! ("Receiving objects:  42% (10/23)", "Filtering content: 100%
//! (23/23), 90.5 MiB | 1.2 MiB/s, done."). This module maps those lines
//! onto a closed set of transfer phases via a fixed-priority list of
//! hand parsers, unit-testable with no subprocess involved.
//!
//! Unrecognized lines are never fatal; they classify as
//! [`LineClass::Other`] and are forwarded for logging only.

/// The canonical transfer phases the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOp {
    /// Counting objects to send or receive.
    Counting,
    /// Delta-compressing objects.
    Compressing,
    /// Writing objects to the remote.
    Writing,
    /// Receiving objects from the remote.
    Receiving,
    /// Downloading large-file content.
    Downloading,
    /// Uploading large-file content.
    Uploading,
    /// Resolving deltas after transfer.
    Resolving,
    /// Updating working tree files.
    Updating,
    /// Smudging large-file pointers into content.
    Filtering,
}

impl TransferOp {
    /// Human-readable label for progress display.
    pub fn label(&self) -> &'static str {
        match self {
            TransferOp::Counting => "Counting objects",
            TransferOp::Compressing => "Compressing objects",
            TransferOp::Writing => "Writing objects",
            TransferOp::Receiving => "Receiving objects",
            TransferOp::Downloading => "Downloading large files",
            TransferOp::Uploading => "Uploading large files",
            TransferOp::Resolving => "Resolving deltas",
            TransferOp::Updating => "Updating files",
            TransferOp::Filtering => "Filtering content",
        }
    }
}

/// A parsed progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// The transfer phase.
    pub op: TransferOp,
    /// Items completed so far.
    pub current: u64,
    /// Total items, when the engine reports one.
    pub max: u64,
    /// The engine's own label text, verbatim.
    pub label: String,
}

impl ProgressUpdate {
    /// Completion fraction in `[0, 1]`, or `None` when the total is
    /// unknown (indeterminate progress).
    pub fn fraction(&self) -> Option<f64> {
        if self.max == 0 {
            None
        } else {
            Some((self.current as f64 / self.max as f64).clamp(0.0, 1.0))
        }
    }
}

/// Classification of one engine output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// A recognized progress report.
    Progress(ProgressUpdate),
    /// Anything else; forwarded verbatim for logging only.
    Other(String),
}

/// The fixed-priority classifier table. More specific prefixes first;
/// the two LFS lines must precede the generic object phases because
/// the helper echoes both during a checkout.
const CLASSIFIERS: &[(&str, TransferOp)] = &[
    ("Downloading LFS objects", TransferOp::Downloading),
    ("Uploading LFS objects", TransferOp::Uploading),
    ("Filtering content", TransferOp::Filtering),
    ("Counting objects", TransferOp::Counting),
    ("Enumerating objects", TransferOp::Counting),
    ("Compressing objects", TransferOp::Compressing),
    ("Writing objects", TransferOp::Writing),
    ("Receiving objects", TransferOp::Receiving),
    ("Resolving deltas", TransferOp::Resolving),
    ("Updating files", TransferOp::Updating),
    ("Checking out files", TransferOp::Updating),
];

/// Classify one line of engine output.
///
/// # Example
///
/// ```
/// use towline::process::progress::{classify_line, LineClass, TransferOp};
///
/// match classify_line("Filtering content: 100% (23/23), 90.5 MiB | 1.2 MiB/s, done.") {
///     LineClass::Progress(p) => {
///         assert_eq!(p.op, TransferOp::Filtering);
///         assert_eq!((p.current, p.max), (23, 23));
///     }
///     LineClass::Other(_) => unreachable!(),
/// }
/// ```
pub fn classify_line(line: &str) -> LineClass {
    let trimmed = line.trim();
    for (prefix, op) in CLASSIFIERS {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            if let Some(rest) = rest.strip_prefix(':') {
                if let Some((current, max)) = parse_counts(rest) {
                    return LineClass::Progress(ProgressUpdate {
                        op: *op,
                        current,
                        max,
                        label: prefix.to_string(),
                    });
                }
            }
        }
    }
    LineClass::Other(trimmed.to_string())
}

/// Parse `" 42% (10/23), ..."` into `(current, max)`.
///
/// Prefers the explicit `(current/total)` pair, then the percentage
/// with a max of 100, then a bare running count ("Enumerating objects:
/// 12") with an unknown total of zero.
fn parse_counts(rest: &str) -> Option<(u64, u64)> {
    if let Some(open) = rest.find('(') {
        let tail = &rest[open + 1..];
        if let Some(close) = tail.find(')') {
            let inside = &tail[..close];
            if let Some((cur, max)) = inside.split_once('/') {
                let cur = cur.trim().parse::<u64>().ok()?;
                let max = max.trim().parse::<u64>().ok()?;
                return Some((cur, max));
            }
        }
    }

    if let Some(percent_end) = rest.find('%') {
        let percent = rest[..percent_end].trim().parse::<u64>().ok()?;
        return Some((percent.min(100), 100));
    }

    let digits: String = rest.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some((digits.parse().ok()?, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(line: &str) -> ProgressUpdate {
        match classify_line(line) {
            LineClass::Progress(p) => p,
            LineClass::Other(text) => panic!("expected progress, got Other({text})"),
        }
    }

    #[test]
    fn filtering_content_line() {
        let p = progress("Filtering content: 100% (23/23), 90.5 MiB | 1.2 MiB/s, done.");
        assert_eq!(p.op, TransferOp::Filtering);
        assert_eq!((p.current, p.max), (23, 23));
        assert_eq!(p.fraction(), Some(1.0));
    }

    #[test]
    fn receiving_objects_mid_transfer() {
        let p = progress("Receiving objects:  42% (10/23)");
        assert_eq!(p.op, TransferOp::Receiving);
        assert_eq!((p.current, p.max), (10, 23));
    }

    #[test]
    fn lfs_download_line() {
        let p = progress("Downloading LFS objects:  50% (1/2), 5.2 MB | 1.1 MB/s");
        assert_eq!(p.op, TransferOp::Downloading);
        assert_eq!((p.current, p.max), (1, 2));
    }

    #[test]
    fn lfs_upload_line() {
        let p = progress("Uploading LFS objects: 100% (4/4), 120 MB | 20 MB/s, done.");
        assert_eq!(p.op, TransferOp::Uploading);
    }

    #[test]
    fn all_canonical_phases_recognized() {
        let samples = [
            ("Counting objects: 100% (5/5), done.", TransferOp::Counting),
            ("Compressing objects:  60% (3/5)", TransferOp::Compressing),
            ("Writing objects: 100% (5/5), 1.2 KiB | 1.2 MiB/s, done.", TransferOp::Writing),
            ("Receiving objects: 100% (5/5), done.", TransferOp::Receiving),
            ("Resolving deltas: 100% (2/2), done.", TransferOp::Resolving),
            ("Updating files: 100% (8/8), done.", TransferOp::Updating),
            ("Filtering content:  25% (1/4)", TransferOp::Filtering),
        ];
        for (line, op) in samples {
            assert_eq!(progress(line).op, op, "line: {line}");
        }
    }

    #[test]
    fn enumerating_maps_to_counting() {
        assert_eq!(progress("Enumerating objects: 12, done.").op, TransferOp::Counting);
    }

    #[test]
    fn percentage_fallback_without_pair() {
        let p = progress("Receiving objects:  42%");
        assert_eq!((p.current, p.max), (42, 100));
    }

    #[test]
    fn unrecognized_lines_are_other() {
        for line in [
            "remote: Total 5 (delta 0), reused 0 (delta 0)",
            "From https://example.com/repo",
            "   abc1234..def5678  main -> origin/main",
            "",
            "Receiving objects", // no colon, no counts
        ] {
            assert!(
                matches!(classify_line(line), LineClass::Other(_)),
                "line: {line}"
            );
        }
    }

    #[test]
    fn fraction_indeterminate_when_max_zero() {
        let p = ProgressUpdate {
            op: TransferOp::Downloading,
            current: 3,
            max: 0,
            label: "Downloading LFS objects".into(),
        };
        assert_eq!(p.fraction(), None);
    }

    #[test]
    fn leading_whitespace_tolerated() {
        let p = progress("  Updating files:  50% (4/8)");
        assert_eq!(p.op, TransferOp::Updating);
    }
}
