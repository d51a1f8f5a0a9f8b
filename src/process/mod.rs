//! process
//!
//! The Process Bridge: the **single doorway** to the external engine.
//!
//! All interactions with the `git` binary and its LFS helper flow
//! through [`bridge::Engine`]. The bridge normalizes environment and
//! credentials, streams output lines while a process runs, and surfaces
//! non-zero exits as structured errors carrying raw stderr for the
//! classifier. The bridge itself performs **no** text interpretation;
//! see [`crate::classify`] for the single place of pattern truth.
//!
//! # Modules
//!
//! - [`bridge`] - Subprocess invocation, env overlays, cancellation
//! - [`progress`] - Closed set of progress line classifiers

pub mod bridge;
pub mod progress;

pub use bridge::{BridgeError, CancelToken, Engine, EnvOverlay, Output, StreamLine, StreamSource};
pub use progress::{classify_line, LineClass, ProgressUpdate, TransferOp};
