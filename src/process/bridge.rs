//! process::bridge
//!
//! Subprocess invocation for the external engine.
//!
//! # Contract
//!
//! - [`Engine::run`] collects exit code, stdout, and stderr; a non-zero
//!   exit becomes [`BridgeError::Exit`] carrying the raw stderr text.
//! - [`Engine::run_streaming`] additionally invokes a callback for each
//!   output line while the process is still running, so progress can be
//!   derived mid-transfer.
//! - Environment overlays are additive over the parent environment,
//!   never destructive.
//! - The child's platform console window is suppressed.
//!
//! # Cancellation
//!
//! Cooperative, via [`CancelToken`]: polled between output lines during
//! streaming runs. On cancel the child is killed and the call returns
//! [`BridgeError::Canceled`]. Non-streaming runs are not cancelable;
//! callers wanting a hard stop must route long transfers through the
//! streaming variant.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors from subprocess invocation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The engine binary could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The engine exited with a non-zero status.
    ///
    /// Carries the raw stderr text for the error classifier; the bridge
    /// itself does not interpret it.
    #[error("engine exited with status {code}: {}", first_line(stderr))]
    Exit {
        /// Exit code reported by the engine.
        code: i32,
        /// Raw stdout captured from the run.
        stdout: String,
        /// Raw stderr captured from the run.
        stderr: String,
        /// The argument vector, for diagnostics.
        args: Vec<String>,
    },

    /// The run was canceled via its [`CancelToken`].
    #[error("operation canceled")]
    Canceled,

    /// I/O failure while talking to the child.
    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// First line of a blob of engine output, for compact error display.
fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim_end()
}

/// Result of a completed engine run.
#[derive(Debug, Clone)]
pub struct Output {
    /// Exit code (0 on success).
    pub code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl Output {
    /// Whether the engine reported success.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of streamed engine output.
///
/// Progress lines terminated by carriage returns are split the same way
/// as newline-terminated ones, so transfer percentages arrive as they
/// are painted.
#[derive(Debug, Clone)]
pub struct StreamLine {
    /// The stream the line arrived on.
    pub source: StreamSource,
    /// The line text, without the terminator.
    pub text: String,
}

/// Cooperative cancellation handle.
///
/// Cloned tokens share state; canceling any clone cancels them all.
/// The bridge polls the token at line granularity during streaming
/// runs. Once a call site has moved past transfer into ref or index
/// mutation it simply stops passing the token along, which is how
/// "cancellation refused during mutation" is enforced.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, un-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Additive environment overlay for engine invocations.
///
/// Every field layers on top of the parent environment; nothing is
/// cleared. The overlay is where host-specific transport tuning lives
/// so individual call sites never touch `std::env`.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    /// Absolute path to a credential helper, wired in as
    /// `GIT_ASKPASS`-free `credential.helper` config.
    pub credential_helper: Option<PathBuf>,

    /// Force HTTP/1.1 for the transport. Set by the classifier's
    /// consent-gated remediation for one hosting provider's HTTP/2 bug.
    pub http11_fallback: bool,

    /// Enable long path support on Windows checkouts.
    pub long_paths: bool,

    /// Extra raw variables, last-wins.
    pub extra: Vec<(String, String)>,
}

impl EnvOverlay {
    /// Flatten the overlay into `(key, value)` pairs and `-c` config
    /// arguments to pass before the subcommand.
    fn config_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(helper) = &self.credential_helper {
            args.push("-c".into());
            args.push(format!("credential.helper={}", helper.display()));
        }
        if self.http11_fallback {
            args.push("-c".into());
            args.push("http.version=HTTP/1.1".into());
        }
        if self.long_paths {
            args.push("-c".into());
            args.push("core.longpaths=true".into());
        }
        args
    }

    fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            // Engine output must stay parseable and non-interactive.
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_LFS_FORCE_PROGRESS".to_string(), "1".to_string()),
            ("LC_ALL".to_string(), "C".to_string()),
        ];
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

/// The engine bridge.
///
/// One `Engine` is owned per repository handle; it is cheap and holds
/// no OS resources between calls.
#[derive(Debug, Clone)]
pub struct Engine {
    /// Path or name of the git binary.
    git_program: PathBuf,
    /// Environment overlay applied to every invocation.
    overlay: EnvOverlay,
}

impl Engine {
    /// Create a bridge using `git` from `PATH` and a default overlay.
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Create a bridge with an explicit engine binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            git_program: program.into(),
            overlay: EnvOverlay::default(),
        }
    }

    /// Replace the environment overlay.
    pub fn set_overlay(&mut self, overlay: EnvOverlay) {
        self.overlay = overlay;
    }

    /// Current environment overlay.
    pub fn overlay(&self) -> &EnvOverlay {
        &self.overlay
    }

    /// Enable the HTTP/1.1 transport fallback for subsequent runs.
    pub fn enable_http11_fallback(&mut self) {
        self.overlay.http11_fallback = true;
    }

    fn command(&self, args: &[&str], cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.git_program);
        cmd.args(self.overlay.config_args());
        cmd.args(args);
        cmd.current_dir(cwd);
        cmd.stdin(Stdio::null());
        for (k, v) in self.overlay.env_pairs() {
            cmd.env(k, v);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }

    /// Run the engine to completion, requiring a zero exit.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Spawn`] if the binary cannot be started
    /// - [`BridgeError::Exit`] on a non-zero exit, carrying raw stderr
    pub fn run(&self, args: &[&str], cwd: &Path) -> Result<Output, BridgeError> {
        let output = self.run_unchecked(args, cwd)?;
        if output.success() {
            Ok(output)
        } else {
            Err(BridgeError::Exit {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
                args: args.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    /// Run the engine to completion, tolerating any exit code.
    ///
    /// Used where non-zero is an expected alternate outcome (diff with
    /// changes, merge stopping on conflicts, stash apply collisions).
    pub fn run_unchecked(&self, args: &[&str], cwd: &Path) -> Result<Output, BridgeError> {
        let raw = self
            .command(args, cwd)
            .output()
            .map_err(|source| BridgeError::Spawn {
                program: self.git_program.display().to_string(),
                source,
            })?;

        Ok(Output {
            code: raw.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        })
    }

    /// Run the engine, invoking `on_line` per output line while the
    /// process runs, polling `cancel` between lines.
    ///
    /// Both stdout and stderr are forwarded; engine progress is painted
    /// on stderr with carriage returns, which are treated as line
    /// terminators here.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Canceled`] if the token fires mid-run (the
    ///   child is killed first)
    /// - [`BridgeError::Exit`] on a non-zero exit
    pub fn run_streaming(
        &self,
        args: &[&str],
        cwd: &Path,
        on_line: &mut dyn FnMut(&StreamLine),
        cancel: &CancelToken,
    ) -> Result<Output, BridgeError> {
        let mut child = self
            .command(args, cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.git_program.display().to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel::<StreamLine>();

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let tx_out = tx.clone();
        let reader_out = std::thread::spawn(move || read_lines(stdout, StreamSource::Stdout, tx_out));
        let reader_err = std::thread::spawn(move || read_lines(stderr, StreamSource::Stderr, tx));

        let mut collected_out = String::new();
        let mut collected_err = String::new();
        let mut canceled = false;

        loop {
            if !canceled && cancel.is_canceled() {
                // Kill before any further output; the fetch phases this
                // is used for mutate nothing until they complete.
                let _ = child.kill();
                canceled = true;
            }
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(line) => {
                    match line.source {
                        StreamSource::Stdout => {
                            collected_out.push_str(&line.text);
                            collected_out.push('\n');
                        }
                        StreamSource::Stderr => {
                            collected_err.push_str(&line.text);
                            collected_err.push('\n');
                        }
                    }
                    if !canceled {
                        on_line(&line);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = reader_out.join();
        let _ = reader_err.join();
        let status = child.wait()?;

        if canceled {
            return Err(BridgeError::Canceled);
        }

        let output = Output {
            code: status.code().unwrap_or(-1),
            stdout: collected_out,
            stderr: collected_err,
        };

        if output.success() {
            Ok(output)
        } else {
            Err(BridgeError::Exit {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
                args: args.iter().map(|s| s.to_string()).collect(),
            })
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a stream, emitting a [`StreamLine`] per `\n` **or** `\r`
/// terminator, until EOF. Sends are best-effort; a dropped receiver
/// just ends the reader.
fn read_lines(stream: impl Read, source: StreamSource, tx: mpsc::Sender<StreamLine>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // Progress lines end with \r while the process repaints them.
        match read_until_terminator(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                if text.is_empty() {
                    continue;
                }
                if tx.send(StreamLine { source, text }).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!("engine stream read ended: {err}");
                break;
            }
        }
    }
}

/// Like `read_until(b'\n')` but also stopping at `\r`.
fn read_until_terminator(
    reader: &mut impl BufRead,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(total);
        }
        let pos = available.iter().position(|&b| b == b'\n' || b == b'\r');
        match pos {
            Some(i) => {
                buf.extend_from_slice(&available[..i]);
                reader.consume(i + 1);
                return Ok(total + i + 1);
            }
            None => {
                let len = available.len();
                buf.extend_from_slice(available);
                reader.consume(len);
                total += len;
            }
        }
    }
}
