//! External command execution.
//!
//! The envelope is the only place in the daemon that touches
//! `tokio::process`. It runs a command with a deadline, captures output,
//! and redacts secrets before anything is returned or logged. A non-zero
//! exit or hypervisor-reported error is *data* here, never an error; the
//! envelope itself fails only when the executable cannot be launched or
//! the deadline elapses.

use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Placeholder substituted for every redacted match.
pub const REDACTED: &str = "[redacted]";

/// Maximum bytes of stdout/stderr retained per invocation.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Result type alias for envelope operations.
pub type ExecResultOrError = std::result::Result<ExecResult, ExecError>;

/// Outcome of one external command invocation.
///
/// Produced once per invocation and never retained beyond translation
/// into a typed result by the caller.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Process exit code (-1 if killed by a signal).
    pub exit_code: i32,
    /// Redacted standard output.
    pub stdout: String,
    /// Redacted standard error.
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// True if the child was killed because the deadline elapsed.
    pub timed_out: bool,
}

impl ExecResult {
    /// Returns true if the command exited successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Envelope-level failures.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The executable does not exist or is not on PATH.
    #[error("executable not found: {program}")]
    NotFound {
        /// Program that could not be located.
        program: String,
    },

    /// The executable exists but could not be launched.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program that could not be launched.
        program: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// The deadline elapsed; the child was forcibly terminated.
    ///
    /// Carries whatever (redacted) output was captured before the kill,
    /// with `timed_out` set.
    #[error("{program} timed out after {:?}", .result.duration)]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Partial result captured before termination.
        result: ExecResult,
    },
}

/// Options for one invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Deadline for the whole invocation.
    pub timeout: Duration,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            env: Vec::new(),
        }
    }
}

/// Redacts sensitive substrings from command output.
///
/// Two mechanisms: literal path prefixes (credential files and
/// directories under the user's home) and token-shaped patterns. Both
/// are applied uniformly to stdout, stderr, and every error path, so no
/// caller can leak a secret through a diagnostic message.
#[derive(Debug, Clone)]
pub struct Redactor {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        let mut literals = Vec::new();
        if let Some(home) = dirs::home_dir() {
            for rel in [".ssh", ".docker/config.json", ".colima/_lima/_config", ".config/gh"] {
                literals.push(home.join(rel).to_string_lossy().into_owned());
            }
        }

        // Token shapes are matched conservatively: a false positive
        // costs a little diagnostic detail, a false negative leaks a
        // credential into logs.
        let patterns = [
            r"\bgh[pousr]_[A-Za-z0-9]{16,}\b",
            r"(?i)\b(?:token|secret|password|api[_-]?key)\s*[=:]\s*\S+",
            r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{8,}",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("redaction pattern must compile"))
        .collect();

        Self { literals, patterns }
    }
}

impl Redactor {
    /// Adds a literal substring to redact.
    #[must_use]
    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        let literal = literal.into();
        if !literal.is_empty() {
            self.literals.push(literal);
        }
        self
    }

    /// Replaces every sensitive match with [`REDACTED`].
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let mut out = input.to_string();
        for literal in &self.literals {
            out = out.replace(literal.as_str(), REDACTED);
        }
        for pattern in &self.patterns {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
        out
    }
}

/// Runs external commands with a deadline and redacted capture.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    redactor: Redactor,
}

impl Envelope {
    /// Creates an envelope with the given redactor.
    #[must_use]
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }

    /// Returns the redactor used for output scrubbing.
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Runs `program` with `args` under the options' deadline.
    ///
    /// Non-zero exits are returned as an [`ExecResult`], not an error.
    ///
    /// # Errors
    ///
    /// [`ExecError::NotFound`] if the executable is missing,
    /// [`ExecError::Launch`] if it cannot be spawned, and
    /// [`ExecError::Timeout`] if the deadline elapses (the child is
    /// force-killed first).
    pub async fn run(&self, program: &str, args: &[&str], opts: &ExecOptions) -> ExecResultOrError {
        let started = Instant::now();

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &opts.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::NotFound { program: program.to_string() }
            } else {
                ExecError::Launch { program: program.to_string(), source: e }
            }
        })?;

        // Drain both pipes concurrently so a chatty child cannot
        // deadlock against a full pipe buffer.
        let stdout_task = Self::drain(child.stdout.take());
        let stderr_task = Self::drain(child.stderr.take());

        let wait = tokio::time::timeout(opts.timeout, child.wait()).await;
        match wait {
            Ok(status) => {
                let status = status.map_err(|e| ExecError::Launch {
                    program: program.to_string(),
                    source: e,
                })?;
                let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
                let (stdout, stderr) = (stdout.unwrap_or_default(), stderr.unwrap_or_default());
                let result = ExecResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: self.redactor.redact(&stdout),
                    stderr: self.redactor.redact(&stderr),
                    duration: started.elapsed(),
                    timed_out: false,
                };
                tracing::debug!(
                    command = %self.redacted_command_line(program, args),
                    exit_code = result.exit_code,
                    duration_ms = result.duration.as_millis() as u64,
                    "command finished"
                );
                Ok(result)
            }
            Err(_elapsed) => {
                Self::terminate(&mut child).await;
                let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
                let (stdout, stderr) = (stdout.unwrap_or_default(), stderr.unwrap_or_default());
                let result = ExecResult {
                    exit_code: -1,
                    stdout: self.redactor.redact(&stdout),
                    stderr: self.redactor.redact(&stderr),
                    duration: started.elapsed(),
                    timed_out: true,
                };
                tracing::warn!(
                    command = %self.redacted_command_line(program, args),
                    timeout_ms = opts.timeout.as_millis() as u64,
                    "command killed after deadline"
                );
                Err(ExecError::Timeout { program: program.to_string(), result })
            }
        }
    }

    /// Reads a child pipe to completion, bounded at [`MAX_CAPTURE_BYTES`].
    fn drain<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return String::new();
            };
            let mut buf = Vec::with_capacity(1024);
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if buf.len() < MAX_CAPTURE_BYTES {
                            let take = n.min(MAX_CAPTURE_BYTES - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                        }
                    }
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    }

    /// Force-kills a child and reaps it.
    async fn terminate(child: &mut Child) {
        if child.start_kill().is_ok() {
            let _ = child.wait().await;
        }
    }

    fn redacted_command_line(&self, program: &str, args: &[&str]) -> String {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.redactor.redact(&line)
    }
}
