//! Error types for the core layer.
//!
//! Every failure that can reach a caller of the daemon is one of these
//! variants. Raw hypervisor text only ever appears in the (redacted)
//! `stderr_excerpt` of [`CoreError::CommandFailed`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The hypervisor executable is missing from the host.
    ///
    /// Fatal to all lifecycle operations until resolved externally
    /// (e.g. `brew install colima`).
    #[error("colima is not installed (executable not found)")]
    NotInstalled,

    /// Configuration failed validation. Every violated constraint is
    /// listed, not just the first one.
    #[error("invalid configuration: {}", violations.join("; "))]
    InvalidConfig {
        /// Human-readable description of each violated constraint.
        violations: Vec<String>,
    },

    /// An external command exceeded its deadline. The outcome is
    /// indeterminate; callers must re-query status rather than retry.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// The lifecycle operation that timed out.
        operation: &'static str,
        /// How long the command ran before being killed.
        elapsed: Duration,
    },

    /// The hypervisor rejected the operation with a non-zero exit.
    #[error("colima command failed (exit code {exit_code}): {stderr_excerpt}")]
    CommandFailed {
        /// Exit code reported by the hypervisor process.
        exit_code: i32,
        /// Redacted, length-bounded excerpt of stderr.
        stderr_excerpt: String,
    },

    /// Hypervisor output did not match any known format. Usually a
    /// version mismatch between the daemon's parser and the installed
    /// hypervisor; logged loudly as a compatibility signal.
    #[error("unparsable colima output: {0}")]
    UnparsableOutput(String),

    /// Another lifecycle-mutating operation is in flight. Callers
    /// should retry later, not immediately.
    #[error("another lifecycle operation is in progress")]
    Busy,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns a stable machine-readable kind for API serialization.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Timeout { .. } => "timeout",
            Self::CommandFailed { .. } => "command_failed",
            Self::UnparsableOutput(_) => "unparsable_output",
            Self::Busy => "busy",
            Self::Io(_) => "io",
        }
    }
}
