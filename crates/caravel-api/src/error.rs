//! Error types for the API boundary.
//!
//! Every error that crosses the daemon boundary is typed: clients see a
//! stable `kind`, a human-readable message, and structured detail where
//! it exists (validation violations, exit codes). Raw hypervisor text
//! appears only as the redacted excerpt inside the message.

use caravel_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur at the API boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Server error.
    #[error("server error: {0}")]
    Server(String),
}

impl ApiError {
    /// Returns the stable machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Core(e) => e.kind(),
            Self::BadRequest(_) => "bad_request",
            Self::Server(_) => "internal",
        }
    }

    /// Maps the error onto an HTTP status code.
    ///
    /// Kept here, next to the kinds, so every transport agrees:
    /// busy → 409, invalid config → 422, not installed → 503,
    /// timeout → 504.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Core(CoreError::Busy) => 409,
            Self::Core(CoreError::InvalidConfig { .. }) => 422,
            Self::Core(CoreError::NotInstalled) => 503,
            Self::Core(CoreError::Timeout { .. }) => 504,
            Self::BadRequest(_) => 400,
            _ => 500,
        }
    }

    /// Serializable wire form.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let (violations, exit_code) = match self {
            Self::Core(CoreError::InvalidConfig { violations }) => {
                (Some(violations.clone()), None)
            }
            Self::Core(CoreError::CommandFailed { exit_code, .. }) => (None, Some(*exit_code)),
            _ => (None, None),
        };
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
            violations,
            exit_code,
        }
    }
}

/// Wire representation of an API error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind.
    pub kind: String,
    /// Human-readable message (hypervisor text already redacted).
    pub message: String,
    /// All violated constraints, for `invalid_config`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<String>>,
    /// Hypervisor exit code, for `command_failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
