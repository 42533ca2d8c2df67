//! Failure taxonomy shared by every provider.

use std::fmt;

use thiserror::Error;

use crate::platform::host::{CommandError, Problem};

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "access denied",
    "not authorized",
    "operation not permitted",
    "a password is required",
];

const MISSING_MARKERS: &[&str] = &["not found", "no such file", "not installed"];

/// Why a provider failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The host refused the elevated rights the operation needs.
    PermissionDenied,
    /// The tool or kernel interface is not present on this host.
    Unavailable,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error reported by a provider to the aggregation engine.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl ProviderError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Unexpected, message)
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == ErrorCode::PermissionDenied
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == ErrorCode::Unavailable
    }

    /// Build an error from a failed host command, classifying it.
    pub fn from_command(context: &str, err: CommandError) -> Self {
        let code = classify_command_error(&err);
        Self::new(code, format!("{}: {}", context, err.message)).with_cause(err)
    }

    /// A tool produced output that could not be parsed.
    pub fn parse<E>(context: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::unexpected(format!("{}: {}", context, err)).with_cause(err)
    }
}

/// Map a host command failure onto the provider taxonomy.
pub fn classify_command_error(err: &CommandError) -> ErrorCode {
    let message = err.message.to_lowercase();

    if err.problem == Some(Problem::AccessDenied)
        || PERMISSION_MARKERS.iter().any(|m| message.contains(m))
    {
        return ErrorCode::PermissionDenied;
    }

    if err.problem == Some(Problem::NotFound)
        || err.exit_status == Some(127)
        || MISSING_MARKERS.iter().any(|m| message.contains(m))
    {
        return ErrorCode::Unavailable;
    }

    ErrorCode::Unexpected
}
