//! Error types for replica set orchestration and verification

use std::fmt;

use replset_admin::AdminError;
use thiserror::Error;

use crate::oracle::ConsistencyReport;
use crate::wait::FatalTimeout;

/// Result type for replica set operations
pub type ReplSetResult<T> = Result<T, Error>;

/// Main error type for replica set operations
#[derive(Debug, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create a new error
    pub const fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Create an error from a failed admin command
    pub fn rpc(message: impl Into<String>, source: AdminError) -> Self {
        Self {
            kind: ErrorKind::Rpc,
            context: ErrorContext::Rpc {
                message: message.into(),
                source,
            },
        }
    }

    /// Create a no-primary error
    pub fn no_primary(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::NoPrimary, msg)
    }

    /// Create a structural error
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Structural, msg)
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::InvalidState, msg)
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Configuration, msg)
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Validation, msg)
    }

    /// Create a timeout error carrying the last observed state
    pub fn timed_out(state: FatalTimeout) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            context: ErrorContext::Timeout(Box::new(state)),
        }
    }

    /// Create a consistency violation from a failing report
    pub fn consistency(report: ConsistencyReport) -> Self {
        Self {
            kind: ErrorKind::Consistency,
            context: ErrorContext::Consistency(Box::new(report)),
        }
    }

    /// Get error kind
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get error context
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Whether the failure is expected to clear while the set settles
    pub fn is_retryable(&self) -> bool {
        match (&self.kind, &self.context) {
            (ErrorKind::NoPrimary, _) => true,
            (ErrorKind::Rpc, ErrorContext::Rpc { source, .. }) => source.is_transient(),
            _ => false,
        }
    }

    /// Check if this is a timeout
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// The admin command failure behind an RPC error
    pub const fn admin_error(&self) -> Option<&AdminError> {
        match &self.context {
            ErrorContext::Rpc { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The state captured when a wait timed out
    pub fn timeout_state(&self) -> Option<&FatalTimeout> {
        match &self.context {
            ErrorContext::Timeout(state) => Some(state),
            _ => None,
        }
    }

    /// The failing report behind a consistency violation
    pub fn report(&self) -> Option<&ConsistencyReport> {
        match &self.context {
            ErrorContext::Consistency(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Rpc { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
            ErrorContext::Timeout(state) => write!(f, "{}: {}", self.kind, state),
            ErrorContext::Consistency(report) => write!(f, "{}: {}", self.kind, report),
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An admin command failed
    Rpc,
    /// No unique writable primary right now
    NoPrimary,
    /// The requested topology can never work
    Structural,
    /// Replicated state diverged
    Consistency,
    /// A wait never converged
    Timeout,
    /// Structural validation of a member failed
    Validation,
    /// Configuration could not be loaded
    Configuration,
    /// Operation not allowed in the current state
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc => write!(f, "RPC error"),
            Self::NoPrimary => write!(f, "No primary"),
            Self::Structural => write!(f, "Structural error"),
            Self::Consistency => write!(f, "Consistency violation"),
            Self::Timeout => write!(f, "Timeout"),
            Self::Validation => write!(f, "Validation error"),
            Self::Configuration => write!(f, "Configuration error"),
            Self::InvalidState => write!(f, "Invalid state"),
        }
    }
}

/// Error context
#[derive(Debug)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Failed admin command
    Rpc {
        /// Error message
        message: String,
        /// Admin command failure
        source: AdminError,
    },
    /// Last observed state of a wait
    Timeout(Box<FatalTimeout>),
    /// Failing comparison
    Consistency(Box<ConsistencyReport>),
}

/// Attaches context to admin command results.
pub(crate) trait AdminResultExt<T> {
    fn rpc_context<F, S>(self, context: F) -> ReplSetResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> AdminResultExt<T> for Result<T, AdminError> {
    fn rpc_context<F, S>(self, context: F) -> ReplSetResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::rpc(context(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_admin::{CommandKind, ErrorCode};

    #[test]
    fn test_transient_rpc_errors_are_retryable() {
        let err = Error::rpc(
            "reconfig",
            AdminError::command(CommandKind::Reconfig, ErrorCode::ConfigurationInProgress, "busy"),
        );
        assert!(err.is_retryable());

        let err = Error::rpc(
            "step up",
            AdminError::command(CommandKind::StepUp, ErrorCode::CommandFailed, "not electable"),
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_structural_errors_are_fatal() {
        let err = Error::structural("first member is an arbiter");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.to_string(), "Structural error: first member is an arbiter");
    }

    #[test]
    fn test_no_primary_is_retryable() {
        assert!(Error::no_primary("two primaries").is_retryable());
    }
}
