//! Error types for administrative commands

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandKind;

/// Server error codes the orchestration layer reacts to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A member named in a config could not be reached during the quorum check.
    NodeNotFound,
    /// The proposed config is not a legal successor of the current one.
    NewReplicaSetConfigurationIncompatible,
    /// A state change interrupted the command.
    InterruptedDueToReplStateChange,
    /// Another reconfiguration is running.
    ConfigurationInProgress,
    /// The current config has not reached a majority yet.
    CurrentConfigNotCommittedYet,
    /// The receiving member cannot accept writes.
    NotWritablePrimary,
    /// The receiving member is not a secondary.
    NotSecondary,
    /// The receiving member has no config yet.
    NotYetInitialized,
    /// An election is running.
    ElectionInProgress,
    /// The receiving member does not know the command.
    CommandNotFound,
    /// A capped collection was truncated past the cursor position.
    CappedPositionLost,
    /// The set already has a config.
    AlreadyInitialized,
    /// The proposed config is malformed.
    InvalidReplicaSetConfig,
    /// Any other command failure.
    CommandFailed,
}

impl ErrorCode {
    /// Codes that describe a cluster passing through a state change and are
    /// expected to clear on their own.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        match self {
            Self::NodeNotFound
            | Self::NewReplicaSetConfigurationIncompatible
            | Self::InterruptedDueToReplStateChange
            | Self::ConfigurationInProgress
            | Self::CurrentConfigNotCommittedYet
            | Self::NotWritablePrimary
            | Self::NotSecondary
            | Self::NotYetInitialized
            | Self::ElectionInProgress => true,
            Self::CommandNotFound
            | Self::CappedPositionLost
            | Self::AlreadyInitialized
            | Self::InvalidReplicaSetConfig
            | Self::CommandFailed => false,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failure of a single administrative command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    /// The member answered with an error.
    #[error("{command} failed with {code}: {message}")]
    Command {
        /// Command that failed
        command: CommandKind,
        /// Server error code
        code: ErrorCode,
        /// Server error message
        message: String,
    },

    /// The member could not be reached.
    #[error("network error talking to {host}: {message}")]
    Network {
        /// Host that was contacted
        host: String,
        /// Transport error description
        message: String,
    },

    /// The reply could not be decoded.
    #[error("malformed {command} reply: {message}")]
    Malformed {
        /// Command whose reply was malformed
        command: CommandKind,
        /// Decoding error description
        message: String,
    },
}

impl AdminError {
    /// Creates a command error.
    pub fn command(command: CommandKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            code,
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Server error code, if the member answered at all.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Command { code, .. } => Some(*code),
            Self::Network { .. } | Self::Malformed { .. } => None,
        }
    }

    /// Whether this error carries the given code.
    #[must_use]
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }

    /// Whether the member could not be reached.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether retrying the same command later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Command { code, .. } => code.is_transient(),
            Self::Malformed { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_transient() {
        let err = AdminError::network("node0:27017", "connection refused");
        assert!(err.is_transient());
        assert!(err.is_network());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_command_not_found_is_not_transient() {
        let err = AdminError::command(CommandKind::StepUp, ErrorCode::CommandNotFound, "no such command");
        assert!(!err.is_transient());
        assert!(err.has_code(ErrorCode::CommandNotFound));
    }

    #[test]
    fn test_reconfig_retry_codes_are_transient() {
        for code in [
            ErrorCode::NodeNotFound,
            ErrorCode::NewReplicaSetConfigurationIncompatible,
            ErrorCode::InterruptedDueToReplStateChange,
            ErrorCode::ConfigurationInProgress,
            ErrorCode::CurrentConfigNotCommittedYet,
            ErrorCode::NotWritablePrimary,
        ] {
            assert!(code.is_transient(), "{code} should be transient");
        }
    }

    #[test]
    fn test_error_message_names_the_command() {
        let err = AdminError::command(CommandKind::Reconfig, ErrorCode::CommandFailed, "boom");
        assert_eq!(err.to_string(), "replSetReconfig failed with CommandFailed: boom");
    }
}
