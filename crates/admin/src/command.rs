//! Administrative command kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every administrative command the orchestration layer issues.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Identity handshake.
    Hello,
    /// Replica set status.
    GetStatus,
    /// Current replica set configuration.
    GetConfig,
    /// First configuration of a fresh set.
    Initiate,
    /// Non-forced reconfiguration.
    Reconfig,
    /// Request an election on the receiving member.
    StepUp,
    /// Relinquish primary.
    StepDown,
    /// Decline elections for a while (or stop declining).
    Freeze,
    /// Block writes.
    FsyncLock,
    /// Release a write block.
    FsyncUnlock,
    /// Enumerate databases.
    ListDatabases,
    /// Per-collection content digests of one database.
    ContentHash,
    /// Enumerate namespaces with recorded preimages.
    PreImageNamespaces,
    /// Open a cursor over a replicated log.
    ReadLog,
    /// Full structural validation.
    Validate,
}

impl CommandKind {
    /// The command name as sent on the wire.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::GetStatus => "replSetGetStatus",
            Self::GetConfig => "replSetGetConfig",
            Self::Initiate => "replSetInitiate",
            Self::Reconfig => "replSetReconfig",
            Self::StepUp => "replSetStepUp",
            Self::StepDown => "replSetStepDown",
            Self::Freeze => "replSetFreeze",
            Self::FsyncLock => "fsync",
            Self::FsyncUnlock => "fsyncUnlock",
            Self::ListDatabases => "listDatabases",
            Self::ContentHash => "dbHash",
            Self::PreImageNamespaces => "aggregate",
            Self::ReadLog => "find",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
