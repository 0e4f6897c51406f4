//! Replies of the status-style commands.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::optime::OpTime;

/// Replication state of a member.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MemberState {
    /// Starting up, no config loaded.
    Startup,
    /// Writable member.
    Primary,
    /// Replicating member.
    Secondary,
    /// Member not yet ready to serve reads.
    Recovering,
    /// Performing initial sync.
    Startup2,
    /// State not known to the reporter.
    Unknown,
    /// Voting member without data.
    Arbiter,
    /// Unreachable from the reporter.
    Down,
    /// Rolling back divergent writes.
    Rollback,
    /// No longer part of the config.
    Removed,
}

impl MemberState {
    /// Numeric state code as reported on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Startup => 0,
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Recovering => 3,
            Self::Startup2 => 5,
            Self::Unknown => 6,
            Self::Arbiter => 7,
            Self::Down => 8,
            Self::Rollback => 9,
            Self::Removed => 10,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "STARTUP",
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Recovering => "RECOVERING",
            Self::Startup2 => "STARTUP2",
            Self::Unknown => "UNKNOWN",
            Self::Arbiter => "ARBITER",
            Self::Down => "DOWN",
            Self::Rollback => "ROLLBACK",
            Self::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Reply of the identity handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloReply {
    /// The member's own host as named in its config.
    pub me: Option<String>,
    /// The primary this member currently recognises.
    pub primary: Option<String>,
    /// Whether the member accepts writes.
    pub is_writable_primary: bool,
    /// Whether the member is a secondary.
    pub secondary: bool,
    /// Whether the member is an arbiter.
    pub arbiter_only: bool,
    /// Version of the member's config.
    pub set_version: Option<u64>,
    /// Hosts of data-bearing, visible members.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl HelloReply {
    /// Whether the member sees itself as the primary.
    #[must_use]
    pub fn is_self_primary(&self) -> bool {
        match (&self.me, &self.primary) {
            (Some(me), Some(primary)) => me == primary,
            _ => false,
        }
    }
}

/// The op times a member tracks about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpTimes {
    /// Newest applied entry.
    pub applied: OpTime,
    /// Newest entry persisted to the journal.
    pub durable: OpTime,
    /// Majority commit point.
    pub last_committed: OpTime,
}

/// One member as seen from the reporting member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// Member id.
    #[serde(rename = "_id")]
    pub id: u32,
    /// `host:port` of the member.
    pub name: String,
    /// Replication state.
    pub state: MemberState,
    /// Applied op time; absent for arbiters and unreachable members.
    pub optime: Option<OpTime>,
    /// Config version the member runs.
    pub config_version: u64,
    /// Config term the member runs.
    pub config_term: i64,
    /// Whether this entry is the reporting member itself.
    #[serde(rename = "self", default)]
    pub is_self: bool,
}

/// Reply of the status command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    /// Replica set name.
    pub set: String,
    /// State of the reporting member.
    pub my_state: MemberState,
    /// Current election term.
    pub term: i64,
    /// The reporting member's op times.
    pub optimes: OpTimes,
    /// Every member of the reporting member's config.
    pub members: Vec<MemberStatus>,
}

impl StatusReply {
    /// The entry describing the reporting member.
    #[must_use]
    pub fn self_member(&self) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.is_self)
    }

    /// Looks up a member entry by host.
    #[must_use]
    pub fn member(&self, host: &str) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.name == host)
    }
}

/// One database known to a member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Owning tenant, for tenant-scoped databases.
    pub tenant: Option<String>,
}

/// Options for content hashing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashOptions {
    /// Only hash these collections; everything when empty.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Skip temporary collections.
    #[serde(default)]
    pub skip_temp_collections: bool,
}

/// Content digests of one database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    /// Hashed database.
    pub database: String,
    /// Digest per collection.
    pub collections: BTreeMap<String, String>,
    /// Digest over all collection digests.
    pub digest: String,
}

/// Result of structural validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateReply {
    /// Whether every collection validated.
    pub valid: bool,
    /// Problems found.
    #[serde(default)]
    pub errors: Vec<String>,
}
