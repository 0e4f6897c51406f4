//! Replica set configuration documents.

use serde::{Deserialize, Serialize};

/// One member descriptor of a replica set configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    /// Member id, unique within the set.
    #[serde(rename = "_id")]
    pub id: u32,
    /// `host:port` of the member.
    pub host: String,
    /// Arbiters vote but hold no data.
    #[serde(default)]
    pub arbiter_only: bool,
    /// Election priority; zero means never primary.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Number of votes, zero or one.
    #[serde(default = "default_votes")]
    pub votes: u8,
    /// Hidden members are invisible to clients.
    #[serde(default)]
    pub hidden: bool,
    /// Whether the member builds secondary indexes.
    #[serde(default = "default_build_indexes")]
    pub build_indexes: bool,
}

const fn default_priority() -> f64 {
    1.0
}

const fn default_votes() -> u8 {
    1
}

const fn default_build_indexes() -> bool {
    true
}

impl MemberConfig {
    /// A plain voting, electable, data-bearing member.
    pub fn new(id: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            arbiter_only: false,
            priority: default_priority(),
            votes: default_votes(),
            hidden: false,
            build_indexes: true,
        }
    }

    /// An arbiter member.
    pub fn arbiter(id: u32, host: impl Into<String>) -> Self {
        Self {
            arbiter_only: true,
            priority: 0.0,
            ..Self::new(id, host)
        }
    }

    /// Whether the member may ever become primary.
    #[must_use]
    pub fn is_electable(&self) -> bool {
        !self.arbiter_only && self.priority > 0.0 && self.votes > 0 && !self.hidden
    }

    /// Whether the member counts towards voting majorities.
    #[must_use]
    pub const fn is_voter(&self) -> bool {
        self.votes > 0
    }
}

/// Set-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSettings {
    /// Election timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_timeout_millis: Option<u64>,
    /// Whether chaining through secondaries is allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaining_allowed: Option<bool>,
}

impl ConfigSettings {
    /// Whether every setting is at its server default.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.election_timeout_millis.is_none() && self.chaining_allowed.is_none()
    }
}

/// A replica set configuration document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Replica set name.
    #[serde(rename = "_id")]
    pub name: String,
    /// Monotonically increasing config version.
    pub version: u64,
    /// Election term the config was written in; absent before the first election.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<i64>,
    /// Ordered member descriptors.
    pub members: Vec<MemberConfig>,
    /// Set-wide settings.
    #[serde(default, skip_serializing_if = "ConfigSettings::is_default")]
    pub settings: ConfigSettings,
}

impl ClusterConfig {
    /// Creates a version 1 config.
    pub fn new(name: impl Into<String>, members: Vec<MemberConfig>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            term: None,
            members,
            settings: ConfigSettings::default(),
        }
    }

    /// Looks up a member by host.
    #[must_use]
    pub fn member(&self, host: &str) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.host == host)
    }

    /// Hosts of voting members.
    pub fn voters(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.is_voter())
            .map(|m| m.host.as_str())
    }

    /// Votes needed for a majority of this config.
    #[must_use]
    pub fn majority(&self) -> usize {
        self.voters().count() / 2 + 1
    }

    /// Number of voting members added or removed going from `self` to `next`.
    #[must_use]
    pub fn voter_changes(&self, next: &Self) -> usize {
        let added = next.voters().filter(|h| !self.voters().any(|o| o == *h)).count();
        let removed = self.voters().filter(|h| !next.voters().any(|n| n == *h)).count();
        added + removed
    }

    /// Highest priority among the members.
    #[must_use]
    pub fn max_priority(&self) -> f64 {
        self.members.iter().map(|m| m.priority).fold(0.0, f64::max)
    }
}
