//! Configured members and their connection handles

use std::fmt;
use std::sync::Arc;

use replset_admin::{AdminClient, ClusterConfig, ConfigSettings, MemberConfig};
use serde::{Deserialize, Serialize};

use crate::config::{BinVersion, FOREVER_MILLIS, NodeOptions, ReplSetOptions};
use crate::error::{Error, ReplSetResult};

/// Member id, stable for the lifetime of the topology
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Wraps a member id
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The member id used in configs
    #[must_use]
    pub const fn member_id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One configured member
#[derive(Debug)]
pub struct Node<C> {
    id: NodeId,
    host: String,
    client: Arc<C>,
    options: NodeOptions,
}

impl<C: AdminClient> Node<C> {
    /// Wraps a connection
    pub fn new(id: NodeId, client: C, options: NodeOptions) -> Self {
        Self {
            id,
            host: client.host().to_string(),
            client: Arc::new(client),
            options,
        }
    }

    /// Member id
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// `host:port`
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Borrowed connection
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Shared connection, for work that outlives the borrow
    pub fn handle(&self) -> Arc<C> {
        Arc::clone(&self.client)
    }

    /// Per-member overrides
    pub const fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Config descriptor for this member
    pub fn member_config(&self) -> MemberConfig {
        let mut member = if self.options.arbiter {
            MemberConfig::arbiter(self.id.member_id(), &self.host)
        } else {
            MemberConfig::new(self.id.member_id(), &self.host)
        };
        if let Some(priority) = self.options.priority {
            member.priority = priority;
        }
        if let Some(votes) = self.options.votes {
            member.votes = votes;
        }
        if let Some(build_indexes) = self.options.build_indexes {
            member.build_indexes = build_indexes;
        }
        member.hidden = self.options.hidden;
        member
    }
}

/// In-memory record of configured members
#[derive(Debug)]
pub struct Topology<C> {
    name: String,
    nodes: Vec<Node<C>>,
    next_id: u32,
}

impl<C: AdminClient> Topology<C> {
    /// Empty topology
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            next_id: 0,
        }
    }

    /// Replica set name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a member after the existing ones
    pub fn add(&mut self, client: C, options: NodeOptions) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.push(Node::new(id, client, options));
        id
    }

    /// Drops a member
    pub fn remove(&mut self, id: NodeId) -> Option<Node<C>> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(index))
    }

    /// Members in config order
    pub fn nodes(&self) -> &[Node<C>] {
        &self.nodes
    }

    /// Member ids in config order
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(Node::id).collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether there are no members
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a member
    ///
    /// # Errors
    ///
    /// Returns an error if no member has this id.
    pub fn node(&self, id: NodeId) -> ReplSetResult<&Node<C>> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::invalid_state(format!("{id} is not part of the topology")))
    }

    /// Looks up a member by host
    pub fn find_by_host(&self, host: &str) -> Option<&Node<C>> {
        self.nodes.iter().find(|n| n.host == host)
    }

    /// Full config for the current members.
    ///
    /// A very high election timeout is injected unless the options keep the
    /// server default.
    ///
    /// # Errors
    ///
    /// Returns a structural error when the members can never form a set.
    pub fn config(&self, options: &ReplSetOptions) -> ReplSetResult<ClusterConfig> {
        self.check_structure()?;

        let mut config = ClusterConfig::new(
            self.name.clone(),
            self.nodes.iter().map(Node::member_config).collect(),
        );
        if !options.use_default_election_timeout {
            config.settings = ConfigSettings {
                election_timeout_millis: Some(FOREVER_MILLIS),
                ..ConfigSettings::default()
            };
        }
        Ok(config)
    }

    fn check_structure(&self) -> ReplSetResult<()> {
        let Some(first) = self.nodes.first() else {
            return Err(Error::structural(format!("set {} has no members", self.name)));
        };
        if !first.member_config().is_electable() {
            return Err(Error::structural(format!(
                "first member {} must be electable to bootstrap the set",
                first.host
            )));
        }

        let has = |version| self.nodes.iter().any(|n| n.options.bin_version == Some(version));
        if has(BinVersion::LastLts) && has(BinVersion::LastContinuous) {
            return Err(Error::structural(
                "members may not mix last-lts and last-continuous binary versions",
            ));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|other| other.host == node.host) {
                return Err(Error::structural(format!("{} is listed twice", node.host)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use replset_admin_mock::MockReplicaSet;

    fn topology(options: &[NodeOptions]) -> Topology<replset_admin_mock::MockNode> {
        let set = MockReplicaSet::new(options.len());
        let mut topology = Topology::new("rs0");
        for (client, options) in set.clients().into_iter().zip(options) {
            topology.add(client, options.clone());
        }
        topology
    }

    #[test]
    fn test_config_carries_overrides_and_high_election_timeout() {
        let topology = topology(&[
            NodeOptions::default(),
            NodeOptions::with_priority(0.0),
            NodeOptions::arbiter(),
        ]);
        let config = topology.config(&ReplSetOptions::default()).unwrap();

        assert_eq!(config.version, 1);
        assert_eq!(config.members.len(), 3);
        assert!((config.members[1].priority - 0.0).abs() < f64::EPSILON);
        assert!(config.members[2].arbiter_only);
        assert_eq!(config.settings.election_timeout_millis, Some(FOREVER_MILLIS));
    }

    #[test]
    fn test_default_election_timeout_is_kept_when_asked() {
        let topology = topology(&[NodeOptions::default()]);
        let options = ReplSetOptions {
            use_default_election_timeout: true,
            ..ReplSetOptions::default()
        };
        assert!(topology.config(&options).unwrap().settings.is_default());
    }

    #[test]
    fn test_unelectable_first_member_is_structural() {
        let topology = topology(&[NodeOptions::arbiter(), NodeOptions::default()]);
        let err = topology.config(&ReplSetOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_mixed_binary_versions_are_structural() {
        let lts = NodeOptions {
            bin_version: Some(BinVersion::LastLts),
            ..NodeOptions::default()
        };
        let continuous = NodeOptions {
            bin_version: Some(BinVersion::LastContinuous),
            ..NodeOptions::default()
        };
        let topology = topology(&[lts, continuous]);
        let err = topology.config(&ReplSetOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_remove_keeps_ids_stable() {
        let mut topology = topology(&[NodeOptions::default(), NodeOptions::default(), NodeOptions::default()]);
        let removed = topology.remove(NodeId::new(1)).unwrap();
        assert_eq!(removed.id(), NodeId::new(1));
        assert_eq!(topology.ids(), vec![NodeId::new(0), NodeId::new(2)]);
        assert!(topology.node(NodeId::new(1)).is_err());
    }
}
