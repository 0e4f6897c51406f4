//! The replica set handle every orchestration step runs against.

use std::fmt;

use parking_lot::RwLock;
use replset_admin::AdminClient;
use tracing::info;

use crate::config::{NodeOptions, ReplSetOptions, ReplSetSpec};
use crate::error::ReplSetResult;
use crate::topology::{Node, NodeId, Topology};

/// Where the set is in its bootstrap-then-grow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No member has a config
    Unconfigured,
    /// The first member runs a single-member config
    SingleNodeBootstrapped,
    /// Growing; the config being installed has this many members
    Reconfiguring(usize),
    /// Every member is in the config and settled
    Stable,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::SingleNodeBootstrapped => write!(f, "single node bootstrapped"),
            Self::Reconfiguring(members) => write!(f, "reconfiguring to {members} members"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// A replica set under orchestration.
///
/// Discovery, convergence, lifecycle and verification operations are
/// implemented on this type in their own modules.
#[derive(Debug)]
pub struct ReplSet<C: AdminClient> {
    topology: Topology<C>,
    options: ReplSetOptions,
    lifecycle: RwLock<LifecycleState>,
}

impl<C: AdminClient> ReplSet<C> {
    /// Empty set
    pub fn new(name: impl Into<String>, options: ReplSetOptions) -> Self {
        Self {
            topology: Topology::new(name),
            options,
            lifecycle: RwLock::new(LifecycleState::Unconfigured),
        }
    }

    /// Set with one plain member per connection
    pub fn with_clients(
        name: impl Into<String>,
        options: ReplSetOptions,
        clients: impl IntoIterator<Item = C>,
    ) -> Self {
        let mut set = Self::new(name, options);
        for client in clients {
            set.topology.add(client, NodeOptions::default());
        }
        set
    }

    /// Set described by a set file; `connect` opens a connection per host
    pub fn from_spec<F>(spec: ReplSetSpec, mut connect: F) -> Self
    where
        F: FnMut(&str) -> C,
    {
        let mut set = Self::new(spec.name, spec.options);
        for node in spec.nodes {
            let client = connect(&node.host);
            set.topology.add(client, node.options);
        }
        set
    }

    /// Adds a member to the topology without touching the running config
    pub fn add_member(&mut self, client: C, options: NodeOptions) -> NodeId {
        let id = self.topology.add(client, options);
        info!("Added {} to topology of {}", id, self.topology.name());
        id
    }

    /// Replica set name
    pub fn name(&self) -> &str {
        self.topology.name()
    }

    /// Configured members
    pub const fn topology(&self) -> &Topology<C> {
        &self.topology
    }

    pub(crate) fn topology_mut(&mut self) -> &mut Topology<C> {
        &mut self.topology
    }

    /// Timing and sizing knobs
    pub const fn options(&self) -> &ReplSetOptions {
        &self.options
    }

    /// Current lifecycle state
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.read()
    }

    pub(crate) fn transition(&self, next: LifecycleState) {
        let mut state = self.lifecycle.write();
        if *state != next {
            info!("Set {} lifecycle: {} -> {}", self.topology.name(), *state, next);
            *state = next;
        }
    }

    /// Looks up a member
    ///
    /// # Errors
    ///
    /// Returns an error if no member has this id.
    pub fn node(&self, id: NodeId) -> ReplSetResult<&Node<C>> {
        self.topology.node(id)
    }

    pub(crate) fn client(&self, id: NodeId) -> ReplSetResult<&C> {
        self.topology.node(id).map(Node::client)
    }

    pub(crate) fn host(&self, id: NodeId) -> String {
        self.topology
            .node(id)
            .map_or_else(|_| id.to_string(), |n| n.host().to_string())
    }

    pub(crate) fn id_of(&self, host: &str) -> Option<NodeId> {
        self.topology.find_by_host(host).map(Node::id)
    }
}
