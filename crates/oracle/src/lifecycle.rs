//! Bootstrap, growth, reconfiguration, elections and freezing.
//!
//! A set is always initiated with its first member alone and then grown one
//! member per reconfiguration, since a non-forced reconfiguration may add at
//! most one voter. Every reconfiguration re-reads the version the primary
//! runs and submits the next one.

use replset_admin::{AdminClient, AdminError, ClusterConfig, ConfigSettings, ErrorCode};
use tracing::{debug, error, info, warn};

use crate::config::NodeOptions;
use crate::error::{AdminResultExt, Error, ReplSetResult};
use crate::replication::ReplicationWait;
use crate::replset::{LifecycleState, ReplSet};
use crate::topology::NodeId;
use crate::wait::{Attempt, WaitOptions, await_condition, retry};

/// Reconfiguration failures that clear once the set settles
const RECONFIG_RETRY_CODES: [ErrorCode; 6] = [
    ErrorCode::NodeNotFound,
    ErrorCode::NewReplicaSetConfigurationIncompatible,
    ErrorCode::InterruptedDueToReplStateChange,
    ErrorCode::ConfigurationInProgress,
    ErrorCode::CurrentConfigNotCommittedYet,
    ErrorCode::NotWritablePrimary,
];

fn is_retryable_reconfig(error: &AdminError) -> bool {
    error.is_network() || RECONFIG_RETRY_CODES.iter().any(|&code| error.has_code(code))
}

fn is_retryable_freeze(error: &AdminError) -> bool {
    error.is_network() || error.has_code(ErrorCode::NotSecondary) || error.has_code(ErrorCode::NotYetInitialized)
}

/// Options for [`ReplSet::step_up`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepUpOptions {
    /// Wait for the secondaries to catch up before asking for the election
    pub await_replication: bool,
    /// Require the member to end up as the writable primary
    pub await_writable_primary: bool,
}

impl Default for StepUpOptions {
    fn default() -> Self {
        Self {
            await_replication: true,
            await_writable_primary: true,
        }
    }
}

impl<C: AdminClient> ReplSet<C> {
    /// Initiates the set from the topology and makes the first member primary.
    ///
    /// # Errors
    ///
    /// Returns a structural error for a topology that can never form a set,
    /// or the first failure that does not clear within the timeout.
    pub async fn initiate(&self) -> ReplSetResult<NodeId> {
        let config = self.topology().config(self.options())?;
        let primary = self.initiate_with_any_node_as_primary(&config).await?;

        let Some(&first) = self.topology().ids().first() else {
            return Err(Error::structural(format!("set {} has no members", self.name())));
        };
        if primary != first {
            info!("{} was elected instead of {}, stepping it up", self.host(primary), self.host(first));
            self.step_up(first, StepUpOptions::default()).await?;
        }
        if config.members.len() > 1 {
            self.await_highest_priority_node_is_primary(self.options().timeout)
                .await?;
            self.await_nodes_agree_on_applied_optime(None, None).await?;
        }
        Ok(first)
    }

    /// Initiates the set with `config`, accepting whichever member wins the
    /// first election.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the set was already initiated, a
    /// structural error if the first member cannot be elected, or the first
    /// failure that does not clear within the timeout.
    pub async fn initiate_with_any_node_as_primary(&self, config: &ClusterConfig) -> ReplSetResult<NodeId> {
        let state = self.lifecycle_state();
        if state != LifecycleState::Unconfigured {
            return Err(Error::invalid_state(format!(
                "set {} cannot be initiated while {}",
                self.name(),
                state
            )));
        }
        let Some(first) = config.members.first() else {
            return Err(Error::structural(format!("config of {} has no members", config.name)));
        };
        if !first.is_electable() {
            return Err(Error::structural(format!(
                "first member {} must be electable to bootstrap the set",
                first.host
            )));
        }
        let Some(first_id) = self.id_of(&first.host) else {
            return Err(Error::invalid_state(format!("{} is not part of the topology", first.host)));
        };

        let mut bootstrap = config.clone();
        bootstrap.members.truncate(1);
        bootstrap.version = 1;
        bootstrap.term = None;
        bootstrap.settings = ConfigSettings {
            election_timeout_millis: config.settings.election_timeout_millis,
            ..ConfigSettings::default()
        };

        info!("Initiating set {} with {} alone", self.name(), first.host);
        let client = self.client(first_id)?;
        let bootstrap = &bootstrap;
        retry(
            "initiating set",
            self.options().command_retry_attempts,
            self.options().command_retry_interval,
            || async move {
                client
                    .initiate(bootstrap)
                    .await
                    .rpc_context(|| format!("initiating {} on {}", bootstrap.name, first.host))
            },
        )
        .await?;
        self.transition(LifecycleState::SingleNodeBootstrapped);

        let mut primary = self.get_primary().await?;
        for count in 2..=config.members.len() {
            self.transition(LifecycleState::Reconfiguring(count));
            let mut grown = config.clone();
            grown.members.truncate(count);
            info!("Adding {} to set {}", grown.members[count - 1].host, self.name());
            self.reconfig_with_retry(&grown).await?;
        }

        if config.members.len() > 1 {
            self.await_secondary_nodes(None, None, Some(self.options().secondary_poll_interval))
                .await?;
            primary = self.get_primary().await?;
        }
        self.transition(LifecycleState::Stable);
        info!("Set {} is up with {} as primary", self.name(), self.host(primary));
        Ok(primary)
    }

    /// Installs `config` with one reconfiguration and waits for it to spread.
    ///
    /// The submitted version is the one the primary runs plus one, whatever
    /// `config` carries.
    ///
    /// # Errors
    ///
    /// Returns the first failure outside the retryable reconfiguration
    /// codes, or a timeout error.
    pub async fn reconfig(&self, config: &ClusterConfig) -> ReplSetResult<u64> {
        let version = self.reconfig_with_retry(config).await?;
        let primary = self.get_primary().await?;
        let targets: Vec<NodeId> = config
            .members
            .iter()
            .filter_map(|m| self.id_of(&m.host))
            .collect();
        self.await_config_replication(primary, Some(&targets)).await?;
        Ok(version)
    }

    /// Reconfigures the set back to exactly the topology's members.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::reconfig`].
    pub async fn reinitiate(&self) -> ReplSetResult<u64> {
        let config = self.topology().config(self.options())?;
        self.reconfig(&config).await
    }

    /// Adds a member to the topology and to the running config.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::reconfig`].
    pub async fn add_node(&mut self, client: C, options: NodeOptions) -> ReplSetResult<NodeId> {
        let id = self.add_member(client, options);
        let config = self.topology().config(self.options())?;
        self.transition(LifecycleState::Reconfiguring(config.members.len()));
        self.reconfig(&config).await?;
        self.transition(LifecycleState::Stable);
        Ok(id)
    }

    /// Removes a member from the running config and then from the topology.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error for an unknown member, otherwise see
    /// [`ReplSet::reconfig`].
    pub async fn remove_node(&mut self, id: NodeId) -> ReplSetResult<()> {
        let Some(removed) = self.topology_mut().remove(id) else {
            return Err(Error::invalid_state(format!("{id} is not part of the topology")));
        };
        info!("Removing {} from set {}", removed.host(), self.name());
        let config = self.topology().config(self.options())?;
        self.transition(LifecycleState::Reconfiguring(config.members.len()));
        self.reconfig(&config).await?;
        self.transition(LifecycleState::Stable);
        Ok(())
    }

    async fn reconfig_with_retry(&self, config: &ClusterConfig) -> ReplSetResult<u64> {
        let options =
            WaitOptions::new(self.options().timeout, self.options().reconfig_retry_interval).tolerating_errors();
        let version = await_condition("reconfiguration", options, || async move {
            self.reconfig_attempt(config).await
        })
        .await?;
        info!("Set {} runs config version {}", self.name(), version);
        Ok(version)
    }

    async fn reconfig_attempt(&self, config: &ClusterConfig) -> ReplSetResult<Attempt<u64>> {
        let primary = self.get_primary().await?;
        let host = self.host(primary);
        let client = self.client(primary)?;
        let status = client
            .status()
            .await
            .rpc_context(|| format!("reading status of {host}"))?;
        let Some(me) = status.self_member() else {
            return Err(Error::invalid_state(format!("{host} does not list itself in its status")));
        };

        let mut next = config.clone();
        next.version = me.config_version + 1;
        next.term = None;
        debug!("Submitting config version {} with {} members to {}", next.version, next.members.len(), host);

        match client.reconfig(&next, self.options().timeout).await {
            Ok(()) => Ok(Attempt::Ready(next.version)),
            Err(e) if is_retryable_reconfig(&e) => {
                info!("Retrying reconfig to version {}: {}", next.version, e);
                Ok(Attempt::Pending(e.to_string()))
            }
            Err(e) => Err(Error::rpc(format!("reconfiguring {} to version {}", self.name(), next.version), e)),
        }
    }

    /// Makes `node` the primary and waits for every member to agree.
    ///
    /// Members without the step-up command are left to win an election on
    /// their own.
    ///
    /// # Errors
    ///
    /// Returns the step-up failure when the member cannot be elected, or a
    /// timeout error.
    pub async fn step_up(&self, node: NodeId, options: StepUpOptions) -> ReplSetResult<()> {
        if options.await_replication {
            self.await_replication(ReplicationWait::default()).await?;
        }

        let host = self.host(node);
        info!("Stepping up {}", host);
        let wait = WaitOptions::new(self.options().timeout, self.options().poll_interval).tolerating_errors();
        await_condition(&format!("stepping up {host}"), wait, || async move {
            self.step_up_attempt(node).await
        })
        .await?;

        if options.await_writable_primary {
            let primary = self.get_primary().await?;
            if primary != node {
                return Err(Error::invalid_state(format!(
                    "{} was stepped up but {} is primary",
                    host,
                    self.host(primary)
                )));
            }
        }
        Ok(())
    }

    async fn step_up_attempt(&self, node: NodeId) -> ReplSetResult<Attempt<()>> {
        let host = self.host(node);
        match self.client(node)?.step_up(self.options().step_up_command_timeout).await {
            Ok(()) => {}
            Err(e) if e.has_code(ErrorCode::CommandNotFound) => {
                warn!("{} has no step up command, waiting for it to be elected", host);
                let primary = self.discover_primary().await?;
                if primary != node {
                    return Ok(Attempt::Pending(format!(
                        "{} is primary, waiting for {}",
                        self.host(primary),
                        host
                    )));
                }
            }
            Err(e) => return Err(Error::rpc(format!("stepping up {host}"), e)),
        }

        match self
            .await_nodes_agree_on_primary(self.options().step_up_agreement_timeout, None, Some(node))
            .await
        {
            Ok(_) => Ok(Attempt::Ready(())),
            Err(e) if e.is_timeout() => Ok(Attempt::Pending(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Steps `node` down if needed and keeps it from being elected.
    ///
    /// # Errors
    ///
    /// Returns the first freeze failure that does not clear, or a timeout error.
    pub async fn freeze(&self, node: NodeId) -> ReplSetResult<()> {
        let client = self.client(node)?;
        let host = self.host(node);
        let host = &host;
        let duration = self.options().freeze_duration;

        let wait = WaitOptions::new(self.options().timeout, self.options().poll_interval);
        await_condition(&format!("freezing {host}"), wait, || async move {
            if let Err(e) = client.step_down(duration, true).await {
                debug!("Ignoring step down failure on {}: {}", host, e);
            }
            match client.freeze(duration).await {
                Ok(()) => Ok(Attempt::Ready(())),
                Err(e) if is_retryable_freeze(&e) => Ok(Attempt::Pending(e.to_string())),
                Err(e) => Err(Error::rpc(format!("freezing {host}"), e)),
            }
        })
        .await?;

        debug!("Froze {} for {:?}", host, duration);
        Ok(())
    }

    /// Lets `node` stand for election again.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the member refuses.
    pub async fn unfreeze(&self, node: NodeId) -> ReplSetResult<()> {
        self.client(node)?
            .unfreeze()
            .await
            .rpc_context(|| format!("unfreezing {}", self.host(node)))
    }

    /// Freezes `secondaries` and blocks writes on `primary`.
    ///
    /// Whatever was acquired is released again if a later step fails.
    ///
    /// # Errors
    ///
    /// Returns the first freeze or lock failure.
    pub async fn quiesce(&self, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<QuiescedSet<'_, C>> {
        let mut guard = QuiescedSet {
            set: self,
            primary,
            frozen: Vec::new(),
            locked: false,
            released: false,
        };
        match self.acquire(&mut guard, secondaries).await {
            Ok(()) => Ok(guard),
            Err(e) => {
                warn!("Could not quiesce set {}, releasing: {}", self.name(), e);
                guard.release().await;
                Err(e)
            }
        }
    }

    async fn acquire(&self, guard: &mut QuiescedSet<'_, C>, secondaries: &[NodeId]) -> ReplSetResult<()> {
        info!(
            "Freezing {:?}",
            secondaries.iter().map(|&id| self.host(id)).collect::<Vec<_>>()
        );
        for &secondary in secondaries {
            self.freeze(secondary).await?;
            guard.frozen.push(secondary);
        }

        // freezing may have stepped down a member that was unexpectedly primary
        self.get_primary().await?;

        self.client(guard.primary)?
            .fsync_lock(true)
            .await
            .rpc_context(|| format!("locking {}", self.host(guard.primary)))?;
        guard.locked = true;
        Ok(())
    }
}

/// Frozen secondaries and a write-locked primary.
///
/// Must be handed back with [`QuiescedSet::release`].
#[derive(Debug)]
pub struct QuiescedSet<'a, C: AdminClient> {
    set: &'a ReplSet<C>,
    primary: NodeId,
    frozen: Vec<NodeId>,
    locked: bool,
    released: bool,
}

impl<C: AdminClient> QuiescedSet<'_, C> {
    /// The write-locked primary
    pub const fn primary(&self) -> NodeId {
        self.primary
    }

    /// The frozen members
    pub fn frozen(&self) -> &[NodeId] {
        &self.frozen
    }

    /// Unlocks the primary and unfreezes the secondaries, logging failures.
    pub async fn release(mut self) {
        self.released = true;
        let set = self.set;

        if self.locked {
            let unlocked = match set.client(self.primary) {
                Ok(client) => client.fsync_unlock().await.rpc_context(|| "unlocking primary"),
                Err(e) => Err(e),
            };
            if let Err(e) = unlocked {
                error!("Continuing after fsync unlock failure on {}: {}", set.host(self.primary), e);
            }
        }

        for &node in &self.frozen {
            if let Err(e) = set.unfreeze(node).await {
                warn!("Continuing after unfreeze failure on {}: {}", set.host(node), e);
            }
        }
        debug!("Released quiesced set {}", set.name());
    }
}

impl<C: AdminClient> Drop for QuiescedSet<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Quiesced set {} dropped without release, {} stays locked",
                self.set.name(),
                self.set.host(self.primary)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_admin::CommandKind;

    #[test]
    fn test_reconfig_retry_codes() {
        let busy = AdminError::command(CommandKind::Reconfig, ErrorCode::CurrentConfigNotCommittedYet, "busy");
        assert!(is_retryable_reconfig(&busy));

        let unreachable = AdminError::network("a:1", "connection refused");
        assert!(is_retryable_reconfig(&unreachable));

        let invalid = AdminError::command(CommandKind::Reconfig, ErrorCode::InvalidReplicaSetConfig, "bad");
        assert!(!is_retryable_reconfig(&invalid));

        let not_secondary = AdminError::command(CommandKind::Reconfig, ErrorCode::NotSecondary, "no");
        assert!(!is_retryable_reconfig(&not_secondary));
    }

    #[test]
    fn test_freeze_retry_codes() {
        let primary = AdminError::command(CommandKind::Freeze, ErrorCode::NotSecondary, "primary");
        assert!(is_retryable_freeze(&primary));

        let failed = AdminError::command(CommandKind::Freeze, ErrorCode::CommandFailed, "no");
        assert!(!is_retryable_freeze(&failed));
    }

    #[test]
    fn test_step_up_defaults() {
        let options = StepUpOptions::default();
        assert!(options.await_replication);
        assert!(options.await_writable_primary);
    }
}
