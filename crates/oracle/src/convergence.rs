//! Waits for members to converge on the primary's configuration.

use std::time::Duration;

use replset_admin::{AdminClient, ClusterConfig};
use tracing::{debug, info};

use crate::error::{AdminResultExt, Error, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;
use crate::wait::{Attempt, WaitOptions, Waiter, await_condition};

const CONFIG_READ_TIMEOUT: Duration = Duration::from_secs(90);

impl<C: AdminClient> ReplSet<C> {
    /// Config document a member currently runs.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the member cannot answer.
    pub async fn config_of(&self, node: NodeId) -> ReplSetResult<ClusterConfig> {
        self.client(node)?
            .config()
            .await
            .rpc_context(|| format!("reading config of {}", self.host(node)))
    }

    /// Config document of the current primary, retrying while the set has none.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no primary answers.
    pub async fn config_from_primary(&self) -> ReplSetResult<ClusterConfig> {
        let options = WaitOptions::new(CONFIG_READ_TIMEOUT, self.options().poll_interval).tolerating_errors();
        await_condition("reading config from primary", options, || async move {
            let primary = self.discover_primary().await?;
            self.config_of(primary).await.map(Attempt::Ready)
        })
        .await
    }

    /// Waits until every target (all members by default) reports the same
    /// config version and term as `primary`.
    ///
    /// If some member reports a newer version than the primary, the primary
    /// is looked up again before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the members never converge.
    pub async fn await_config_replication(
        &self,
        primary: NodeId,
        targets: Option<&[NodeId]>,
    ) -> ReplSetResult<(u64, i64)> {
        let targets = targets.map_or_else(|| self.topology().ids(), <[NodeId]>::to_vec);
        let mut primary = primary;

        let options = WaitOptions::new(self.options().timeout, self.options().poll_interval).tolerating_errors();
        let mut waiter = Waiter::new("config replication", options);
        let converged = loop {
            let round = self.config_round(&mut primary, &targets).await;
            if let Some(converged) = waiter.step(round).await? {
                break converged;
            }
        };

        info!(
            "Config version {} term {} replicated to {} members",
            converged.0,
            converged.1,
            targets.len()
        );
        Ok(converged)
    }

    async fn config_round(
        &self,
        primary: &mut NodeId,
        targets: &[NodeId],
    ) -> ReplSetResult<Attempt<(u64, i64)>> {
        let status = self
            .client(*primary)?
            .status()
            .await
            .rpc_context(|| format!("reading status of {}", self.host(*primary)))?;
        let Some(me) = status.self_member() else {
            return Err(Error::invalid_state(format!(
                "{} does not list itself in its status",
                self.host(*primary)
            )));
        };
        let expected = (me.config_version, me.config_term);

        for &target in targets {
            let host = self.host(target);
            let Some(member) = status.member(&host) else {
                return Ok(Attempt::Pending(format!("{host} is not in the primary's status")));
            };
            if member.config_version > expected.0 {
                debug!(
                    "{} runs config version {} ahead of primary {}, looking up the primary again",
                    host,
                    member.config_version,
                    self.host(*primary)
                );
                *primary = self.discover_primary().await?;
                return Ok(Attempt::Pending(format!(
                    "{host} is at config version {} ahead of the primary",
                    member.config_version
                )));
            }
            if (member.config_version, member.config_term) != expected {
                return Ok(Attempt::Pending(format!(
                    "{host} is at config (version {}, term {}), primary at (version {}, term {})",
                    member.config_version, member.config_term, expected.0, expected.1
                )));
            }
        }
        Ok(Attempt::Ready(expected))
    }

    /// Waits until every member's handshake reports the primary's config version.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if some member lags behind.
    pub async fn await_nodes_agree_on_config_version(&self, timeout: Duration) -> ReplSetResult<u64> {
        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        await_condition("members agreeing on config version", options, || async move {
            let primary = self.discover_primary().await?;
            let primary_version = self
                .client(primary)?
                .hello()
                .await
                .rpc_context(|| format!("hello to {}", self.host(primary)))?
                .set_version;
            let Some(expected) = primary_version else {
                return Ok(Attempt::Pending("primary reports no config version".to_string()));
            };

            for node in self.topology().nodes() {
                let version = node
                    .client()
                    .hello()
                    .await
                    .rpc_context(|| format!("hello to {}", node.host()))?
                    .set_version;
                if version != Some(expected) {
                    return Ok(Attempt::Pending(format!(
                        "{} reports config version {:?}, primary {}",
                        node.host(),
                        version,
                        expected
                    )));
                }
            }
            Ok(Attempt::Ready(expected))
        })
        .await
    }
}
