//! Primary discovery and the waits built on it.
//!
//! Every call to `discover` returns a fresh, immutable `ClusterView`; nothing
//! about roles is cached between calls.

use std::fmt;
use std::time::Duration;

use replset_admin::{AdminClient, MemberState};
use tracing::{debug, info, warn};

use crate::error::{AdminResultExt, Error, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;
use crate::wait::{Attempt, WaitOptions, await_condition};

/// Roles observed by one round of identity handshakes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    claimed_primary: Option<NodeId>,
    writable: bool,
    two_primaries: bool,
    secondaries: Vec<NodeId>,
    live: Vec<NodeId>,
    unreachable: Vec<NodeId>,
}

impl ClusterView {
    /// The unique writable primary, if the view has one
    pub fn primary(&self) -> Option<NodeId> {
        if self.two_primaries || !self.writable {
            return None;
        }
        self.claimed_primary
    }

    /// First member that claimed primary, writable or not
    pub const fn claimed_primary(&self) -> Option<NodeId> {
        self.claimed_primary
    }

    /// Whether more than one member claimed primary
    pub const fn has_two_primaries(&self) -> bool {
        self.two_primaries
    }

    /// Members not claiming primary, unreachable ones included
    pub fn secondaries(&self) -> &[NodeId] {
        &self.secondaries
    }

    /// Members that answered
    pub fn live(&self) -> &[NodeId] {
        &self.live
    }

    /// Members that did not answer
    pub fn unreachable(&self) -> &[NodeId] {
        &self.unreachable
    }

    /// Secondaries that answered
    pub fn live_secondaries(&self) -> Vec<NodeId> {
        self.secondaries
            .iter()
            .copied()
            .filter(|id| self.live.contains(id))
            .collect()
    }
}

impl fmt::Display for ClusterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primary = self
            .claimed_primary
            .map_or_else(|| "none".to_string(), |p| p.to_string());
        write!(
            f,
            "primary: {} (writable: {}, two primaries: {}), secondaries: {:?}, unreachable: {:?}",
            primary, self.writable, self.two_primaries, self.secondaries, self.unreachable
        )
    }
}

impl<C: AdminClient> ReplSet<C> {
    /// Sends the identity handshake to every member and classifies them.
    pub async fn discover(&self) -> ClusterView {
        let mut view = ClusterView::default();

        for node in self.topology().nodes() {
            match node.client().hello().await {
                Ok(reply) => {
                    view.live.push(node.id());
                    if reply.is_self_primary() {
                        if view.claimed_primary.is_some() {
                            view.two_primaries = true;
                        } else {
                            view.claimed_primary = Some(node.id());
                            view.writable = reply.is_writable_primary;
                        }
                    } else {
                        view.secondaries.push(node.id());
                    }
                }
                Err(e) => {
                    debug!("Could not reach {} during discovery: {}", node.host(), e);
                    view.unreachable.push(node.id());
                    view.secondaries.push(node.id());
                }
            }
        }

        if view.two_primaries {
            warn!("More than one member of {} claims primary: {}", self.name(), view);
        }
        view
    }

    /// The unique writable primary right now.
    ///
    /// # Errors
    ///
    /// Returns a retryable no-primary error when no member, or more than one,
    /// is a writable primary.
    pub async fn discover_primary(&self) -> ReplSetResult<NodeId> {
        let view = self.discover().await;
        view.primary()
            .ok_or_else(|| Error::no_primary(format!("no unique writable primary in {}: {}", self.name(), view)))
    }

    /// Waits for a unique writable primary using the default timeout.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if none emerges.
    pub async fn get_primary(&self) -> ReplSetResult<NodeId> {
        self.get_primary_within(self.options().timeout).await
    }

    /// Waits up to `timeout` for a unique writable primary.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if none emerges.
    pub async fn get_primary_within(&self, timeout: Duration) -> ReplSetResult<NodeId> {
        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        await_condition("finding primary", options, || async move {
            let view = self.discover().await;
            Ok(match view.primary() {
                Some(primary) => Attempt::Ready(primary),
                None => Attempt::Pending(view.to_string()),
            })
        })
        .await
    }

    /// Waits until no member claims primary.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if a primary persists.
    pub async fn await_no_primary(&self, timeout: Duration) -> ReplSetResult<()> {
        let options = WaitOptions::new(timeout, self.options().poll_interval);
        await_condition("no primary", options, || async move {
            let view = self.discover().await;
            Ok(match view.claimed_primary() {
                None => Attempt::Ready(()),
                Some(_) => Attempt::Pending(view.to_string()),
            })
        })
        .await
    }

    /// Waits until every node in `nodes` (all members by default) sees the
    /// same single primary, which must be `expected` when given.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the members never agree.
    pub async fn await_nodes_agree_on_primary(
        &self,
        timeout: Duration,
        nodes: Option<&[NodeId]>,
        expected: Option<NodeId>,
    ) -> ReplSetResult<NodeId> {
        let nodes = nodes.map_or_else(|| self.topology().ids(), <[NodeId]>::to_vec);
        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        let nodes = &nodes;

        let agreed = await_condition("nodes agreeing on primary", options, || async move {
            self.primary_agreement(nodes, expected).await
        })
        .await?;

        info!("All members of {} agree that {} is primary", self.name(), self.host(agreed));
        Ok(agreed)
    }

    async fn primary_agreement(
        &self,
        nodes: &[NodeId],
        expected: Option<NodeId>,
    ) -> ReplSetResult<Attempt<NodeId>> {
        let mut agreed = expected;

        for &id in nodes {
            let status = self
                .client(id)?
                .status()
                .await
                .rpc_context(|| format!("reading status of {}", self.host(id)))?;

            let primaries: Vec<&str> = status
                .members
                .iter()
                .filter(|m| m.state == MemberState::Primary)
                .map(|m| m.name.as_str())
                .collect();
            let seen = match primaries.as_slice() {
                [] => {
                    return Ok(Attempt::Pending(format!("{} sees no primary", self.host(id))));
                }
                [primary] => *primary,
                _ => {
                    return Ok(Attempt::Pending(format!(
                        "{} sees more than one primary: {:?}",
                        self.host(id),
                        primaries
                    )));
                }
            };
            let Some(seen) = self.id_of(seen) else {
                return Ok(Attempt::Pending(format!("{} sees unknown primary {seen}", self.host(id))));
            };

            match agreed {
                None => agreed = Some(seen),
                Some(primary) if primary != seen => {
                    return Ok(Attempt::Pending(format!(
                        "{} sees {} as primary, expected {}",
                        self.host(id),
                        self.host(seen),
                        self.host(primary)
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(agreed.map_or_else(
            || Attempt::Pending("no members to ask".to_string()),
            Attempt::Ready,
        ))
    }

    /// Waits until every listed member (every non-primary by default)
    /// reports itself secondary or arbiter.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if some member never gets there.
    pub async fn await_secondary_nodes(
        &self,
        timeout: Option<Duration>,
        secondaries: Option<&[NodeId]>,
        interval: Option<Duration>,
    ) -> ReplSetResult<()> {
        let timeout = timeout.unwrap_or(self.options().timeout);
        let interval = interval.unwrap_or(self.options().poll_interval);
        let targets = match secondaries {
            Some(ids) => ids.to_vec(),
            None => {
                let primary = self.get_primary_within(timeout).await?;
                self.topology()
                    .ids()
                    .into_iter()
                    .filter(|&id| id != primary)
                    .collect()
            }
        };
        let targets = &targets;

        let options = WaitOptions::new(timeout, interval).tolerating_errors();
        await_condition("secondaries coming up", options, || async move {
            for &id in targets {
                let hello = self
                    .client(id)?
                    .hello()
                    .await
                    .rpc_context(|| format!("hello to {}", self.host(id)))?;
                if !(hello.secondary || hello.arbiter_only) {
                    return Ok(Attempt::Pending(format!(
                        "{} is neither secondary nor arbiter",
                        self.host(id)
                    )));
                }
            }
            Ok(Attempt::Ready(()))
        })
        .await
    }

    /// Members that report themselves arbiters.
    ///
    /// # Errors
    ///
    /// Returns an error if a member cannot be reached.
    pub async fn arbiters(&self) -> ReplSetResult<Vec<NodeId>> {
        let mut arbiters = Vec::new();
        for node in self.topology().nodes() {
            let hello = node
                .client()
                .hello()
                .await
                .rpc_context(|| format!("hello to {}", node.host()))?;
            if hello.arbiter_only {
                arbiters.push(node.id());
            }
        }
        Ok(arbiters)
    }

    /// Non-primary members that answered the last handshake
    pub async fn live_secondaries(&self) -> Vec<NodeId> {
        self.discover().await.live_secondaries()
    }

    /// Waits until a member with the highest configured priority is primary.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if that never happens.
    pub async fn await_highest_priority_node_is_primary(&self, timeout: Duration) -> ReplSetResult<NodeId> {
        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        await_condition("highest priority member becoming primary", options, || async move {
            let primary = self.discover_primary().await?;
            let config = self
                .client(primary)?
                .config()
                .await
                .rpc_context(|| format!("reading config of {}", self.host(primary)))?;
            let highest = config.max_priority();
            let primary_priority = config
                .member(&self.host(primary))
                .map_or(0.0, |m| m.priority);
            Ok(if primary_priority >= highest {
                Attempt::Ready(primary)
            } else {
                Attempt::Pending(format!(
                    "primary {} has priority {} below {}",
                    self.host(primary),
                    primary_priority,
                    highest
                ))
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_primaries_yield_no_primary() {
        let view = ClusterView {
            claimed_primary: Some(NodeId::new(0)),
            writable: true,
            two_primaries: true,
            secondaries: vec![NodeId::new(2)],
            live: vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)],
            unreachable: Vec::new(),
        };
        assert_eq!(view.primary(), None);
        assert_eq!(view.claimed_primary(), Some(NodeId::new(0)));
    }

    #[test]
    fn test_unwritable_primary_is_not_primary() {
        let view = ClusterView {
            claimed_primary: Some(NodeId::new(1)),
            writable: false,
            ..ClusterView::default()
        };
        assert_eq!(view.primary(), None);
    }

    #[test]
    fn test_live_secondaries_skip_unreachable() {
        let view = ClusterView {
            claimed_primary: Some(NodeId::new(0)),
            writable: true,
            two_primaries: false,
            secondaries: vec![NodeId::new(1), NodeId::new(2)],
            live: vec![NodeId::new(0), NodeId::new(1)],
            unreachable: vec![NodeId::new(2)],
        };
        assert_eq!(view.primary(), Some(NodeId::new(0)));
        assert_eq!(view.live_secondaries(), vec![NodeId::new(1)]);
    }
}
