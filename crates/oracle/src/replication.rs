//! Waits for secondaries to replicate up to a target member.
//!
//! Every poll classifies each secondary into a [`ProgressState`]. A secondary
//! that moved since the previous poll but is not caught up yet restarts the
//! timeout window, so a slow but live member never trips the deadline.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use replset_admin::{AdminClient, MemberState, OpTime, StatusReply};
use tracing::{debug, info, warn};

use crate::error::{AdminResultExt, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;
use crate::wait::{Attempt, WaitOptions, Waiter, await_condition, retry};

const CONFIG_VERSION_ATTEMPTS: u32 = 3;
const CONFIG_VERSION_INTERVAL: Duration = Duration::from_secs(1);

/// Which optime of a secondary is compared against the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpTimeKind {
    /// Last applied operation
    #[default]
    Applied,
    /// Last operation made durable
    Durable,
}

impl OpTimeKind {
    fn of(self, status: &StatusReply) -> OpTime {
        match self {
            Self::Applied => status.optimes.applied,
            Self::Durable => status.optimes.durable,
        }
    }
}

/// Replication progress of one secondary, recomputed every poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// At the target optime
    CaughtUp,
    /// Arbiter, nothing to replicate
    Skip,
    /// Moved since the last poll, or ahead of the target
    InProgress,
    /// Not moving and not caught up
    Stuck,
    /// Runs a different config version than the target
    ConfigMismatch,
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaughtUp => write!(f, "caught up"),
            Self::Skip => write!(f, "skipped"),
            Self::InProgress => write!(f, "in progress"),
            Self::Stuck => write!(f, "stuck"),
            Self::ConfigMismatch => write!(f, "config mismatch"),
        }
    }
}

/// Remembers the last optime and state seen per secondary.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_optime: HashMap<NodeId, OpTime>,
    last_state: HashMap<NodeId, ProgressState>,
    progressed: bool,
}

impl ProgressTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `observed` against `target` and records it.
    ///
    /// Moving in either direction counts as progress; going backwards means
    /// the member is rolling back. A member that was caught up is never
    /// reported stuck directly, it passes through `InProgress` first.
    pub fn classify(&mut self, node: NodeId, target: OpTime, observed: OpTime) -> ProgressState {
        let state = if observed.is_empty() {
            // nothing received from the primary yet
            ProgressState::Stuck
        } else {
            let made_progress = self
                .last_optime
                .insert(node, observed)
                .is_some_and(|previous| previous != observed);
            match observed.cmp(&target) {
                Ordering::Greater => ProgressState::InProgress,
                Ordering::Less if made_progress => ProgressState::InProgress,
                Ordering::Less => ProgressState::Stuck,
                Ordering::Equal => ProgressState::CaughtUp,
            }
        };

        let state = match (self.last_state.get(&node), state) {
            (Some(ProgressState::CaughtUp), ProgressState::Stuck) => ProgressState::InProgress,
            (_, state) => state,
        };
        if state == ProgressState::InProgress {
            self.progressed = true;
        }
        self.last_state.insert(node, state);
        state
    }

    /// Whether any member made progress since the last call
    pub fn take_progress(&mut self) -> bool {
        std::mem::take(&mut self.progressed)
    }

    /// Last state recorded for a member
    pub fn state(&self, node: NodeId) -> Option<ProgressState> {
        self.last_state.get(&node).copied()
    }

    /// Records a state that needs no optime comparison
    pub fn record(&mut self, node: NodeId, state: ProgressState) {
        self.last_state.insert(node, state);
    }
}

/// Parameters of [`ReplSet::await_replication`]
#[derive(Debug, Clone, Default)]
pub struct ReplicationWait {
    /// Deadline without progress; the set default when unset
    pub timeout: Option<Duration>,
    /// Poll spacing; the set default when unset
    pub interval: Option<Duration>,
    /// Members to wait for; every member but the target when unset
    pub secondaries: Option<Vec<NodeId>>,
    /// Member to replicate from; the current primary when unset
    pub target: Option<NodeId>,
    /// Which optime of the secondaries to compare
    pub optime_kind: OpTimeKind,
}

struct Target {
    node: NodeId,
    implicit: bool,
    optime: OpTime,
    config_version: u64,
}

impl<C: AdminClient> ReplSet<C> {
    /// Last applied or durable optime a member reports.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the member cannot answer.
    pub async fn last_optime(&self, node: NodeId, kind: OpTimeKind) -> ReplSetResult<OpTime> {
        let status = self
            .client(node)?
            .status()
            .await
            .rpc_context(|| format!("reading status of {}", self.host(node)))?;
        Ok(kind.of(&status))
    }

    /// Waits until every secondary has replicated the target's latest operation.
    ///
    /// # Errors
    ///
    /// Returns a timeout error when some secondary makes no progress for a
    /// whole timeout window.
    pub async fn await_replication(&self, wait: ReplicationWait) -> ReplSetResult<()> {
        let timeout = wait.timeout.unwrap_or(self.options().timeout);
        let interval = wait.interval.unwrap_or(self.options().poll_interval);
        let options = WaitOptions::new(timeout, interval).tolerating_errors();

        let implicit = wait.target.is_none();
        let node = match wait.target {
            Some(node) => node,
            None => self.get_primary_within(timeout).await?,
        };
        let optime = self.await_last_optime_written(node, options).await?;
        let config_version = self.target_config_version(node).await?;
        let mut target = Target {
            node,
            implicit,
            optime,
            config_version,
        };
        info!(
            "Awaiting replication of {} from {} at config version {}",
            target.optime,
            self.host(target.node),
            target.config_version
        );

        let secondaries = match wait.secondaries {
            Some(secondaries) => secondaries,
            None => self.discover().await.secondaries().to_vec(),
        };
        let secondaries: Vec<NodeId> = secondaries.into_iter().filter(|&id| id != node).collect();

        let mut tracker = ProgressTracker::new();
        let mut waiter = Waiter::new("replication", options);
        loop {
            let round = self
                .replication_round(&mut target, &secondaries, &mut tracker, wait.optime_kind)
                .await;
            match &round {
                Ok(Attempt::Ready(())) => {}
                Ok(Attempt::Pending(_)) if tracker.take_progress() => {
                    debug!("A secondary made progress, restarting the replication timeout");
                    waiter = Waiter::new("replication", options);
                }
                Ok(Attempt::Pending(_)) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Replication check failed, refreshing the target optime: {}", e);
                    self.refresh_target(&mut target).await;
                }
                Err(_) => {}
            }
            if waiter.step(round).await?.is_some() {
                break;
            }
        }

        info!(
            "All {} secondaries replicated {} from {}",
            secondaries.len(),
            target.optime,
            self.host(target.node)
        );
        Ok(())
    }

    async fn await_last_optime_written(&self, node: NodeId, options: WaitOptions) -> ReplSetResult<OpTime> {
        await_condition("target optime", options, || async move {
            let optime = self.last_optime(node, OpTimeKind::Applied).await?;
            Ok(if optime.is_empty() {
                Attempt::Pending(format!("{} has not written any operation", self.host(node)))
            } else {
                Attempt::Ready(optime)
            })
        })
        .await
    }

    async fn target_config_version(&self, node: NodeId) -> ReplSetResult<u64> {
        retry(
            "reading target config version",
            CONFIG_VERSION_ATTEMPTS,
            CONFIG_VERSION_INTERVAL,
            || async move { self.config_of(node).await.map(|c| c.version) },
        )
        .await
    }

    async fn refresh_target(&self, target: &mut Target) {
        if target.implicit {
            match self.discover_primary().await {
                Ok(primary) => target.node = primary,
                Err(e) => {
                    debug!("No primary while refreshing replication target: {}", e);
                    return;
                }
            }
        }
        match self.last_optime(target.node, OpTimeKind::Applied).await {
            Ok(optime) if !optime.is_empty() => target.optime = optime,
            Ok(_) => {}
            Err(e) => debug!("Could not refresh optime of {}: {}", self.host(target.node), e),
        }
    }

    async fn replication_round(
        &self,
        target: &mut Target,
        secondaries: &[NodeId],
        tracker: &mut ProgressTracker,
        kind: OpTimeKind,
    ) -> ReplSetResult<Attempt<()>> {
        for &secondary in secondaries {
            let host = self.host(secondary);

            let version = self.config_of(secondary).await?.version;
            if version != target.config_version {
                if version > target.config_version {
                    if target.implicit {
                        target.node = self.discover_primary().await?;
                    }
                    target.config_version = self.target_config_version(target.node).await?;
                    target.optime = self.last_optime(target.node, OpTimeKind::Applied).await?;
                    info!(
                        "{} runs a newer config, replicating from {} at version {} instead",
                        host,
                        self.host(target.node),
                        target.config_version
                    );
                }
                tracker.record(secondary, ProgressState::ConfigMismatch);
                return Ok(Attempt::Pending(format!(
                    "{host} runs config version {version}, target runs {}",
                    target.config_version
                )));
            }

            let status = self
                .client(secondary)?
                .status()
                .await
                .rpc_context(|| format!("reading status of {host}"))?;
            if status.my_state == MemberState::Arbiter {
                tracker.record(secondary, ProgressState::Skip);
                continue;
            }

            let observed = kind.of(&status);
            let state = tracker.classify(secondary, target.optime, observed);
            if target.optime < observed {
                target.optime = self.last_optime(target.node, OpTimeKind::Applied).await?;
                debug!("{} is ahead, target optime reset to {}", host, target.optime);
            }
            match state {
                ProgressState::CaughtUp | ProgressState::Skip => {}
                ProgressState::InProgress | ProgressState::Stuck | ProgressState::ConfigMismatch => {
                    return Ok(Attempt::Pending(format!(
                        "{host} is {state} at {observed}, target {}",
                        target.optime
                    )));
                }
            }
        }
        Ok(Attempt::Ready(()))
    }

    /// Waits until the majority commit point of every listed data-bearing
    /// member (all by default) reaches the primary's last optime.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the commit point lags behind.
    pub async fn await_last_op_committed(
        &self,
        timeout: Option<Duration>,
        members: Option<&[NodeId]>,
    ) -> ReplSetResult<OpTime> {
        let timeout = timeout.unwrap_or(self.options().timeout);
        let members = members.map_or_else(|| self.topology().ids(), <[NodeId]>::to_vec);
        let members = &members;

        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        let committed = await_condition("last operation committed", options, || async move {
            let primary = self.discover_primary().await?;
            let last = self.last_optime(primary, OpTimeKind::Applied).await?;

            for &id in members {
                let status = self
                    .client(id)?
                    .status()
                    .await
                    .rpc_context(|| format!("reading status of {}", self.host(id)))?;
                if status.my_state == MemberState::Arbiter {
                    continue;
                }
                if status.optimes.last_committed < last {
                    return Ok(Attempt::Pending(format!(
                        "{} has commit point {}, primary wrote {}",
                        self.host(id),
                        status.optimes.last_committed,
                        last
                    )));
                }
            }
            Ok(Attempt::Ready(last))
        })
        .await?;

        info!("Operation {} is majority committed on {} members", committed, members.len());
        Ok(committed)
    }

    /// Waits until every listed member (all by default) reports the same
    /// applied optime for every data-bearing member of the set.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the views never line up.
    pub async fn await_nodes_agree_on_applied_optime(
        &self,
        timeout: Option<Duration>,
        nodes: Option<&[NodeId]>,
    ) -> ReplSetResult<OpTime> {
        let timeout = timeout.unwrap_or(self.options().timeout);
        let nodes = nodes.map_or_else(|| self.topology().ids(), <[NodeId]>::to_vec);
        let nodes = &nodes;

        let options = WaitOptions::new(timeout, self.options().poll_interval).tolerating_errors();
        await_condition("members agreeing on applied optime", options, || async move {
            let mut agreed: Option<OpTime> = None;
            for &id in nodes {
                let status = self
                    .client(id)?
                    .status()
                    .await
                    .rpc_context(|| format!("reading status of {}", self.host(id)))?;
                for member in &status.members {
                    if member.state == MemberState::Arbiter {
                        continue;
                    }
                    let Some(optime) = member.optime else {
                        return Ok(Attempt::Pending(format!(
                            "{} reports no optime for {}",
                            self.host(id),
                            member.name
                        )));
                    };
                    match agreed {
                        None => agreed = Some(optime),
                        Some(expected) if expected != optime => {
                            return Ok(Attempt::Pending(format!(
                                "{} sees {} at {}, expected {}",
                                self.host(id),
                                member.name,
                                optime,
                                expected
                            )));
                        }
                        Some(_) => {}
                    }
                }
            }
            Ok(agreed.map_or_else(|| Attempt::Pending("no optimes reported".to_string()), Attempt::Ready))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_admin::Timestamp;

    fn optime(secs: u32) -> OpTime {
        OpTime::new(Timestamp::new(secs, 1), 1)
    }

    #[test]
    fn test_first_sight_behind_target_is_stuck() {
        let mut tracker = ProgressTracker::new();
        let state = tracker.classify(NodeId::new(1), optime(5), optime(3));
        assert_eq!(state, ProgressState::Stuck);
    }

    #[test]
    fn test_movement_is_progress() {
        let mut tracker = ProgressTracker::new();
        let node = NodeId::new(1);
        tracker.classify(node, optime(5), optime(3));
        assert_eq!(tracker.classify(node, optime(5), optime(4)), ProgressState::InProgress);
        assert_eq!(tracker.classify(node, optime(5), optime(4)), ProgressState::Stuck);
        assert_eq!(tracker.classify(node, optime(5), optime(5)), ProgressState::CaughtUp);
    }

    #[test]
    fn test_rollback_counts_as_progress() {
        let mut tracker = ProgressTracker::new();
        let node = NodeId::new(2);
        tracker.classify(node, optime(5), optime(4));
        assert_eq!(tracker.classify(node, optime(5), optime(2)), ProgressState::InProgress);
    }

    #[test]
    fn test_empty_optime_without_movement_is_stuck() {
        let mut tracker = ProgressTracker::new();
        let node = NodeId::new(1);
        assert_eq!(tracker.classify(node, optime(5), OpTime::EMPTY), ProgressState::Stuck);
        assert_eq!(tracker.classify(node, optime(5), OpTime::EMPTY), ProgressState::Stuck);
    }

    #[test]
    fn test_ahead_of_target_is_in_progress() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(
            tracker.classify(NodeId::new(1), optime(5), optime(6)),
            ProgressState::InProgress
        );
    }

    #[test]
    fn test_caught_up_never_turns_stuck_directly() {
        let mut tracker = ProgressTracker::new();
        let node = NodeId::new(1);
        assert_eq!(tracker.classify(node, optime(5), optime(5)), ProgressState::CaughtUp);
        // target moved on while the member sat still
        assert_eq!(tracker.classify(node, optime(7), optime(5)), ProgressState::InProgress);
        assert_eq!(tracker.classify(node, optime(7), optime(5)), ProgressState::Stuck);
    }
}
