//! Consistency oracle.
//!
//! A check runs against a quiesced set: secondaries frozen, the primary
//! write-locked, and every secondary caught up to the primary's last write.
//! Logs are compared newest entry first, data through per-collection digests.

mod change_log;
mod compare;
mod content_hash;
mod oplog;
mod pre_image;
mod reader;
mod report;

pub use change_log::ChangeCollectionCheck;
pub use compare::{ComparisonOutcome, MemoryBudget, compare_reverse, dump_latest, dump_window};
pub use content_hash::DataHashCheck;
pub use oplog::OplogCheck;
pub use pre_image::PreImageCheck;
pub use reader::{ReadOutcome, ReverseReader};
pub use report::{ConsistencyReport, LogDump, Mismatch, Sighting};

use async_trait::async_trait;
use replset_admin::AdminClient;
use tracing::{error, info};

use crate::error::{AdminResultExt, Error, ReplSetResult};
use crate::replication::ReplicationWait;
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// A comparison run across the members of a quiesced set
#[async_trait]
pub trait ConsistencyCheck<C: AdminClient>: Send + Sync {
    /// Short name used in reports and logs
    fn name(&self) -> &'static str;

    /// Compares `secondaries` against `primary`.
    ///
    /// Disagreements are returned in the report, not as errors.
    async fn run(&self, set: &ReplSet<C>, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<ConsistencyReport>;
}

impl<C: AdminClient> ReplSet<C> {
    /// Quiesces the set, waits for replication and runs `check`.
    ///
    /// `secondaries` defaults to every reachable non-primary member. The
    /// primary is never treated as a secondary. The set is released again
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns a consistency error carrying the report when members disagree,
    /// or the error that kept the check from completing.
    pub async fn check_replica_set(
        &self,
        check: &dyn ConsistencyCheck<C>,
        secondaries: Option<Vec<NodeId>>,
    ) -> ReplSetResult<ConsistencyReport> {
        let primary = self.get_primary().await?;
        let mut secondaries = match secondaries {
            Some(ids) => ids,
            None => self.live_secondaries().await,
        };
        secondaries.retain(|&id| id != primary);

        info!(
            "Running {} check on {} against primary {}",
            check.name(),
            self.name(),
            self.host(primary)
        );
        let quiesced = self.quiesce(primary, &secondaries).await?;
        let outcome = self.run_quiesced(check, primary, &secondaries).await;
        quiesced.release().await;

        let report = outcome?;
        if report.passed() {
            info!("{}", report);
            Ok(report)
        } else {
            error!("{}", report);
            Err(Error::consistency(report))
        }
    }

    async fn run_quiesced(
        &self,
        check: &dyn ConsistencyCheck<C>,
        primary: NodeId,
        secondaries: &[NodeId],
    ) -> ReplSetResult<ConsistencyReport> {
        self.await_replication(ReplicationWait {
            target: Some(primary),
            secondaries: Some(secondaries.to_vec()),
            ..ReplicationWait::default()
        })
        .await?;
        check.run(self, primary, secondaries).await
    }

    /// Compares the oplogs of all data-bearing members.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::check_replica_set`].
    pub async fn check_oplogs(&self) -> ReplSetResult<ConsistencyReport> {
        self.check_replica_set(&OplogCheck, None).await
    }

    /// Compares per-collection digests, skipping `excluded` databases.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::check_replica_set`].
    pub async fn check_replicated_data_hashes(&self, excluded: &[&str]) -> ReplSetResult<ConsistencyReport> {
        self.check_replica_set(&DataHashCheck::new(excluded.iter().copied()), None)
            .await
    }

    /// Compares the preimage collections of all data-bearing members.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::check_replica_set`].
    pub async fn check_pre_images(&self) -> ReplSetResult<ConsistencyReport> {
        self.check_replica_set(&PreImageCheck, None).await
    }

    /// Compares the change collections of all data-bearing members.
    ///
    /// # Errors
    ///
    /// See [`ReplSet::check_replica_set`].
    pub async fn check_change_collections(&self) -> ReplSetResult<ConsistencyReport> {
        self.check_replica_set(&ChangeCollectionCheck, None).await
    }
}

/// `primary` followed by every secondary that is not an arbiter
async fn data_bearing<C: AdminClient>(
    set: &ReplSet<C>,
    primary: NodeId,
    secondaries: &[NodeId],
) -> ReplSetResult<Vec<NodeId>> {
    let mut nodes = vec![primary];
    for &id in secondaries {
        let hello = set
            .client(id)?
            .hello()
            .await
            .rpc_context(|| format!("hello to {}", set.host(id)))?;
        if hello.arbiter_only {
            info!("Skipping arbiter {}", set.host(id));
            continue;
        }
        nodes.push(id);
    }
    Ok(nodes)
}

fn hosts_of<C: AdminClient>(set: &ReplSet<C>, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|&id| set.host(id)).collect()
}
