//! Oplog comparison.

use async_trait::async_trait;
use replset_admin::{AdminClient, LogName};
use tracing::info;

use super::compare::compare_reverse;
use super::report::ConsistencyReport;
use super::{ConsistencyCheck, data_bearing, hosts_of};
use crate::error::ReplSetResult;
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// Entry-by-entry comparison of the replication log
#[derive(Debug, Clone, Copy, Default)]
pub struct OplogCheck;

#[async_trait]
impl<C: AdminClient> ConsistencyCheck<C> for OplogCheck {
    fn name(&self) -> &'static str {
        "oplog"
    }

    async fn run(&self, set: &ReplSet<C>, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<ConsistencyReport> {
        if secondaries.is_empty() {
            info!("No secondaries in {}, skipping oplog check", set.name());
            return Ok(ConsistencyReport::new("oplog", hosts_of(set, &[primary])));
        }
        set.await_secondary_nodes(None, Some(secondaries), None).await?;

        let nodes = data_bearing(set, primary, secondaries).await?;
        let mut report = ConsistencyReport::new("oplog", hosts_of(set, &nodes));
        report.record(compare_reverse(set, &LogName::Oplog, &nodes).await?);
        Ok(report)
    }
}
