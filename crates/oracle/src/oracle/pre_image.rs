//! Preimage collection comparison.

use std::collections::BTreeSet;

use async_trait::async_trait;
use replset_admin::{AdminClient, LogName};
use tracing::{debug, info};

use super::compare::compare_reverse;
use super::report::ConsistencyReport;
use super::{ConsistencyCheck, data_bearing, hosts_of};
use crate::error::{AdminResultExt, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// Comparison of every namespace's preimage log.
///
/// Namespaces are collected from all members so that one present on a single
/// member is still compared.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreImageCheck;

#[async_trait]
impl<C: AdminClient> ConsistencyCheck<C> for PreImageCheck {
    fn name(&self) -> &'static str {
        "preimages"
    }

    async fn run(&self, set: &ReplSet<C>, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<ConsistencyReport> {
        let nodes = data_bearing(set, primary, secondaries).await?;
        let mut report = ConsistencyReport::new("preimages", hosts_of(set, &nodes));
        if nodes.len() < 2 {
            info!("No data-bearing secondaries in {}, skipping preimage check", set.name());
            return Ok(report);
        }

        let mut namespaces = BTreeSet::new();
        for &id in &nodes {
            let found = set
                .client(id)?
                .pre_image_namespaces()
                .await
                .rpc_context(|| format!("listing preimage namespaces on {}", set.host(id)))?;
            debug!("{} holds preimages for {:?}", set.host(id), found);
            namespaces.extend(found);
        }

        for namespace in namespaces {
            let log = LogName::PreImages { namespace };
            report.record(compare_reverse(set, &log, &nodes).await?);
        }
        Ok(report)
    }
}
