//! Change collection comparison.

use async_trait::async_trait;
use replset_admin::{AdminClient, DatabaseInfo, LogName};
use tracing::info;

use super::compare::compare_reverse;
use super::report::ConsistencyReport;
use super::{ConsistencyCheck, data_bearing, hosts_of};
use crate::error::{AdminResultExt, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;

const CONFIG_DATABASE: &str = "config";

fn holds_change_collection(database: &DatabaseInfo) -> bool {
    database.name == CONFIG_DATABASE
        || database
            .tenant
            .as_ref()
            .is_some_and(|tenant| database.name == format!("{tenant}_{CONFIG_DATABASE}"))
}

/// Comparison of the change collection of every tenant config database
/// the primary knows about
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeCollectionCheck;

#[async_trait]
impl<C: AdminClient> ConsistencyCheck<C> for ChangeCollectionCheck {
    fn name(&self) -> &'static str {
        "change collections"
    }

    async fn run(&self, set: &ReplSet<C>, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<ConsistencyReport> {
        let nodes = data_bearing(set, primary, secondaries).await?;
        let mut report = ConsistencyReport::new("change collections", hosts_of(set, &nodes));
        if nodes.len() < 2 {
            info!("No data-bearing secondaries in {}, skipping change collection check", set.name());
            return Ok(report);
        }

        let databases = set
            .client(primary)?
            .list_databases()
            .await
            .rpc_context(|| format!("listing databases on {}", set.host(primary)))?;
        for database in databases.into_iter().filter(holds_change_collection) {
            let log = LogName::ChangeCollection {
                database: database.name,
            };
            report.record(compare_reverse(set, &log, &nodes).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(name: &str, tenant: Option<&str>) -> DatabaseInfo {
        DatabaseInfo {
            name: name.to_string(),
            tenant: tenant.map(str::to_string),
        }
    }

    #[test]
    fn test_change_collection_databases() {
        assert!(holds_change_collection(&database("config", None)));
        assert!(holds_change_collection(&database("acme_config", Some("acme"))));
        assert!(!holds_change_collection(&database("acme_config", None)));
        assert!(!holds_change_collection(&database("acme_data", Some("acme"))));
        assert!(!holds_change_collection(&database("test", None)));
    }
}
