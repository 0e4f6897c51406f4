//! Per-collection content hash comparison.
//!
//! Databases are identified by name alone. Tenant databases carry their tenant
//! as a name prefix (`<tenant>_config`), so two tenants never share a name.

use std::collections::BTreeSet;

use async_trait::async_trait;
use replset_admin::{AdminClient, ContentHash, HashOptions, LogName};
use tracing::{debug, info, warn};

use super::compare::dump_latest;
use super::report::{ConsistencyReport, LogDump, Mismatch, Sighting};
use super::{ConsistencyCheck, data_bearing, hosts_of};
use crate::error::{AdminResultExt, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// Databases never compared, their contents legitimately differ per member
const LOCAL_DATABASE: &str = "local";

/// Per-collection digest comparison of every replicated database.
///
/// All mismatches are collected before the check fails. The newest oplog
/// entries of every member are attached to the first one.
#[derive(Debug, Clone, Default)]
pub struct DataHashCheck {
    excluded: BTreeSet<String>,
    options: HashOptions,
}

impl DataHashCheck {
    /// Check that skips the `excluded` databases
    pub fn new(excluded: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
            options: HashOptions::default(),
        }
    }

    /// Hashes with `options` instead of the defaults
    #[must_use]
    pub fn with_options(mut self, options: HashOptions) -> Self {
        self.options = options;
        self
    }

    fn is_compared(&self, database: &str) -> bool {
        database != LOCAL_DATABASE && !self.excluded.contains(database)
    }

    async fn databases<C: AdminClient>(&self, set: &ReplSet<C>, nodes: &[NodeId]) -> ReplSetResult<BTreeSet<String>> {
        let mut databases = BTreeSet::new();
        for &id in nodes {
            let listed = set
                .client(id)?
                .list_databases()
                .await
                .rpc_context(|| format!("listing databases on {}", set.host(id)))?;
            databases.extend(listed.into_iter().map(|d| d.name).filter(|name| self.is_compared(name)));
        }
        Ok(databases)
    }

    async fn hash<C: AdminClient>(&self, set: &ReplSet<C>, node: NodeId, database: &str) -> ReplSetResult<ContentHash> {
        set.client(node)?
            .content_hash(database, &self.options)
            .await
            .rpc_context(|| format!("hashing {database} on {}", set.host(node)))
    }
}

fn differing_collections(reference: &ContentHash, other: &ContentHash) -> Vec<String> {
    let names: BTreeSet<&String> = reference.collections.keys().chain(other.collections.keys()).collect();
    names
        .into_iter()
        .filter(|name| reference.collections.get(*name) != other.collections.get(*name))
        .cloned()
        .collect()
}

fn sighting<C: AdminClient>(set: &ReplSet<C>, node: NodeId, hash: &ContentHash, collection: Option<&str>) -> Sighting {
    let entry = match collection {
        Some(name) => hash.collections.get(name).cloned(),
        None => Some(hash.digest.clone()),
    };
    Sighting {
        node,
        host: set.host(node),
        entry,
    }
}

async fn dump_oplogs<C: AdminClient>(set: &ReplSet<C>, nodes: &[NodeId]) -> Vec<LogDump> {
    let mut dumps = Vec::with_capacity(nodes.len());
    for &id in nodes {
        dumps.push(dump_latest(set, id, &LogName::Oplog, set.options().dump_window).await);
    }
    dumps
}

#[async_trait]
impl<C: AdminClient> ConsistencyCheck<C> for DataHashCheck {
    fn name(&self) -> &'static str {
        "dbhash"
    }

    async fn run(&self, set: &ReplSet<C>, primary: NodeId, secondaries: &[NodeId]) -> ReplSetResult<ConsistencyReport> {
        set.await_secondary_nodes(None, Some(secondaries), None).await?;

        let nodes = data_bearing(set, primary, secondaries).await?;
        let mut report = ConsistencyReport::new("dbhash", hosts_of(set, &nodes));
        if nodes.len() < 2 {
            info!("No data-bearing secondaries in {}, skipping hash check", set.name());
            return Ok(report);
        }

        for database in self.databases(set, &nodes).await? {
            let reference = self.hash(set, primary, &database).await?;
            report
                .digests
                .entry(database.clone())
                .or_default()
                .insert(set.host(primary), reference.digest.clone());

            for &other_id in &nodes[1..] {
                let other = self.hash(set, other_id, &database).await?;
                report
                    .digests
                    .entry(database.clone())
                    .or_default()
                    .insert(set.host(other_id), other.digest.clone());
                report.entries_compared += 1;

                if other.digest == reference.digest {
                    debug!("{} matches on {}", database, set.host(other_id));
                    continue;
                }
                warn!(
                    "Database {} differs between {} and {}",
                    database,
                    set.host(primary),
                    set.host(other_id)
                );
                let mut mismatches: Vec<Mismatch> = differing_collections(&reference, &other)
                    .into_iter()
                    .map(|collection| Mismatch {
                        subject: format!("{database}.{collection}"),
                        reference: sighting(set, primary, &reference, Some(&collection)),
                        other: sighting(set, other_id, &other, Some(&collection)),
                        dumps: Vec::new(),
                    })
                    .collect();
                if mismatches.is_empty() {
                    // digests cover more than the listed collections
                    mismatches.push(Mismatch {
                        subject: database.clone(),
                        reference: sighting(set, primary, &reference, None),
                        other: sighting(set, other_id, &other, None),
                        dumps: Vec::new(),
                    });
                }
                if report.mismatches.is_empty() {
                    mismatches[0].dumps = dump_oplogs(set, &nodes).await;
                }
                report.mismatches.extend(mismatches);
            }
        }
        Ok(report)
    }
}
