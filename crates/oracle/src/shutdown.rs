//! Checks run before a set is torn down.

use replset_admin::{AdminClient, ValidateReply};
use tracing::{debug, error, info, warn};

use crate::error::{AdminResultExt, Error, ReplSetResult};
use crate::oracle::{ChangeCollectionCheck, ConsistencyCheck, DataHashCheck, OplogCheck, PreImageCheck};
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// Which shutdown checks to leave out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownChecks {
    /// Skip the oplog, preimage, change collection and hash comparisons
    pub skip_consistency: bool,
    /// Skip structural validation of every member
    pub skip_validation: bool,
}

impl<C: AdminClient> ReplSet<C> {
    /// Compares replicated state and validates every reachable member.
    ///
    /// Nothing is compared unless there is a primary and more than one member
    /// is reachable.
    ///
    /// # Errors
    ///
    /// Returns the first failing comparison, or a validation error naming
    /// every member that failed validation.
    pub async fn run_shutdown_checks(&self, checks: ShutdownChecks) -> ReplSetResult<()> {
        let view = self.discover().await;
        let Some(primary) = view.primary() else {
            warn!("Skipping shutdown checks on {}, no primary: {}", self.name(), view);
            return Ok(());
        };
        if view.live().len() < 2 {
            info!("Skipping shutdown checks on {}, only one member is up", self.name());
            return Ok(());
        }
        debug!("Running shutdown checks on {} with primary {}", self.name(), self.host(primary));

        if !checks.skip_consistency {
            let comparisons: [&dyn ConsistencyCheck<C>; 4] = [
                &OplogCheck,
                &PreImageCheck,
                &ChangeCollectionCheck,
                &DataHashCheck::default(),
            ];
            for check in comparisons {
                self.check_replica_set(check, None).await?;
            }
        }

        if !checks.skip_validation {
            self.validate_nodes(view.live()).await?;
        }
        Ok(())
    }

    /// Validates `nodes` concurrently.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every member that is invalid or
    /// could not be validated.
    pub async fn validate_nodes(&self, nodes: &[NodeId]) -> ReplSetResult<()> {
        let mut handles = Vec::with_capacity(nodes.len());
        for &id in nodes {
            let client = self.node(id)?.handle();
            handles.push(tokio::spawn(async move {
                let reply = client
                    .validate()
                    .await
                    .rpc_context(|| format!("validating {}", client.host()));
                (client.host().to_string(), reply)
            }));
        }

        let mut failures = Vec::new();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok((host, Ok(ValidateReply { valid: true, .. }))) => {
                    debug!("{} validated", host);
                }
                Ok((host, Ok(reply))) => {
                    error!("{} failed validation: {:?}", host, reply.errors);
                    failures.push(format!("{host}: {}", reply.errors.join("; ")));
                }
                Ok((host, Err(e))) => {
                    error!("Could not validate {}: {}", host, e);
                    failures.push(format!("{host}: {e}"));
                }
                Err(e) => {
                    error!("Validation task failed: {}", e);
                    failures.push(format!("validation task failed: {e}"));
                }
            }
        }

        if failures.is_empty() {
            info!("All {} members of {} validated", nodes.len(), self.name());
            Ok(())
        } else {
            Err(Error::validation(failures.join(", ")))
        }
    }
}
