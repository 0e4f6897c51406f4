use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ClusterConfig;
use crate::error::AdminError;
use crate::log::{LogEntry, LogQuery};
use crate::status::{ContentHash, DatabaseInfo, HashOptions, HelloReply, StatusReply, ValidateReply};

/// A cursor over a replicated log.
///
/// Cursors are finite and cannot be resumed once they fail; reopen the query
/// instead. A cursor whose position was truncated away fails with
/// `ErrorCode::CappedPositionLost`.
#[async_trait]
pub trait LogCursor: Send + Sync {
    /// Next entry, or `None` when the query is exhausted.
    async fn next_entry(&mut self) -> Result<Option<LogEntry>, AdminError>;
}

/// Administrative connection to one replica set member.
#[async_trait]
pub trait AdminClient: Debug + Send + Sync + 'static {
    /// `host:port` of the member.
    fn host(&self) -> &str;

    /// Identity handshake.
    async fn hello(&self) -> Result<HelloReply, AdminError>;

    /// Replica set status as seen by this member.
    async fn status(&self) -> Result<StatusReply, AdminError>;

    /// Config this member currently runs.
    async fn config(&self) -> Result<ClusterConfig, AdminError>;

    /// Installs the first config of a fresh set.
    async fn initiate(&self, config: &ClusterConfig) -> Result<(), AdminError>;

    /// Replaces the config; must be sent to the primary.
    async fn reconfig(&self, config: &ClusterConfig, max_time: Duration) -> Result<(), AdminError>;

    /// Asks this member to run for election.
    async fn step_up(&self, timeout: Duration) -> Result<(), AdminError>;

    /// Asks this member to stop being primary for `duration`.
    async fn step_down(&self, duration: Duration, force: bool) -> Result<(), AdminError>;

    /// Makes this member decline elections for `duration`; zero unfreezes.
    async fn freeze(&self, duration: Duration) -> Result<(), AdminError>;

    /// Ends a freeze.
    async fn unfreeze(&self) -> Result<(), AdminError> {
        self.freeze(Duration::ZERO).await
    }

    /// Blocks writes on this member.
    async fn fsync_lock(&self, allow_failure: bool) -> Result<(), AdminError>;

    /// Releases a write block.
    async fn fsync_unlock(&self) -> Result<(), AdminError>;

    /// Databases held by this member.
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, AdminError>;

    /// Content digests of one database.
    async fn content_hash(&self, database: &str, options: &HashOptions) -> Result<ContentHash, AdminError>;

    /// Namespaces with recorded preimages.
    async fn pre_image_namespaces(&self) -> Result<Vec<String>, AdminError>;

    /// Opens a cursor over a replicated log.
    async fn read_log(&self, query: &LogQuery) -> Result<Box<dyn LogCursor>, AdminError>;

    /// Runs full structural validation.
    async fn validate(&self) -> Result<ValidateReply, AdminError>;
}
