//! In-memory replica set implementing the administrative interface.
//!
//! Every `MockNode` shares one `MockReplicaSet` state. Commands run a
//! replication round first (unless auto-sync is switched off), so a test
//! that only issues admin commands observes a set that converges on its own.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod cursor;
mod error;
mod state;

use config::Config;
use cursor::MockCursor;
pub use error::Error;
pub use state::DEFAULT_LOG_CAPACITY;
use state::{Op, SetState};

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use replset_admin::{
    AdminClient, AdminError, ClusterConfig, CommandKind, ContentHash, DatabaseInfo, ErrorCode,
    HashOptions, HelloReply, LogCursor, LogEntry, LogName, LogQuery, MemberState, MemberStatus,
    OpTime, OpTimes, SortDirection, StatusReply, ValidateReply,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// A single write against the mock primary.
#[derive(Clone, Debug)]
pub struct Write {
    database: String,
    collection: String,
    document: String,
    pre_image: Option<(String, String)>,
    change_log: Option<String>,
}

impl Write {
    /// Inserts `document` into `database.collection`.
    pub fn insert(
        database: impl Into<String>,
        collection: impl Into<String>,
        document: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            document: document.into(),
            pre_image: None,
            change_log: None,
        }
    }

    /// Also records a preimage for the namespace with the given UUID.
    #[must_use]
    pub fn with_pre_image(mut self, namespace: impl Into<String>, image: impl Into<String>) -> Self {
        self.pre_image = Some((namespace.into(), image.into()));
        self
    }

    /// Also records the write in the change collection of a tenant config database.
    #[must_use]
    pub fn with_change_log(mut self, database: impl Into<String>) -> Self {
        self.change_log = Some(database.into());
        self
    }
}

/// A simulated replica set.
#[derive(Clone, Debug)]
pub struct MockReplicaSet {
    state: Arc<Mutex<SetState>>,
}

impl MockReplicaSet {
    /// Creates `size` uninitiated members named `mock-<i>:<27017 + i>`.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self::with_hosts((0..size).map(|i| format!("mock-{i}:{}", 27017 + i)).collect())
    }

    /// Creates uninitiated members with the given hosts.
    #[must_use]
    pub fn with_hosts(hosts: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SetState::new(hosts, DEFAULT_LOG_CAPACITY))),
        }
    }

    /// Create a mock set from a set file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The set file cannot be read
    /// - The set file contains invalid JSON
    pub fn from_set_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut file = File::open(path)
            .map_err(|e| Error::SetFile(format!("Failed to open set file: {e}")))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::SetFile(format!("Failed to read set file: {e}")))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::SetFile(format!("Failed to parse set file: {e}")))?;

        let capacity = config.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY);
        Ok(Self {
            state: Arc::new(Mutex::new(SetState::new(config.hosts, capacity))),
        })
    }

    /// Connection handle to member `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the set.
    #[must_use]
    pub fn client(&self, index: usize) -> MockNode {
        let host = self.state.lock().nodes[index].host.clone();
        MockNode {
            index,
            host,
            state: Arc::clone(&self.state),
        }
    }

    /// Connection handles to every member, in order.
    #[must_use]
    pub fn clients(&self) -> Vec<MockNode> {
        (0..self.len()).map(|i| self.client(i)).collect()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hosts of every member, in order.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.state.lock().nodes.iter().map(|n| n.host.clone()).collect()
    }

    /// Applies a write on the current primary.
    ///
    /// # Errors
    ///
    /// Returns an error if no writable primary exists or the primary is fsync locked.
    pub fn write(&self, write: Write) -> Result<OpTime, Error> {
        let mut state = self.state.lock();
        let primary = state
            .primary()
            .filter(|&p| state.nodes[p].writable)
            .ok_or(Error::NoPrimary)?;
        if state.nodes[primary].fsync_locks > 0 {
            return Err(Error::WritesBlocked(state.nodes[primary].host.clone()));
        }
        let op = Op::Insert {
            database: write.database,
            collection: write.collection,
            document: write.document,
        };
        Ok(state.append(primary, op, write.pre_image, write.change_log))
    }

    /// Runs one replication round.
    pub fn sync(&self) {
        self.state.lock().tick();
    }

    /// Enables or disables the replication round run before each command.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.state.lock().auto_sync = enabled;
    }

    /// Makes a member reachable or unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_up(&self, index: usize, up: bool) -> Result<(), Error> {
        self.with_node(index, |n| n.up = up)
    }

    /// Pauses or resumes replication into a member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_replicating(&self, index: usize, replicating: bool) -> Result<(), Error> {
        self.with_node(index, |n| n.replicating = replicating)
    }

    /// Makes a member claim primary without demoting anyone else.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn force_primary(&self, index: usize) -> Result<(), Error> {
        self.with_node(index, |n| n.state = MemberState::Primary)
    }

    /// Controls whether a primary reports itself writable.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_writable(&self, index: usize, writable: bool) -> Result<(), Error> {
        self.with_node(index, |n| n.writable = writable)
    }

    /// Controls whether a member understands the step-up command.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_step_up_supported(&self, index: usize, supported: bool) -> Result<(), Error> {
        self.with_node(index, |n| n.step_up_supported = supported)
    }

    /// Shrinks or grows the capacity of every capped log on a member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_log_capacity(&self, index: usize, capacity: usize) -> Result<(), Error> {
        self.with_node(index, |n| {
            n.log_capacity = capacity;
            n.enforce_capacity();
        })
    }

    /// Queues a failure for the next `command` sent to a member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn fail_next(&self, index: usize, command: CommandKind, code: ErrorCode) -> Result<(), Error> {
        self.with_node(index, |n| {
            n.failures
                .entry(command)
                .or_default()
                .push_back(AdminError::command(command, code, "injected failure"));
        })
    }

    /// Makes every cursor on a member lose its position after `entries` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn lose_capped_position_after(&self, index: usize, entries: Option<usize>) -> Result<(), Error> {
        self.with_node(index, |n| n.lose_position_after = entries)
    }

    /// Makes validation of a member report problems.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn set_validation_errors(&self, index: usize, errors: Vec<String>) -> Result<(), Error> {
        self.with_node(index, |n| n.validation_errors = errors)
    }

    /// Rewrites the newest oplog entry of one member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn corrupt_latest_oplog_entry(&self, index: usize) -> Result<(), Error> {
        self.with_node(index, |n| {
            if let Some(record) = n.oplog.back_mut() {
                record.entry = corrupted(&record.entry);
            }
        })
    }

    /// Rewrites the newest preimage of a namespace on one member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn corrupt_latest_pre_image(&self, index: usize, namespace: &str) -> Result<(), Error> {
        self.with_node(index, |n| {
            if let Some(entry) = n.pre_images.get_mut(namespace).and_then(VecDeque::back_mut) {
                *entry = corrupted(entry);
            }
        })
    }

    /// Rewrites the newest change collection entry of a database on one member.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn corrupt_latest_change_entry(&self, index: usize, database: &str) -> Result<(), Error> {
        self.with_node(index, |n| {
            if let Some(entry) = n.change_logs.get_mut(database).and_then(VecDeque::back_mut) {
                *entry = corrupted(entry);
            }
        })
    }

    /// Inserts a document on one member only.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is outside the set.
    pub fn insert_locally(
        &self,
        index: usize,
        database: &str,
        collection: &str,
        document: &str,
    ) -> Result<(), Error> {
        self.with_node(index, |n| {
            n.collections
                .entry(database.to_string())
                .or_default()
                .entry(collection.to_string())
                .or_default()
                .push(document.to_string());
        })
    }

    /// Config versions of every successful reconfiguration, in order.
    #[must_use]
    pub fn reconfig_versions(&self) -> Vec<u64> {
        self.state.lock().reconfig_versions.clone()
    }

    /// Index of the member currently in primary state.
    #[must_use]
    pub fn primary(&self) -> Option<usize> {
        self.state.lock().primary()
    }

    /// Replication state of a member.
    #[must_use]
    pub fn member_state(&self, index: usize) -> Option<MemberState> {
        self.state.lock().nodes.get(index).map(|n| n.state)
    }

    /// Applied op time of a member.
    #[must_use]
    pub fn applied(&self, index: usize) -> Option<OpTime> {
        self.state.lock().nodes.get(index).map(|n| n.applied)
    }

    /// Whether a member is frozen.
    #[must_use]
    pub fn is_frozen(&self, index: usize) -> bool {
        self.state.lock().nodes.get(index).is_some_and(|n| n.frozen)
    }

    /// Number of fsync locks held on a member.
    #[must_use]
    pub fn fsync_lock_count(&self, index: usize) -> u32 {
        self.state.lock().nodes.get(index).map_or(0, |n| n.fsync_locks)
    }

    fn with_node<F>(&self, index: usize, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut state::NodeState),
    {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(index).ok_or(Error::UnknownMember(index))?;
        f(node);
        Ok(())
    }
}

fn corrupted(entry: &LogEntry) -> LogEntry {
    let mut raw = entry.raw.to_vec();
    raw.extend_from_slice(b" ");
    LogEntry::new(entry.ts, raw)
}

fn sha256_hex(parts: impl IntoIterator<Item = impl AsRef<[u8]>>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn tenant_of(database: &str) -> Option<String> {
    database.strip_suffix("_config").map(str::to_string)
}

/// Connection to one member of a `MockReplicaSet`.
#[derive(Clone, Debug)]
pub struct MockNode {
    index: usize,
    host: String,
    state: Arc<Mutex<SetState>>,
}

impl MockNode {
    fn command_error(command: CommandKind, code: ErrorCode, message: &str) -> AdminError {
        AdminError::command(command, code, message)
    }
}

#[async_trait]
impl AdminClient for MockNode {
    fn host(&self) -> &str {
        &self.host
    }

    async fn hello(&self) -> Result<HelloReply, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::Hello)?;

        let node = &state.nodes[self.index];
        let Some(config) = &node.config else {
            return Ok(HelloReply::default());
        };
        let primary = if node.state == MemberState::Primary {
            Some(node.host.clone())
        } else {
            state.primary().map(|p| state.nodes[p].host.clone())
        };

        Ok(HelloReply {
            me: config.member(&node.host).map(|m| m.host.clone()),
            primary,
            is_writable_primary: node.state == MemberState::Primary && node.writable,
            secondary: node.state == MemberState::Secondary,
            arbiter_only: node.is_arbiter(),
            set_version: Some(config.version),
            hosts: config
                .members
                .iter()
                .filter(|m| !m.arbiter_only && !m.hidden)
                .map(|m| m.host.clone())
                .collect(),
        })
    }

    async fn status(&self) -> Result<StatusReply, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::GetStatus)?;

        let node = &state.nodes[self.index];
        let Some(config) = &node.config else {
            return Err(Self::command_error(
                CommandKind::GetStatus,
                ErrorCode::NotYetInitialized,
                "no replset config has been received",
            ));
        };

        let members = config
            .members
            .iter()
            .map(|m| match state.index_of(&m.host) {
                Some(i) => {
                    let other = &state.nodes[i];
                    let reachable = other.up;
                    MemberStatus {
                        id: m.id,
                        name: m.host.clone(),
                        state: if reachable { other.state } else { MemberState::Down },
                        optime: (reachable && !other.is_arbiter()).then_some(other.applied),
                        config_version: other.config_version(),
                        config_term: other.config_term(),
                        is_self: i == self.index,
                    }
                }
                None => MemberStatus {
                    id: m.id,
                    name: m.host.clone(),
                    state: MemberState::Unknown,
                    optime: None,
                    config_version: 0,
                    config_term: -1,
                    is_self: false,
                },
            })
            .collect();

        Ok(StatusReply {
            set: config.name.clone(),
            my_state: node.state,
            term: state.term,
            optimes: OpTimes {
                applied: node.applied,
                durable: node.applied,
                last_committed: node.last_committed,
            },
            members,
        })
    }

    async fn config(&self) -> Result<ClusterConfig, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::GetConfig)?;

        state.nodes[self.index].config.clone().ok_or_else(|| {
            Self::command_error(
                CommandKind::GetConfig,
                ErrorCode::NotYetInitialized,
                "no replset config has been received",
            )
        })
    }

    async fn initiate(&self, config: &ClusterConfig) -> Result<(), AdminError> {
        const COMMAND: CommandKind = CommandKind::Initiate;
        let mut state = self.state.lock();
        state.begin(self.index, COMMAND)?;

        if state.nodes[self.index].config.is_some() {
            return Err(Self::command_error(COMMAND, ErrorCode::AlreadyInitialized, "already initialized"));
        }
        let Some(me) = config.member(&self.host) else {
            return Err(Self::command_error(
                COMMAND,
                ErrorCode::InvalidReplicaSetConfig,
                "receiving member is not part of the config",
            ));
        };
        let electable = me.is_electable();
        for member in &config.members {
            let reachable = state.index_of(&member.host).is_some_and(|i| state.nodes[i].up);
            if !reachable {
                return Err(Self::command_error(
                    COMMAND,
                    ErrorCode::NodeNotFound,
                    &format!("{} is unreachable", member.host),
                ));
            }
        }

        state.term = state.term.max(1);
        let mut installed = config.clone();
        installed.term = Some(state.term);
        let node = &mut state.nodes[self.index];
        node.config = Some(installed);
        node.state = if electable {
            MemberState::Primary
        } else {
            MemberState::Secondary
        };
        if electable {
            state.append(self.index, Op::Noop, None, None);
        }
        info!("Initiated set {} on {} at version {}", config.name, self.host, config.version);
        Ok(())
    }

    async fn reconfig(&self, config: &ClusterConfig, _max_time: Duration) -> Result<(), AdminError> {
        const COMMAND: CommandKind = CommandKind::Reconfig;
        let mut state = self.state.lock();
        state.begin(self.index, COMMAND)?;

        let node = &state.nodes[self.index];
        if node.state != MemberState::Primary {
            return Err(Self::command_error(COMMAND, ErrorCode::NotWritablePrimary, "not primary"));
        }
        let Some(current) = node.config.clone() else {
            return Err(Self::command_error(COMMAND, ErrorCode::NotYetInitialized, "no config"));
        };
        if config.name != current.name {
            return Err(Self::command_error(
                COMMAND,
                ErrorCode::InvalidReplicaSetConfig,
                "set name may not change",
            ));
        }
        if config.version <= current.version {
            return Err(Self::command_error(
                COMMAND,
                ErrorCode::NewReplicaSetConfigurationIncompatible,
                &format!(
                    "new config version {} must be greater than current version {}",
                    config.version, current.version
                ),
            ));
        }
        if current.voter_changes(config) > 1 {
            return Err(Self::command_error(
                COMMAND,
                ErrorCode::NewReplicaSetConfigurationIncompatible,
                "non-force replica set reconfig can only add or remove at most 1 voting member",
            ));
        }
        if !state.is_committed(&current) {
            return Err(Self::command_error(
                COMMAND,
                ErrorCode::CurrentConfigNotCommittedYet,
                "current config is not yet committed",
            ));
        }
        for member in &config.members {
            let reachable = state.index_of(&member.host).is_some_and(|i| state.nodes[i].up);
            if !reachable {
                return Err(Self::command_error(
                    COMMAND,
                    ErrorCode::NodeNotFound,
                    &format!("quorum check failed: {} is unreachable", member.host),
                ));
            }
        }

        let mut installed = config.clone();
        installed.term = Some(state.term);
        state.nodes[self.index].config = Some(installed);
        state.reconfig_versions.push(config.version);
        state.append(self.index, Op::Noop, None, None);
        info!("Reconfigured set {} to version {}", config.name, config.version);
        Ok(())
    }

    async fn step_up(&self, _timeout: Duration) -> Result<(), AdminError> {
        const COMMAND: CommandKind = CommandKind::StepUp;
        let mut state = self.state.lock();
        if !state.nodes[self.index].step_up_supported {
            return Err(Self::command_error(COMMAND, ErrorCode::CommandNotFound, "no such command"));
        }
        state.begin(self.index, COMMAND)?;

        let node = &state.nodes[self.index];
        let Some(config) = &node.config else {
            return Err(Self::command_error(COMMAND, ErrorCode::NotYetInitialized, "no config"));
        };
        if !config.member(&node.host).is_some_and(|m| m.is_electable()) {
            return Err(Self::command_error(COMMAND, ErrorCode::CommandFailed, "member is not electable"));
        }
        if node.frozen {
            return Err(Self::command_error(COMMAND, ErrorCode::CommandFailed, "member is frozen"));
        }
        match node.state {
            MemberState::Primary => return Ok(()),
            MemberState::Secondary => {}
            _ => {
                return Err(Self::command_error(COMMAND, ErrorCode::NotSecondary, "not a secondary"));
            }
        }

        if let Some(old) = state.primary() {
            state.catch_up(old, self.index);
            state.nodes[old].state = MemberState::Secondary;
        }
        state.term += 1;
        let term = state.term;
        let node = &mut state.nodes[self.index];
        node.state = MemberState::Primary;
        if let Some(config) = node.config.as_mut() {
            config.term = Some(term);
        }
        state.append(self.index, Op::Noop, None, None);
        info!("{} stepped up in term {}", self.host, term);
        Ok(())
    }

    async fn step_down(&self, _duration: Duration, _force: bool) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::StepDown)?;

        let node = &mut state.nodes[self.index];
        if node.state != MemberState::Primary {
            return Err(Self::command_error(
                CommandKind::StepDown,
                ErrorCode::NotWritablePrimary,
                "not primary so can't step down",
            ));
        }
        node.state = MemberState::Secondary;
        debug!("{} stepped down", self.host);
        Ok(())
    }

    async fn freeze(&self, duration: Duration) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::Freeze)?;

        let node = &mut state.nodes[self.index];
        if duration.is_zero() {
            node.frozen = false;
            return Ok(());
        }
        if node.state == MemberState::Primary {
            return Err(Self::command_error(
                CommandKind::Freeze,
                ErrorCode::NotSecondary,
                "cannot freeze node when primary",
            ));
        }
        node.frozen = true;
        Ok(())
    }

    async fn fsync_lock(&self, _allow_failure: bool) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::FsyncLock)?;
        state.nodes[self.index].fsync_locks += 1;
        Ok(())
    }

    async fn fsync_unlock(&self) -> Result<(), AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::FsyncUnlock)?;

        let node = &mut state.nodes[self.index];
        if node.fsync_locks == 0 {
            return Err(Self::command_error(CommandKind::FsyncUnlock, ErrorCode::CommandFailed, "not locked"));
        }
        node.fsync_locks -= 1;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::ListDatabases)?;

        let node = &state.nodes[self.index];
        if node.is_arbiter() {
            return Ok(Vec::new());
        }
        let mut databases: Vec<DatabaseInfo> = node
            .collections
            .keys()
            .map(|name| DatabaseInfo {
                name: name.clone(),
                tenant: tenant_of(name),
            })
            .collect();
        for name in node.change_logs.keys() {
            if !databases.iter().any(|d| &d.name == name) {
                databases.push(DatabaseInfo {
                    name: name.clone(),
                    tenant: tenant_of(name),
                });
            }
        }
        Ok(databases)
    }

    async fn content_hash(&self, database: &str, options: &HashOptions) -> Result<ContentHash, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::ContentHash)?;

        let node = &state.nodes[self.index];
        if node.is_arbiter() {
            return Err(Self::command_error(
                CommandKind::ContentHash,
                ErrorCode::CommandFailed,
                "arbiters hold no data",
            ));
        }
        let empty = BTreeMap::new();
        let collections: BTreeMap<String, String> = node
            .collections
            .get(database)
            .unwrap_or(&empty)
            .iter()
            .filter(|(name, _)| options.collections.is_empty() || options.collections.contains(*name))
            .filter(|(name, _)| !(options.skip_temp_collections && name.starts_with("tmp")))
            .map(|(name, docs)| (name.clone(), sha256_hex(docs)))
            .collect();
        let digest = sha256_hex(collections.iter().map(|(name, hash)| format!("{name}:{hash}")));

        Ok(ContentHash {
            database: database.to_string(),
            collections,
            digest,
        })
    }

    async fn pre_image_namespaces(&self) -> Result<Vec<String>, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::PreImageNamespaces)?;
        Ok(state.nodes[self.index].pre_images.keys().cloned().collect())
    }

    async fn read_log(&self, query: &LogQuery) -> Result<Box<dyn LogCursor>, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::ReadLog)?;

        let node = &state.nodes[self.index];
        let source: Vec<&LogEntry> = match &query.log {
            LogName::Oplog => node.oplog.iter().map(|r| &r.entry).collect(),
            LogName::PreImages { namespace } => node
                .pre_images
                .get(namespace)
                .map(|log| log.iter().collect())
                .unwrap_or_default(),
            LogName::ChangeCollection { database } => node
                .change_logs
                .get(database)
                .map(|log| log.iter().collect())
                .unwrap_or_default(),
        };
        let matching = source.into_iter().filter(|e| query.filter.matches(e.ts));
        let ordered: Vec<LogEntry> = match query.direction {
            SortDirection::Forward => matching.cloned().collect(),
            SortDirection::Reverse => matching.rev().cloned().collect(),
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        let entries: VecDeque<LogEntry> = ordered.into_iter().take(limit).collect();

        Ok(Box::new(MockCursor::new(entries, node.lose_position_after)))
    }

    async fn validate(&self) -> Result<ValidateReply, AdminError> {
        let mut state = self.state.lock();
        state.begin(self.index, CommandKind::Validate)?;

        let errors = state.nodes[self.index].validation_errors.clone();
        Ok(ValidateReply {
            valid: errors.is_empty(),
            errors,
        })
    }
}
