//! Shared state of the simulated set and its replication rules.

use std::collections::{BTreeMap, HashMap, VecDeque};

use replset_admin::{
    AdminError, ClusterConfig, CommandKind, LogEntry, MemberState, OpTime, Timestamp,
};
use serde_json::json;
use tracing::debug;

/// Default number of entries each capped log retains.
pub const DEFAULT_LOG_CAPACITY: usize = 100_000;

#[derive(Clone, Debug)]
pub enum Op {
    Noop,
    Insert {
        database: String,
        collection: String,
        document: String,
    },
}

/// One oplog entry together with what applying it does.
#[derive(Clone, Debug)]
pub struct Record {
    pub optime: OpTime,
    pub entry: LogEntry,
    pub op: Op,
    pub pre_image: Option<(String, LogEntry)>,
    pub change_log: Option<String>,
}

type Collections = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug)]
pub struct NodeState {
    pub host: String,
    pub up: bool,
    pub config: Option<ClusterConfig>,
    pub state: MemberState,
    pub frozen: bool,
    pub fsync_locks: u32,
    pub replicating: bool,
    pub writable: bool,
    pub step_up_supported: bool,
    pub log_capacity: usize,
    pub applied: OpTime,
    pub last_committed: OpTime,
    pub oplog: VecDeque<Record>,
    pub collections: Collections,
    pub pre_images: BTreeMap<String, VecDeque<LogEntry>>,
    pub change_logs: BTreeMap<String, VecDeque<LogEntry>>,
    pub failures: HashMap<CommandKind, VecDeque<AdminError>>,
    pub lose_position_after: Option<usize>,
    pub validation_errors: Vec<String>,
}

impl NodeState {
    pub fn new(host: String, log_capacity: usize) -> Self {
        Self {
            host,
            up: true,
            config: None,
            state: MemberState::Startup,
            frozen: false,
            fsync_locks: 0,
            replicating: true,
            writable: true,
            step_up_supported: true,
            log_capacity,
            applied: OpTime::EMPTY,
            last_committed: OpTime::EMPTY,
            oplog: VecDeque::new(),
            collections: Collections::new(),
            pre_images: BTreeMap::new(),
            change_logs: BTreeMap::new(),
            failures: HashMap::new(),
            lose_position_after: None,
            validation_errors: Vec::new(),
        }
    }

    pub fn is_arbiter(&self) -> bool {
        self.config
            .as_ref()
            .and_then(|c| c.member(&self.host))
            .is_some_and(|m| m.arbiter_only)
    }

    pub fn config_version(&self) -> u64 {
        self.config.as_ref().map_or(0, |c| c.version)
    }

    pub fn config_term(&self) -> i64 {
        self.config.as_ref().and_then(|c| c.term).unwrap_or(-1)
    }

    pub fn apply(&mut self, record: &Record) {
        if let Op::Insert {
            database,
            collection,
            document,
        } = &record.op
        {
            self.collections
                .entry(database.clone())
                .or_default()
                .entry(collection.clone())
                .or_default()
                .push(document.clone());
        }
        if let Some((namespace, image)) = &record.pre_image {
            let log = self.pre_images.entry(namespace.clone()).or_default();
            log.push_back(image.clone());
            truncate(log, self.log_capacity);
        }
        if let Some(database) = &record.change_log {
            let log = self.change_logs.entry(database.clone()).or_default();
            log.push_back(record.entry.clone());
            truncate(log, self.log_capacity);
        }
        self.oplog.push_back(record.clone());
        truncate(&mut self.oplog, self.log_capacity);
        self.applied = record.optime;
    }

    pub fn enforce_capacity(&mut self) {
        let capacity = self.log_capacity;
        truncate(&mut self.oplog, capacity);
        for log in self.pre_images.values_mut() {
            truncate(log, capacity);
        }
        for log in self.change_logs.values_mut() {
            truncate(log, capacity);
        }
    }
}

fn truncate<T>(log: &mut VecDeque<T>, capacity: usize) {
    while log.len() > capacity {
        log.pop_front();
    }
}

#[derive(Debug)]
pub struct SetState {
    pub nodes: Vec<NodeState>,
    pub term: i64,
    pub clock: u32,
    pub auto_sync: bool,
    pub reconfig_versions: Vec<u64>,
}

impl SetState {
    pub fn new(hosts: Vec<String>, log_capacity: usize) -> Self {
        Self {
            nodes: hosts
                .into_iter()
                .map(|h| NodeState::new(h, log_capacity))
                .collect(),
            term: 0,
            clock: 0,
            auto_sync: true,
            reconfig_versions: Vec::new(),
        }
    }

    /// Runs the per-command preamble: one replication round, then
    /// reachability and injected failures.
    pub fn begin(&mut self, index: usize, command: CommandKind) -> Result<(), AdminError> {
        if self.auto_sync {
            self.tick();
        }
        let node = &mut self.nodes[index];
        if !node.up {
            return Err(AdminError::network(&node.host, "connection refused"));
        }
        if let Some(err) = node.failures.get_mut(&command).and_then(VecDeque::pop_front) {
            debug!("Injecting {} failure on {}: {}", command, node.host, err);
            return Err(err);
        }
        Ok(())
    }

    pub fn index_of(&self, host: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.host == host)
    }

    pub fn primary(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.up && n.state == MemberState::Primary)
    }

    pub fn next_optime(&mut self) -> OpTime {
        self.clock += 1;
        OpTime::new(Timestamp::new(self.clock, 1), self.term)
    }

    /// Appends an operation to the given primary's oplog and applies it there.
    pub fn append(
        &mut self,
        primary: usize,
        op: Op,
        pre_image: Option<(String, String)>,
        change_log: Option<String>,
    ) -> OpTime {
        let optime = self.next_optime();
        let ts = json!({ "t": optime.ts.secs, "i": optime.ts.inc });
        let document = match &op {
            Op::Noop => json!({
                "ts": ts, "t": optime.term, "op": "n", "ns": "", "o": { "msg": "periodic noop" }
            }),
            Op::Insert {
                database,
                collection,
                document,
            } => json!({
                "ts": ts, "t": optime.term, "op": "i",
                "ns": format!("{database}.{collection}"), "o": document
            }),
        };
        let entry = LogEntry::new(optime.ts, document.to_string().into_bytes());
        let pre_image = pre_image.map(|(namespace, image)| {
            let raw = json!({
                "_id": { "nsUUID": namespace, "ts": ts },
                "preImage": image,
            });
            (namespace, LogEntry::new(optime.ts, raw.to_string().into_bytes()))
        });
        let record = Record {
            optime,
            entry,
            op,
            pre_image,
            change_log,
        };
        self.nodes[primary].apply(&record);
        optime
    }

    /// One round of heartbeats and replication from the primary.
    pub fn tick(&mut self) {
        let Some(p) = self.primary() else {
            return;
        };
        let Some(primary_config) = self.nodes[p].config.clone() else {
            return;
        };

        for i in 0..self.nodes.len() {
            if i == p || !self.nodes[i].up || !self.nodes[i].replicating {
                continue;
            }
            let Some(member) = primary_config.member(&self.nodes[i].host).cloned() else {
                if self.nodes[i].config.is_some() {
                    self.nodes[i].state = MemberState::Removed;
                }
                continue;
            };

            let stale = self.nodes[i].config.as_ref().is_none_or(|c| {
                (c.version, c.term) < (primary_config.version, primary_config.term)
            });
            if stale {
                self.nodes[i].config = Some(primary_config.clone());
            }

            if member.arbiter_only {
                self.nodes[i].state = MemberState::Arbiter;
                continue;
            }

            match self.nodes[i].state {
                MemberState::Startup | MemberState::Startup2 | MemberState::Removed => {
                    self.initial_sync(p, i);
                }
                MemberState::Secondary => self.catch_up(p, i),
                _ => {}
            }
        }

        self.advance_commit_point(p, &primary_config);
    }

    fn initial_sync(&mut self, source: usize, target: usize) {
        let oplog = self.nodes[source].oplog.clone();
        let collections = self.nodes[source].collections.clone();
        let pre_images = self.nodes[source].pre_images.clone();
        let change_logs = self.nodes[source].change_logs.clone();
        let applied = self.nodes[source].applied;

        let node = &mut self.nodes[target];
        node.oplog = oplog;
        node.collections = collections;
        node.pre_images = pre_images;
        node.change_logs = change_logs;
        node.applied = applied;
        node.enforce_capacity();
        node.state = MemberState::Secondary;
        debug!("{} finished initial sync at {}", node.host, applied);
    }

    pub fn catch_up(&mut self, source: usize, target: usize) {
        let applied = self.nodes[target].applied;
        let missing: Vec<Record> = self.nodes[source]
            .oplog
            .iter()
            .filter(|r| r.optime > applied)
            .cloned()
            .collect();
        for record in &missing {
            self.nodes[target].apply(record);
        }
    }

    fn advance_commit_point(&mut self, primary: usize, config: &ClusterConfig) {
        let mut optimes: Vec<OpTime> = config
            .members
            .iter()
            .filter(|m| m.is_voter() && !m.arbiter_only)
            .filter_map(|m| self.index_of(&m.host))
            .filter(|&i| self.nodes[i].up)
            .map(|i| self.nodes[i].applied)
            .collect();
        let data_voters = config
            .members
            .iter()
            .filter(|m| m.is_voter() && !m.arbiter_only)
            .count();
        let majority = data_voters / 2 + 1;
        if optimes.len() < majority {
            return;
        }
        optimes.sort_unstable_by(|a, b| b.cmp(a));
        let committed = optimes[majority - 1];

        let hosts: Vec<usize> = config
            .members
            .iter()
            .filter_map(|m| self.index_of(&m.host))
            .chain(std::iter::once(primary))
            .collect();
        for i in hosts {
            let node = &mut self.nodes[i];
            if node.up && node.last_committed < committed {
                node.last_committed = committed;
            }
        }
    }

    /// Whether a majority of the config's voters run its version.
    pub fn is_committed(&self, config: &ClusterConfig) -> bool {
        let running = config
            .members
            .iter()
            .filter(|m| m.is_voter())
            .filter_map(|m| self.index_of(&m.host))
            .filter(|&i| self.nodes[i].up && self.nodes[i].config_version() == config.version)
            .count();
        running >= config.majority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_admin::MemberConfig;

    fn initiated(n: usize) -> SetState {
        let hosts: Vec<String> = (0..n).map(|i| format!("h{i}:1")).collect();
        let mut set = SetState::new(hosts.clone(), 3);
        let members = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| MemberConfig::new(u32::try_from(i).unwrap(), h.clone()))
            .collect();
        let mut config = ClusterConfig::new("rs", members);
        config.term = Some(1);
        set.term = 1;
        set.nodes[0].config = Some(config);
        set.nodes[0].state = MemberState::Primary;
        set
    }

    #[test]
    fn test_tick_syncs_new_members() {
        let mut set = initiated(3);
        set.append(0, Op::Noop, None, None);
        set.tick();

        assert_eq!(set.nodes[1].state, MemberState::Secondary);
        assert_eq!(set.nodes[2].applied, set.nodes[0].applied);
        assert_eq!(set.nodes[2].last_committed, set.nodes[0].applied);
    }

    #[test]
    fn test_capped_logs_drop_oldest() {
        let mut set = initiated(1);
        for _ in 0..5 {
            set.append(0, Op::Noop, None, None);
        }
        assert_eq!(set.nodes[0].oplog.len(), 3);
        assert_eq!(set.nodes[0].oplog[0].optime.ts, Timestamp::new(3, 1));
    }
}
