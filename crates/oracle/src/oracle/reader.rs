//! Newest-first reading of one member's copy of a log.

use std::collections::VecDeque;

use replset_admin::{AdminClient, AdminError, ErrorCode, LogCursor, LogEntry, LogName, LogQuery};
use tracing::{debug, warn};

use crate::error::{Error, ReplSetResult};
use crate::topology::NodeId;

/// Result of stepping a reverse reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Next older entry
    Entry(LogEntry),
    /// The oldest entry was already returned
    Exhausted,
    /// Capped eviction overtook the cursor
    Truncated,
}

fn is_truncation(error: &AdminError) -> bool {
    error.has_code(ErrorCode::CappedPositionLost)
}

/// Newest-to-oldest cursor over one member's copy of a log.
///
/// The cursor opens lazily on the first `next` and can be reopened from the
/// newest entry. Running off the end and losing the position to capped
/// eviction both end the scan; they are reported apart, never as errors.
pub struct ReverseReader<'a, C> {
    node: NodeId,
    host: String,
    client: &'a C,
    log: LogName,
    cursor: Option<Box<dyn LogCursor>>,
    done: bool,
    trail: VecDeque<LogEntry>,
    trail_limit: usize,
    bytes_read: usize,
}

impl<'a, C: AdminClient> ReverseReader<'a, C> {
    /// Reader over `log` on `client`, remembering the last `trail_limit` entries
    pub fn new(node: NodeId, client: &'a C, log: LogName, trail_limit: usize) -> Self {
        Self {
            node,
            host: client.host().to_string(),
            client,
            log,
            cursor: None,
            done: false,
            trail: VecDeque::new(),
            trail_limit,
            bytes_read: 0,
        }
    }

    /// Member being read
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// `host:port` of the member
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Oldest entry the member still retains.
    ///
    /// # Errors
    ///
    /// Returns an RPC error for any failure but capped eviction.
    pub async fn oldest_entry(&self) -> ReplSetResult<Option<LogEntry>> {
        let query = LogQuery::oldest(self.log.clone());
        let first = match self.client.read_log(&query).await {
            Ok(mut cursor) => cursor.next_entry().await,
            Err(e) => Err(e),
        };
        match first {
            Ok(entry) => Ok(entry),
            Err(e) if is_truncation(&e) => Ok(None),
            Err(e) => Err(Error::rpc(format!("reading oldest {} entry on {}", self.log, self.host), e)),
        }
    }

    /// Next older entry.
    ///
    /// # Errors
    ///
    /// Returns an RPC error for any failure but capped eviction.
    pub async fn next(&mut self) -> ReplSetResult<ReadOutcome> {
        if self.done {
            return Ok(ReadOutcome::Exhausted);
        }

        let step = match self.cursor.as_mut() {
            Some(cursor) => cursor.next_entry().await,
            None => match self.client.read_log(&LogQuery::reverse(self.log.clone())).await {
                Ok(cursor) => self.cursor.insert(cursor).next_entry().await,
                Err(e) => Err(e),
            },
        };

        match step {
            Ok(Some(entry)) => {
                self.bytes_read += entry.size();
                self.trail.push_back(entry.clone());
                while self.trail.len() > self.trail_limit {
                    self.trail.pop_front();
                }
                Ok(ReadOutcome::Entry(entry))
            }
            Ok(None) => {
                debug!("Finished reading {} on {}", self.log, self.host);
                self.close();
                Ok(ReadOutcome::Exhausted)
            }
            Err(e) if is_truncation(&e) => {
                warn!("{} on {} was truncated while reading it: {}", self.log, self.host, e);
                self.close();
                Ok(ReadOutcome::Truncated)
            }
            Err(e) => Err(Error::rpc(format!("reading {} on {}", self.log, self.host), e)),
        }
    }

    fn close(&mut self) {
        self.cursor = None;
        self.done = true;
    }

    /// Whether the scan ended
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Starts over from the newest entry
    pub fn reopen(&mut self) {
        self.cursor = None;
        self.done = false;
        self.release_buffers();
    }

    /// Drops the remembered entries and their storage
    pub fn release_buffers(&mut self) {
        self.trail.clear();
        self.trail.shrink_to_fit();
    }

    /// Most recently read entries, oldest last
    pub const fn trail(&self) -> &VecDeque<LogEntry> {
        &self.trail
    }

    /// Bytes read since the reader was created
    pub const fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_admin::{ClusterConfig, MemberConfig};
    use replset_admin_mock::{MockReplicaSet, Write};

    async fn single_node_with_writes(writes: usize) -> MockReplicaSet {
        let set = MockReplicaSet::new(1);
        let host = set.hosts().remove(0);
        set.client(0)
            .initiate(&ClusterConfig::new("rs0", vec![MemberConfig::new(0, host)]))
            .await
            .unwrap();
        for i in 0..writes {
            set.write(Write::insert("test", "docs", format!("{{\"_id\":{i}}}"))).unwrap();
        }
        set
    }

    #[test]
    fn test_reader_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReverseReader<'static, replset_admin_mock::MockNode>>();
    }

    #[tokio::test]
    async fn test_reads_newest_first_until_exhausted() {
        let set = single_node_with_writes(3).await;
        let client = set.client(0);
        let mut reader = ReverseReader::new(NodeId::new(0), &client, LogName::Oplog, 2);

        let mut seen = Vec::new();
        loop {
            match reader.next().await.unwrap() {
                ReadOutcome::Entry(entry) => seen.push(entry.ts),
                ReadOutcome::Exhausted => break,
                ReadOutcome::Truncated => panic!("unexpected truncation"),
            }
        }

        // initiate noop plus three inserts
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|pair| pair[0] > pair[1]));
        assert!(reader.is_done());
        assert_eq!(reader.trail().len(), 2);
        assert_eq!(reader.next().await.unwrap(), ReadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_lost_position_is_truncation() {
        let set = single_node_with_writes(5).await;
        set.lose_capped_position_after(0, Some(2)).unwrap();
        let client = set.client(0);
        let mut reader = ReverseReader::new(NodeId::new(0), &client, LogName::Oplog, 10);

        assert!(matches!(reader.next().await.unwrap(), ReadOutcome::Entry(_)));
        assert!(matches!(reader.next().await.unwrap(), ReadOutcome::Entry(_)));
        assert_eq!(reader.next().await.unwrap(), ReadOutcome::Truncated);
        assert!(reader.is_done());
    }

    #[tokio::test]
    async fn test_reopen_starts_from_newest() {
        let set = single_node_with_writes(2).await;
        let client = set.client(0);
        let mut reader = ReverseReader::new(NodeId::new(0), &client, LogName::Oplog, 10);

        let ReadOutcome::Entry(newest) = reader.next().await.unwrap() else {
            panic!("expected an entry");
        };
        reader.next().await.unwrap();
        reader.reopen();
        assert!(reader.trail().is_empty());
        assert_eq!(reader.next().await.unwrap(), ReadOutcome::Entry(newest));
    }

    #[tokio::test]
    async fn test_oldest_entry_of_empty_log() {
        let set = single_node_with_writes(0).await;
        let client = set.client(0);
        let reader = ReverseReader::new(
            NodeId::new(0),
            &client,
            LogName::PreImages {
                namespace: "missing".to_string(),
            },
            10,
        );
        assert_eq!(reader.oldest_entry().await.unwrap(), None);
    }
}
