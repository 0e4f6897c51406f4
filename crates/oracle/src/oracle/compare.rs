//! Newest-to-oldest comparison of one log across members.
//!
//! The member whose oldest retained entry is earliest holds the longest
//! history and becomes the reference. Every other member is stepped in
//! lockstep with it until the reference runs out, gets truncated, or no
//! other member has entries left. Capped logs legitimately differ in length,
//! so a member running out early is not a mismatch.

use replset_admin::{AdminClient, LogEntry, LogFilter, LogName, LogQuery, SortDirection, Timestamp};
use tracing::{debug, info, warn};

use super::reader::{ReadOutcome, ReverseReader};
use super::report::{LogDump, Mismatch, Sighting};
use crate::error::{AdminResultExt, ReplSetResult};
use crate::replset::ReplSet;
use crate::topology::NodeId;

/// Bytes read since buffered entries were last released.
#[derive(Debug)]
pub struct MemoryBudget {
    threshold: usize,
    since_release: usize,
}

impl MemoryBudget {
    /// Budget that trips after `threshold` bytes
    pub const fn new(threshold: usize) -> Self {
        Self {
            threshold,
            since_release: 0,
        }
    }

    /// Records `bytes`; true when buffers should be released now.
    pub const fn charge(&mut self, bytes: usize) -> bool {
        self.since_release += bytes;
        if self.since_release > self.threshold {
            self.since_release = 0;
            return true;
        }
        false
    }
}

/// Result of comparing one log
#[derive(Debug, Default)]
pub struct ComparisonOutcome {
    /// Entry pairs compared
    pub entries_compared: u64,
    /// First disagreement, if any
    pub mismatch: Option<Mismatch>,
    /// Times buffered entries were released
    pub memory_releases: u32,
    /// Member everything was compared against
    pub reference: Option<NodeId>,
}

fn render(entry: &LogEntry) -> String {
    entry.to_string()
}

/// Compares `log` across `nodes`, newest entry first.
///
/// # Errors
///
/// Returns an RPC error if a member cannot be read; capped truncation is not
/// an error.
pub async fn compare_reverse<C: AdminClient>(
    set: &ReplSet<C>,
    log: &LogName,
    nodes: &[NodeId],
) -> ReplSetResult<ComparisonOutcome> {
    let trail_limit = set.options().dump_window;
    let mut outcome = ComparisonOutcome::default();

    let mut readers = Vec::with_capacity(nodes.len());
    let mut earliest: Option<(usize, Timestamp)> = None;
    for &node in nodes {
        let reader = ReverseReader::new(node, set.client(node)?, log.clone(), trail_limit);
        if let Some(oldest) = reader.oldest_entry().await? {
            debug!("Oldest {} entry on {} is at {}", log, reader.host(), oldest.ts);
            if earliest.is_none_or(|(_, ts)| oldest.ts < ts) {
                earliest = Some((readers.len(), oldest.ts));
            }
        }
        readers.push(reader);
    }

    let Some((reference_index, _)) = earliest else {
        warn!("{} is empty on every member of {}, nothing to compare", log, set.name());
        return Ok(outcome);
    };
    let mut reference = readers.swap_remove(reference_index);
    outcome.reference = Some(reference.node());
    info!("Comparing {} on {} members against {}", log, nodes.len(), reference.host());

    let mut budget = MemoryBudget::new(set.options().gc_threshold_bytes);
    loop {
        let entry = match reference.next().await? {
            ReadOutcome::Entry(entry) => entry,
            ReadOutcome::Exhausted => break,
            ReadOutcome::Truncated => {
                info!("Reference {} lost its position in {}, stopping", reference.host(), log);
                break;
            }
        };
        let mut bytes = entry.size();

        for other in readers.iter_mut().filter(|r| !r.is_done()) {
            let ReadOutcome::Entry(other_entry) = other.next().await? else {
                debug!("{} has no older {} entries", other.host(), log);
                continue;
            };
            bytes += other_entry.size();
            outcome.entries_compared += 1;

            if other_entry.raw != entry.raw {
                warn!(
                    "Non-matching {} entries between {} and {} at {}",
                    log,
                    reference.host(),
                    other.host(),
                    entry.ts
                );
                let dumps = dump_all(set, log, nodes, entry.ts).await;
                outcome.mismatch = Some(Mismatch {
                    subject: log.to_string(),
                    reference: Sighting {
                        node: reference.node(),
                        host: reference.host().to_string(),
                        entry: Some(render(&entry)),
                    },
                    other: Sighting {
                        node: other.node(),
                        host: other.host().to_string(),
                        entry: Some(render(&other_entry)),
                    },
                    dumps,
                });
                return Ok(outcome);
            }
        }

        if budget.charge(bytes) {
            reference.release_buffers();
            for reader in &mut readers {
                reader.release_buffers();
            }
            outcome.memory_releases += 1;
            debug!("Released buffered {} entries after {} comparisons", log, outcome.entries_compared);
        }

        if readers.iter().all(ReverseReader::is_done) {
            break;
        }
    }

    info!(
        "{} matches on {} members, {} entries compared",
        log,
        nodes.len(),
        outcome.entries_compared
    );
    Ok(outcome)
}

async fn dump_all<C: AdminClient>(
    set: &ReplSet<C>,
    log: &LogName,
    nodes: &[NodeId],
    center: Timestamp,
) -> Vec<LogDump> {
    let mut dumps = Vec::with_capacity(nodes.len());
    for &node in nodes {
        dumps.push(dump_window(set, node, log, center, set.options().dump_window).await);
    }
    dumps
}

/// Up to `limit` entries of `log` on `node` around `center`, oldest first.
///
/// At most half of the window precedes `center`. Read failures end the
/// window early and are recorded in the dump.
pub async fn dump_window<C: AdminClient>(
    set: &ReplSet<C>,
    node: NodeId,
    log: &LogName,
    center: Timestamp,
    limit: usize,
) -> LogDump {
    let mut dump = LogDump {
        host: set.host(node),
        subject: log.to_string(),
        entries: Vec::new(),
        error: None,
    };
    if let Err(e) = fill_window(set, node, log, center, limit, &mut dump.entries).await {
        warn!("Could not dump {} around {} on {}: {}", log, center, dump.host, e);
        dump.error = Some(e.to_string());
    }
    dump
}

/// The newest `limit` entries of `log` on `node`, oldest first.
pub async fn dump_latest<C: AdminClient>(set: &ReplSet<C>, node: NodeId, log: &LogName, limit: usize) -> LogDump {
    let mut dump = LogDump {
        host: set.host(node),
        subject: log.to_string(),
        entries: Vec::new(),
        error: None,
    };
    let query = LogQuery::reverse(log.clone()).with_limit(limit);
    let read = async {
        let mut cursor = set
            .client(node)?
            .read_log(&query)
            .await
            .rpc_context(|| format!("dumping {log} on {}", dump.host))?;
        let mut entries = Vec::new();
        while let Some(entry) = cursor
            .next_entry()
            .await
            .rpc_context(|| format!("dumping {log} on {}", dump.host))?
        {
            entries.push(render(&entry));
        }
        entries.reverse();
        ReplSetResult::Ok(entries)
    };
    match read.await {
        Ok(entries) => dump.entries = entries,
        Err(e) => {
            warn!("Could not dump {} on {}: {}", log, dump.host, e);
            dump.error = Some(e.to_string());
        }
    }
    dump
}

async fn fill_window<C: AdminClient>(
    set: &ReplSet<C>,
    node: NodeId,
    log: &LogName,
    center: Timestamp,
    limit: usize,
    entries: &mut Vec<String>,
) -> ReplSetResult<()> {
    let client = set.client(node)?;
    let host = set.host(node);

    let before = LogQuery {
        log: log.clone(),
        filter: LogFilter {
            ts_gte: None,
            ts_lte: Some(center),
        },
        direction: SortDirection::Reverse,
        limit: Some(limit / 2 + 1),
        no_timeout: true,
    };
    let mut cursor = client
        .read_log(&before)
        .await
        .rpc_context(|| format!("dumping {log} on {host}"))?;
    let mut preceding = Vec::new();
    while let Some(entry) = cursor
        .next_entry()
        .await
        .rpc_context(|| format!("dumping {log} on {host}"))?
    {
        if entry.ts < center && preceding.len() < limit / 2 {
            preceding.push(render(&entry));
        }
    }
    preceding.reverse();
    entries.extend(preceding);

    let after = LogQuery {
        log: log.clone(),
        filter: LogFilter {
            ts_gte: Some(center),
            ts_lte: None,
        },
        direction: SortDirection::Forward,
        limit: Some(limit.saturating_sub(entries.len())),
        no_timeout: true,
    };
    let mut cursor = client
        .read_log(&after)
        .await
        .rpc_context(|| format!("dumping {log} on {host}"))?;
    while let Some(entry) = cursor
        .next_entry()
        .await
        .rpc_context(|| format!("dumping {log} on {host}"))?
    {
        entries.push(render(&entry));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_trips_past_threshold() {
        let mut budget = MemoryBudget::new(100);
        assert!(!budget.charge(60));
        assert!(!budget.charge(40));
        assert!(budget.charge(1));
        // starts over after tripping
        assert!(!budget.charge(100));
    }
}
