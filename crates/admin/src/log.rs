//! Replicated logs and queries over them.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::optime::Timestamp;

/// A replicated, append-only, possibly capped log.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum LogName {
    /// The operation log.
    Oplog,
    /// Pre-update images of one namespace.
    PreImages {
        /// Collection UUID the images belong to.
        namespace: String,
    },
    /// The change collection of one tenant config database.
    ChangeCollection {
        /// Tenant config database.
        database: String,
    },
}

impl fmt::Display for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oplog => f.write_str("local.oplog.rs"),
            Self::PreImages { namespace } => {
                write!(f, "config.system.preimages[{namespace}]")
            }
            Self::ChangeCollection { database } => {
                write!(f, "{database}.system.change_collection")
            }
        }
    }
}

/// Iteration order of a log query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Oldest first.
    Forward,
    /// Newest first.
    Reverse,
}

/// Timestamp bounds of a log query.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Inclusive lower bound.
    pub ts_gte: Option<Timestamp>,
    /// Inclusive upper bound.
    pub ts_lte: Option<Timestamp>,
}

impl LogFilter {
    /// Whether `ts` satisfies both bounds.
    #[must_use]
    pub fn matches(&self, ts: Timestamp) -> bool {
        self.ts_gte.is_none_or(|lower| ts >= lower) && self.ts_lte.is_none_or(|upper| ts <= upper)
    }
}

/// A query over one replicated log.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Log to read.
    pub log: LogName,
    /// Timestamp bounds.
    pub filter: LogFilter,
    /// Iteration order.
    pub direction: SortDirection,
    /// Maximum entries returned.
    pub limit: Option<usize>,
    /// Keep the cursor alive while idle.
    pub no_timeout: bool,
}

impl LogQuery {
    /// Newest-first scan of the whole log.
    #[must_use]
    pub const fn reverse(log: LogName) -> Self {
        Self {
            log,
            filter: LogFilter {
                ts_gte: None,
                ts_lte: None,
            },
            direction: SortDirection::Reverse,
            limit: None,
            no_timeout: true,
        }
    }

    /// The single oldest retained entry.
    #[must_use]
    pub const fn oldest(log: LogName) -> Self {
        Self {
            log,
            filter: LogFilter {
                ts_gte: None,
                ts_lte: None,
            },
            direction: SortDirection::Forward,
            limit: Some(1),
            no_timeout: false,
        }
    }

    /// Restricts the query with a filter.
    #[must_use]
    pub const fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Caps the number of entries returned.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One raw log entry.
///
/// Entries are compared byte-for-byte; `ts` is carried alongside for ordering
/// and bounded queries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp of the entry.
    pub ts: Timestamp,
    /// Encoded document.
    pub raw: Bytes,
}

impl LogEntry {
    /// Creates an entry.
    pub fn new(ts: Timestamp, raw: impl Into<Bytes>) -> Self {
        Self {
            ts,
            raw: raw.into(),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let filter = LogFilter {
            ts_gte: Some(Timestamp::new(10, 0)),
            ts_lte: Some(Timestamp::new(20, 0)),
        };
        assert!(filter.matches(Timestamp::new(10, 0)));
        assert!(filter.matches(Timestamp::new(20, 0)));
        assert!(!filter.matches(Timestamp::new(20, 1)));
        assert!(!filter.matches(Timestamp::new(9, 5)));
        assert!(LogFilter::default().matches(Timestamp::ZERO));
    }

    #[test]
    fn test_log_names() {
        assert_eq!(LogName::Oplog.to_string(), "local.oplog.rs");
        assert_eq!(
            LogName::ChangeCollection {
                database: "tenant_config".to_string()
            }
            .to_string(),
            "tenant_config.system.change_collection"
        );
    }
}
