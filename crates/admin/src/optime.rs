//! Positions in the replicated operation log.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical clock value stamped on every log entry.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds component.
    pub secs: u32,
    /// Increment within the second.
    pub inc: u32,
}

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Self = Self { secs: 0, inc: 0 };

    /// Creates a timestamp.
    #[must_use]
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    /// Whether this is the zero timestamp.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.secs == 0 && self.inc == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// A (timestamp, term) pair identifying one point in the operation log.
///
/// Ordered by term first, then timestamp.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct OpTime {
    /// Timestamp of the entry.
    pub ts: Timestamp,
    /// Election term the entry was written in.
    #[serde(rename = "t")]
    pub term: i64,
}

impl OpTime {
    /// The sentinel carried by members that have not applied anything yet.
    pub const EMPTY: Self = Self {
        ts: Timestamp::ZERO,
        term: -1,
    };

    /// Creates an op time.
    #[must_use]
    pub const fn new(ts: Timestamp, term: i64) -> Self {
        Self { ts, term }
    }

    /// Whether this is the empty sentinel (or a zero timestamp, which no
    /// applied entry ever carries).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ts.is_zero()
    }
}

impl Default for OpTime {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .cmp(&other.term)
            .then_with(|| self.ts.cmp(&other.ts))
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_dominates_timestamp() {
        let older_term = OpTime::new(Timestamp::new(200, 1), 1);
        let newer_term = OpTime::new(Timestamp::new(100, 1), 2);
        assert!(older_term < newer_term);
    }

    #[test]
    fn test_empty_sorts_before_everything() {
        let first = OpTime::new(Timestamp::new(1, 1), 0);
        assert!(OpTime::EMPTY < first);
        assert!(OpTime::EMPTY.is_empty());
        assert!(!first.is_empty());
        assert_eq!(OpTime::default(), OpTime::EMPTY);
    }
}
