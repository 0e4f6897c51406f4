//! Reports produced by the consistency checks.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::compare::ComparisonOutcome;
use crate::topology::NodeId;

/// One member's side of a mismatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sighting {
    /// Member id
    pub node: NodeId,
    /// `host:port`
    pub host: String,
    /// What the member holds, `None` when it holds nothing
    pub entry: Option<String>,
}

/// Window of a log around a point of interest, captured for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogDump {
    /// Member the window was read from
    pub host: String,
    /// Log or database the window belongs to
    pub subject: String,
    /// Entries, oldest first
    pub entries: Vec<String>,
    /// Why the window could not be read completely
    pub error: Option<String>,
}

/// Two members disagreeing on the same position or collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Log, namespace or collection being compared
    pub subject: String,
    /// The side everything is compared against
    pub reference: Sighting,
    /// The side that differs
    pub other: Sighting,
    /// Surrounding entries from every member
    pub dumps: Vec<LogDump>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |s: &Sighting| s.entry.clone().unwrap_or_else(|| "<missing>".to_string());
        write!(
            f,
            "non-matching {} on {}: {} vs {}: {}",
            self.subject,
            self.reference.host,
            show(&self.reference),
            self.other.host,
            show(&self.other)
        )
    }
}

/// Outcome of one consistency check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Name of the check
    pub check: String,
    /// Hosts that took part
    pub nodes: Vec<String>,
    /// Entries or collections compared
    pub entries_compared: u64,
    /// Every disagreement found
    pub mismatches: Vec<Mismatch>,
    /// Per database, the digest each host reported
    pub digests: BTreeMap<String, BTreeMap<String, String>>,
    /// Times buffered entries were released to bound memory
    pub memory_releases: u32,
}

impl ConsistencyReport {
    /// Empty report for `check`
    pub fn new(check: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            check: check.into(),
            nodes,
            ..Self::default()
        }
    }

    /// Whether no mismatch was found
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub(crate) fn record(&mut self, outcome: ComparisonOutcome) {
        self.entries_compared += outcome.entries_compared;
        self.memory_releases += outcome.memory_releases;
        self.mismatches.extend(outcome.mismatch);
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} compared {} entries across {:?}",
            self.check, self.entries_compared, self.nodes
        )?;
        if self.passed() {
            return write!(f, ", all matching");
        }
        write!(f, ", {} mismatches", self.mismatches.len())?;
        for mismatch in &self.mismatches {
            write!(f, "\n  {mismatch}")?;
        }
        Ok(())
    }
}
