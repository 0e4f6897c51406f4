//! Replica set configuration

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ReplSetResult};

/// Election timeout injected into bootstrap configs, one day in milliseconds.
pub const FOREVER_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Timing and sizing knobs for orchestration and verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplSetOptions {
    /// Default deadline for every wait
    pub timeout: Duration,

    /// Spacing between attempts of most waits
    pub poll_interval: Duration,

    /// Spacing between reconfiguration attempts
    pub reconfig_retry_interval: Duration,

    /// Spacing between checks while secondaries come up
    pub secondary_poll_interval: Duration,

    /// Window for all members to agree on a freshly stepped up primary
    pub step_up_agreement_timeout: Duration,

    /// Deadline handed to the step-up command itself
    pub step_up_command_timeout: Duration,

    /// How long members stay frozen during consistency checks
    pub freeze_duration: Duration,

    /// Attempts for one-shot commands such as initiate
    pub command_retry_attempts: u32,

    /// Spacing between one-shot command attempts
    pub command_retry_interval: Duration,

    /// Bytes read by a comparison before buffered entries are released
    pub gc_threshold_bytes: usize,

    /// Entries included in each diagnostic log dump
    pub dump_window: usize,

    /// Keep the server default election timeout instead of a very high one
    pub use_default_election_timeout: bool,
}

impl Default for ReplSetOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_millis(200),
            reconfig_retry_interval: Duration::from_secs(1),
            secondary_poll_interval: Duration::from_millis(25),
            step_up_agreement_timeout: Duration::from_secs(60),
            step_up_command_timeout: Duration::from_secs(60),
            freeze_duration: Duration::from_secs(24 * 60 * 60),
            command_retry_attempts: 3,
            command_retry_interval: Duration::from_secs(5),
            gc_threshold_bytes: 10 * 1024 * 1024,
            dump_window: 100,
            use_default_election_timeout: false,
        }
    }
}

/// Binary version a member is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinVersion {
    /// Current release
    Latest,
    /// Last long-term-support release
    LastLts,
    /// Last continuous release
    LastContinuous,
}

/// Per-member overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Start as an arbiter
    pub arbiter: bool,

    /// Election priority override
    pub priority: Option<f64>,

    /// Vote count override
    pub votes: Option<u8>,

    /// Hide from clients
    pub hidden: bool,

    /// Build secondary indexes override
    pub build_indexes: Option<bool>,

    /// Binary version the member runs
    pub bin_version: Option<BinVersion>,
}

impl NodeOptions {
    /// Options for an arbiter
    #[must_use]
    pub fn arbiter() -> Self {
        Self {
            arbiter: true,
            ..Self::default()
        }
    }

    /// Options with a priority override
    #[must_use]
    pub fn with_priority(priority: f64) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }
}

/// One member of a set file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// `host:port` of the member
    pub host: String,

    /// Per-member overrides
    #[serde(default, flatten)]
    pub options: NodeOptions,
}

/// A set file: name, options and members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplSetSpec {
    /// Replica set name
    pub name: String,

    /// Timing and sizing knobs
    #[serde(default)]
    pub options: ReplSetOptions,

    /// Members in config order
    pub nodes: Vec<NodeSpec>,
}

impl ReplSetSpec {
    /// Load a set file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The set file cannot be read
    /// - The set file contains invalid JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> ReplSetResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| Error::configuration(format!("Failed to open set file: {e}")))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::configuration(format!("Failed to read set file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse set file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = ReplSetOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(600));
        assert_eq!(options.gc_threshold_bytes, 10_485_760);
        assert_eq!(options.command_retry_attempts, 3);
    }

    #[test]
    fn test_set_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "rs0",
                "nodes": [
                    {{ "host": "a:27017" }},
                    {{ "host": "b:27017", "priority": 0.0 }},
                    {{ "host": "c:27017", "arbiter": true, "bin_version": "last-lts" }}
                ]
            }}"#
        )
        .unwrap();

        let spec = ReplSetSpec::from_file(file.path()).unwrap();
        assert_eq!(spec.name, "rs0");
        assert_eq!(spec.nodes.len(), 3);
        assert_eq!(spec.nodes[1].options.priority, Some(0.0));
        assert!(spec.nodes[2].options.arbiter);
        assert_eq!(spec.nodes[2].options.bin_version, Some(BinVersion::LastLts));
        assert_eq!(spec.options.dump_window, 100);
    }

    #[test]
    fn test_missing_set_file() {
        let err = ReplSetSpec::from_file("/nonexistent/set.json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
