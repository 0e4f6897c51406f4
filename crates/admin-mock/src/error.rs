//! Error types for the mock replica set.

use thiserror::Error;

/// Error type for the mock replica set.
#[derive(Debug, Error)]
pub enum Error {
    /// No member currently accepts writes.
    #[error("no writable primary")]
    NoPrimary,

    /// The primary holds an fsync lock.
    #[error("writes are blocked by fsync lock on {0}")]
    WritesBlocked(String),

    /// Index outside the set.
    #[error("unknown member index {0}")]
    UnknownMember(usize),

    /// Error when loading or parsing the set file.
    #[error("Set file error: {0}")]
    SetFile(String),
}
