//! Administrative RPC surface of a replicated cluster member.
//!
//! This crate provides:
//! - The `AdminClient` trait every member connection implements
//! - Wire types for status, configuration, op times and log entries
//! - A closed set of server error codes and the `AdminError` type

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod log;
pub mod optime;
pub mod status;

pub use client::{AdminClient, LogCursor};
pub use command::CommandKind;
pub use config::{ClusterConfig, ConfigSettings, MemberConfig};
pub use error::{AdminError, ErrorCode};
pub use log::{LogEntry, LogFilter, LogName, LogQuery, SortDirection};
pub use optime::{OpTime, Timestamp};
pub use status::{
    ContentHash, DatabaseInfo, HashOptions, HelloReply, MemberState, MemberStatus, OpTimes,
    StatusReply, ValidateReply,
};
