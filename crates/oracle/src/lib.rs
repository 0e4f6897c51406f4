//! Orchestration and consistency checking for replica sets.
//!
//! This crate provides:
//! - A wait engine for polling until a condition holds or a deadline passes
//! - Primary discovery, config convergence and replication waits
//! - Bootstrap, growth, reconfiguration, step-up and freeze choreography
//! - A consistency oracle comparing oplogs, content hashes, preimages and
//!   change collections across members
//! - Shutdown checks with concurrent member validation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
mod convergence;
mod discovery;
pub mod error;
mod lifecycle;
pub mod oracle;
mod replication;
mod replset;
mod shutdown;
mod topology;
pub mod wait;

pub use config::{BinVersion, FOREVER_MILLIS, NodeOptions, NodeSpec, ReplSetOptions, ReplSetSpec};
pub use discovery::ClusterView;
pub use error::{Error, ErrorContext, ErrorKind, ReplSetResult};
pub use lifecycle::{QuiescedSet, StepUpOptions};
pub use oracle::{
    ChangeCollectionCheck, ConsistencyCheck, ConsistencyReport, DataHashCheck, LogDump, Mismatch,
    OplogCheck, PreImageCheck, Sighting,
};
pub use replication::{OpTimeKind, ProgressState, ProgressTracker, ReplicationWait};
pub use replset::{LifecycleState, ReplSet};
pub use shutdown::ShutdownChecks;
pub use topology::{Node, NodeId, Topology};
pub use wait::{Attempt, FatalTimeout, WaitOptions, Waiter, await_condition, retry};
