//! Test set utilities for integration testing

#![allow(dead_code)]

use std::time::Duration;

use replset_admin::OpTime;
use replset_admin_mock::{MockNode, MockReplicaSet, Write};
use replset_oracle::{NodeId, NodeOptions, ReplSet, ReplSetOptions};
use tracing_subscriber::EnvFilter;

/// Options tuned for an in-memory set
pub fn fast_options() -> ReplSetOptions {
    ReplSetOptions {
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        reconfig_retry_interval: Duration::from_millis(10),
        secondary_poll_interval: Duration::from_millis(5),
        step_up_agreement_timeout: Duration::from_secs(2),
        step_up_command_timeout: Duration::from_secs(1),
        freeze_duration: Duration::from_secs(60 * 60),
        command_retry_attempts: 3,
        command_retry_interval: Duration::from_millis(10),
        dump_window: 10,
        ..ReplSetOptions::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A mock set together with the orchestrator driving it
pub struct TestSet {
    pub mock: MockReplicaSet,
    pub set: ReplSet<MockNode>,
}

impl TestSet {
    /// `size` plain members, not initiated
    pub fn new(size: usize) -> Self {
        Self::with_node_options(vec![NodeOptions::default(); size])
    }

    /// One member per entry of `options`, not initiated
    pub fn with_node_options(options: Vec<NodeOptions>) -> Self {
        init_tracing();
        let mock = MockReplicaSet::new(options.len());
        let mut set = ReplSet::new("rs0", fast_options());
        for (client, options) in mock.clients().into_iter().zip(options) {
            set.add_member(client, options);
        }
        Self { mock, set }
    }

    /// `size` plain members, initiated with member 0 as primary
    pub async fn initiated(size: usize) -> Self {
        let test = Self::new(size);
        let primary = test.set.initiate().await.expect("initiate");
        assert_eq!(primary, NodeId::new(0));
        test
    }

    /// Inserts `count` documents into `test.docs`
    pub fn write_docs(&self, count: usize) -> OpTime {
        let mut last = OpTime::EMPTY;
        for i in 0..count {
            last = self
                .mock
                .write(Write::insert("test", "docs", format!("{{\"_id\":{i}}}")))
                .expect("write");
        }
        last
    }

    /// Hosts in member order
    pub fn host(&self, index: usize) -> String {
        self.mock.hosts().remove(index)
    }
}
