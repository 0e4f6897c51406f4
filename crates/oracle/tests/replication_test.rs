//! Replication waits against an in-memory set

use std::io::Write as _;
use std::time::Duration;

mod common;
use common::TestSet;
use replset_admin::OpTime;
use replset_admin_mock::MockReplicaSet;
use replset_oracle::{NodeId, NodeOptions, OpTimeKind, ReplSet, ReplSetSpec, ReplicationWait};

#[tokio::test]
async fn test_initiate_write_replicate_compare() {
    let test = TestSet::initiated(3).await;
    let primary = test
        .set
        .await_nodes_agree_on_primary(Duration::from_secs(2), None, None)
        .await
        .unwrap();
    assert_eq!(primary, NodeId::new(0));

    let last = test.write_docs(10);
    test.set.await_replication(ReplicationWait::default()).await.unwrap();

    for id in 0..3 {
        let applied = test.set.last_optime(NodeId::new(id), OpTimeKind::Applied).await.unwrap();
        assert_eq!(applied, last);
    }
    assert_eq!(test.set.await_last_op_committed(None, None).await.unwrap(), last);
    assert_eq!(
        test.set.await_nodes_agree_on_applied_optime(None, None).await.unwrap(),
        last
    );

    let report = test.set.check_oplogs().await.unwrap();
    // initiate and two reconfigurations each write one entry
    assert_eq!(report.entries_compared, 2 * 13);
    assert_eq!(report.nodes.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_secondary_times_out() {
    let test = TestSet::initiated(3).await;
    test.mock.set_replicating(2, false).unwrap();
    test.write_docs(3);

    let err = test
        .set
        .await_replication(ReplicationWait {
            timeout: Some(Duration::from_secs(1)),
            ..ReplicationWait::default()
        })
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let state = err.timeout_state().unwrap();
    let last_state = state.last_state.as_deref().unwrap();
    assert!(last_state.contains(&test.host(2)));
    assert!(last_state.contains("stuck"));
}

async fn reconfigure_during_wait(kind: OpTimeKind) {
    let test = TestSet::initiated(3).await;
    test.mock.set_replicating(2, false).unwrap();
    test.write_docs(3);

    let wait = test.set.await_replication(ReplicationWait {
        target: Some(NodeId::new(0)),
        timeout: Some(Duration::from_secs(2)),
        optime_kind: kind,
        ..ReplicationWait::default()
    });
    let reconfigure = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        test.mock.set_replicating(2, true).unwrap();
        let config = test.set.config_from_primary().await.unwrap();
        test.set.reconfig(&config).await.unwrap()
    };
    let (waited, version) = tokio::join!(wait, reconfigure);

    waited.unwrap();
    assert_eq!(version, 4);
    for id in 0..3 {
        assert_eq!(test.set.config_of(NodeId::new(id)).await.unwrap().version, 4);
    }
}

#[tokio::test(start_paused = true)]
async fn test_explicit_target_follows_reconfig() {
    reconfigure_during_wait(OpTimeKind::Applied).await;
}

#[tokio::test(start_paused = true)]
async fn test_durable_wait_follows_reconfig() {
    reconfigure_during_wait(OpTimeKind::Durable).await;
}

#[tokio::test]
async fn test_only_listed_secondaries_are_awaited() {
    let test = TestSet::initiated(3).await;
    test.mock.set_replicating(2, false).unwrap();
    test.write_docs(3);

    test.set
        .await_replication(ReplicationWait {
            secondaries: Some(vec![NodeId::new(1)]),
            ..ReplicationWait::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_arbiters_are_skipped() {
    let test = TestSet::with_node_options(vec![
        NodeOptions::default(),
        NodeOptions::default(),
        NodeOptions::arbiter(),
    ]);
    test.set.initiate().await.unwrap();
    test.write_docs(5);

    test.set
        .await_replication(ReplicationWait {
            optime_kind: OpTimeKind::Durable,
            ..ReplicationWait::default()
        })
        .await
        .unwrap();
    assert_eq!(test.set.arbiters().await.unwrap(), vec![NodeId::new(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_set_built_from_set_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"{
            "name": "rs-file",
            "nodes": [
                {"host": "a:27017"},
                {"host": "b:27017", "priority": 0.5},
                {"host": "c:27017", "arbiter": true}
            ]
        }"#,
    )
    .unwrap();

    let spec = ReplSetSpec::from_file(file.path()).unwrap();
    let hosts: Vec<String> = spec.nodes.iter().map(|n| n.host.clone()).collect();
    let mock = MockReplicaSet::with_hosts(hosts.clone());
    let set = ReplSet::from_spec(spec, |host| {
        let index = hosts.iter().position(|h| h == host).unwrap();
        mock.client(index)
    });

    assert_eq!(set.name(), "rs-file");
    set.initiate().await.unwrap();
    let last = mock
        .write(replset_admin_mock::Write::insert("test", "docs", "{}"))
        .unwrap();
    set.await_replication(ReplicationWait::default()).await.unwrap();

    assert_eq!(set.last_optime(NodeId::new(1), OpTimeKind::Applied).await.unwrap(), last);
    assert_eq!(set.arbiters().await.unwrap(), vec![NodeId::new(2)]);
    assert_ne!(last, OpTime::EMPTY);
}
