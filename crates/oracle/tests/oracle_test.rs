//! Consistency checks against an in-memory set

use std::time::Duration;

mod common;
use common::TestSet;
use replset_admin_mock::Write;
use replset_oracle::{ConsistencyCheck, DataHashCheck, ErrorKind, NodeId, NodeOptions};

const NAMESPACE: &str = "test.docs";

fn write_with_pre_images(test: &TestSet, count: usize) {
    for i in 0..count {
        test.mock
            .write(
                Write::insert("test", "docs", format!("{{\"_id\":{i},\"v\":1}}"))
                    .with_pre_image(NAMESPACE, format!("{{\"_id\":{i},\"v\":0}}")),
            )
            .unwrap();
    }
}

fn write_with_change_log(test: &TestSet, count: usize) {
    for i in 0..count {
        test.mock
            .write(
                Write::insert("acme_config", "settings", format!("{{\"_id\":{i}}}"))
                    .with_change_log("acme_config"),
            )
            .unwrap();
    }
}

#[tokio::test]
async fn test_matching_oplogs_pass() {
    let test = TestSet::initiated(3).await;
    test.write_docs(20);

    let report = test.set.check_oplogs().await.unwrap();
    assert!(report.passed());
    assert!(report.entries_compared > 0);
    assert_eq!(report.entries_compared % 2, 0);

    // members are released afterwards
    assert!(!test.mock.is_frozen(1));
    assert_eq!(test.mock.fsync_lock_count(0), 0);
}

#[tokio::test]
async fn test_checks_run_on_spawned_tasks() {
    let test = TestSet::initiated(3).await;
    test.write_docs(5);

    let handle = tokio::spawn(async move {
        let oplogs = test.set.check_oplogs().await?;
        let pre_images = test.set.check_pre_images().await?;
        let changes = test.set.check_change_collections().await?;
        replset_oracle::ReplSetResult::Ok((oplogs, pre_images, changes))
    });
    let (oplogs, pre_images, changes) = handle.await.unwrap().unwrap();

    assert!(oplogs.passed());
    assert!(pre_images.passed());
    assert!(changes.passed());
}

#[tokio::test]
async fn test_diverging_oplog_entry_is_reported() {
    let test = TestSet::initiated(3).await;
    test.write_docs(5);
    test.set
        .await_replication(replset_oracle::ReplicationWait::default())
        .await
        .unwrap();
    test.mock.corrupt_latest_oplog_entry(1).unwrap();

    let err = test.set.check_oplogs().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    let report = err.report().unwrap();
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.subject, "local.oplog.rs");
    assert_eq!(mismatch.reference.node, NodeId::new(0));
    assert_eq!(mismatch.other.node, NodeId::new(1));
    assert_ne!(mismatch.reference.entry, mismatch.other.entry);
    assert_eq!(mismatch.dumps.len(), 3);
    assert!(mismatch.dumps.iter().all(|d| d.error.is_none() && !d.entries.is_empty()));

    // released even though the check failed
    assert!(!test.mock.is_frozen(1));
    assert_eq!(test.mock.fsync_lock_count(0), 0);
}

#[tokio::test]
async fn test_truncated_reference_ends_comparison() {
    let test = TestSet::initiated(3).await;
    test.write_docs(5);
    test.mock.lose_capped_position_after(0, Some(2)).unwrap();

    let report = test.set.check_oplogs().await.unwrap();
    // two entries from the reference, each compared on both secondaries
    assert_eq!(report.entries_compared, 4);
}

#[tokio::test]
async fn test_shorter_capped_log_is_not_a_mismatch() {
    let test = TestSet::initiated(3).await;
    test.write_docs(10);
    test.set
        .await_replication(replset_oracle::ReplicationWait::default())
        .await
        .unwrap();
    test.mock.set_log_capacity(1, 3).unwrap();

    let report = test.set.check_oplogs().await.unwrap();
    assert!(report.passed());
}

#[tokio::test]
async fn test_data_hashes_are_stable() {
    let test = TestSet::initiated(3).await;
    test.write_docs(10);

    let first = test.set.check_replicated_data_hashes(&[]).await.unwrap();
    let second = test.set.check_replicated_data_hashes(&[]).await.unwrap();

    assert_eq!(first.digests, second.digests);
    let digests = &first.digests["test"];
    assert_eq!(digests.len(), 3);
    let mut values = digests.values();
    let reference = values.next().unwrap();
    assert!(values.all(|digest| digest == reference));
}

#[tokio::test]
async fn test_local_write_is_a_hash_mismatch() {
    let test = TestSet::initiated(3).await;
    test.write_docs(3);
    test.set
        .await_replication(replset_oracle::ReplicationWait::default())
        .await
        .unwrap();
    test.mock.insert_locally(2, "test", "docs", "{\"_id\":99}").unwrap();

    let err = test.set.check_replicated_data_hashes(&[]).await.unwrap_err();
    let report = err.report().unwrap();

    assert_eq!(report.entries_compared, 2);
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.subject, "test.docs");
    assert_eq!(mismatch.reference.node, NodeId::new(0));
    assert_eq!(mismatch.other.node, NodeId::new(2));
    // newest oplog entries of every member
    assert_eq!(mismatch.dumps.len(), 3);
}

#[tokio::test]
async fn test_excluded_database_is_not_hashed() {
    let test = TestSet::initiated(3).await;
    test.write_docs(3);
    test.set
        .await_replication(replset_oracle::ReplicationWait::default())
        .await
        .unwrap();
    test.mock.insert_locally(2, "scratch", "tmp", "{}").unwrap();

    let report = test.set.check_replicated_data_hashes(&["scratch"]).await.unwrap();
    assert!(!report.digests.contains_key("scratch"));
}

#[tokio::test]
async fn test_pre_images_match_and_diverge() {
    let test = TestSet::initiated(3).await;
    write_with_pre_images(&test, 4);

    let report = test.set.check_pre_images().await.unwrap();
    assert_eq!(report.entries_compared, 2 * 4);

    test.mock.corrupt_latest_pre_image(1, NAMESPACE).unwrap();
    let err = test.set.check_pre_images().await.unwrap_err();
    let mismatch = &err.report().unwrap().mismatches[0];
    assert_eq!(mismatch.subject, "config.system.preimages[test.docs]");
    assert_eq!(mismatch.other.node, NodeId::new(1));
}

#[tokio::test]
async fn test_change_collections_match_and_diverge() {
    let test = TestSet::initiated(3).await;
    write_with_change_log(&test, 3);

    let report = test.set.check_change_collections().await.unwrap();
    assert_eq!(report.entries_compared, 2 * 3);

    test.mock.corrupt_latest_change_entry(2, "acme_config").unwrap();
    let err = test.set.check_change_collections().await.unwrap_err();
    let mismatch = &err.report().unwrap().mismatches[0];
    assert_eq!(mismatch.subject, "acme_config.system.change_collection");
    assert_eq!(mismatch.other.node, NodeId::new(2));
}

#[tokio::test]
async fn test_arbiters_are_not_compared() {
    let test = TestSet::with_node_options(vec![
        NodeOptions::default(),
        NodeOptions::default(),
        NodeOptions::arbiter(),
    ]);
    test.set.initiate().await.unwrap();
    test.write_docs(5);

    let report = test.set.check_oplogs().await.unwrap();
    assert_eq!(report.nodes, vec![test.host(0), test.host(1)]);

    let report = test.set.check_replicated_data_hashes(&[]).await.unwrap();
    assert_eq!(report.digests["test"].len(), 2);
}

#[tokio::test]
async fn test_primary_is_never_a_secondary() {
    let test = TestSet::initiated(3).await;
    test.write_docs(3);

    let report = test
        .set
        .check_replica_set(
            &replset_oracle::OplogCheck,
            Some(vec![NodeId::new(0), NodeId::new(1)]),
        )
        .await
        .unwrap();
    assert_eq!(report.nodes, vec![test.host(0), test.host(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_hash_check_waits_for_secondaries() {
    let test = TestSet::initiated(3).await;
    test.mock.set_up(2, false).unwrap();
    test.write_docs(3);

    let check = DataHashCheck::default();
    let targets = [NodeId::new(1), NodeId::new(2)];
    let run = check.run(&test.set, NodeId::new(0), &targets);
    let recover = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        test.mock.set_up(2, true).unwrap();
    };
    let (report, ()) = tokio::join!(run, recover);

    let report = report.unwrap();
    assert!(report.passed());
    assert_eq!(report.digests["test"].len(), 3);
}

#[tokio::test]
async fn test_tenant_databases_are_hashed_apart() {
    let test = TestSet::initiated(3).await;
    for tenant in ["acme", "zeta"] {
        test.mock
            .write(Write::insert(format!("{tenant}_config"), "settings", "{\"_id\":1}"))
            .unwrap();
    }

    let report = test.set.check_replicated_data_hashes(&[]).await.unwrap();
    assert_eq!(report.digests["acme_config"].len(), 3);
    assert_eq!(report.digests["zeta_config"].len(), 3);
    assert_eq!(report.entries_compared, 4);
}
