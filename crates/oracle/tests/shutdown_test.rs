//! Shutdown checks against an in-memory set

mod common;
use common::TestSet;
use replset_oracle::{ErrorKind, NodeId, ShutdownChecks};

#[tokio::test]
async fn test_healthy_set_passes_shutdown_checks() {
    let test = TestSet::initiated(3).await;
    test.write_docs(10);

    test.set.run_shutdown_checks(ShutdownChecks::default()).await.unwrap();
    assert!(!test.mock.is_frozen(1));
    assert_eq!(test.mock.fsync_lock_count(0), 0);
}

#[tokio::test]
async fn test_validation_failures_are_collected() {
    let test = TestSet::initiated(3).await;
    test.mock
        .set_validation_errors(1, vec!["corrupt record in test.docs".to_string()])
        .unwrap();
    test.mock
        .set_validation_errors(2, vec!["missing index key".to_string()])
        .unwrap();

    let err = test
        .set
        .run_shutdown_checks(ShutdownChecks::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let message = err.to_string();
    assert!(message.contains(&test.host(1)));
    assert!(message.contains("corrupt record in test.docs"));
    assert!(message.contains(&test.host(2)));
}

#[tokio::test]
async fn test_skipped_validation() {
    let test = TestSet::initiated(3).await;
    test.mock.set_validation_errors(1, vec!["bad".to_string()]).unwrap();

    let checks = ShutdownChecks {
        skip_validation: true,
        ..ShutdownChecks::default()
    };
    test.set.run_shutdown_checks(checks).await.unwrap();
}

#[tokio::test]
async fn test_skipped_consistency() {
    let test = TestSet::initiated(3).await;
    test.write_docs(3);
    test.set
        .await_replication(replset_oracle::ReplicationWait::default())
        .await
        .unwrap();
    test.mock.insert_locally(1, "test", "docs", "{\"_id\":42}").unwrap();

    let err = test
        .set
        .run_shutdown_checks(ShutdownChecks::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    let checks = ShutdownChecks {
        skip_consistency: true,
        ..ShutdownChecks::default()
    };
    test.set.run_shutdown_checks(checks).await.unwrap();
}

#[tokio::test]
async fn test_uninitiated_set_is_skipped() {
    let test = TestSet::new(3);
    test.mock.set_validation_errors(0, vec!["bad".to_string()]).unwrap();

    test.set.run_shutdown_checks(ShutdownChecks::default()).await.unwrap();
}

#[tokio::test]
async fn test_single_live_member_is_skipped() {
    let test = TestSet::initiated(3).await;
    test.mock.set_up(1, false).unwrap();
    test.mock.set_up(2, false).unwrap();
    test.mock.set_validation_errors(0, vec!["bad".to_string()]).unwrap();

    test.set.run_shutdown_checks(ShutdownChecks::default()).await.unwrap();
}

#[tokio::test]
async fn test_validate_nodes_directly() {
    let test = TestSet::initiated(2).await;
    test.set
        .validate_nodes(&[NodeId::new(0), NodeId::new(1)])
        .await
        .unwrap();

    test.mock.set_up(1, false).unwrap();
    let err = test
        .set
        .validate_nodes(&[NodeId::new(0), NodeId::new(1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
