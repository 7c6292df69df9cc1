use std::sync::Arc;

use tcmirror_service::migrations;
use tcmirror_sources::{BuildState, RemoteSnapshot, Status};
use tcmirror_test::{build, test_occurrences, tests_href};

use crate::{SUITE, reopen_mirror, setup_mirror};

const TEST: &str = "org.apache.ignite.CacheTest.testPut";

fn snapshot() -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot::default();
    for id in 1..=3 {
        snapshot
            .builds
            .push(build(id, SUITE, BuildState::Finished, Status::Success));
        snapshot
            .test_occurrences
            .insert(tests_href(id), test_occurrences(id, &[(TEST, Status::Failure)]));
    }
    snapshot
}

#[tokio::test]
async fn test_migrations_are_applied_on_open() {
    let test = setup_mirror(snapshot(), |_| {});

    for name in migrations::pass_names() {
        let applied = test.mirror.tables().done_migrations.get(name).unwrap();
        assert_eq!(applied.name, name);
        assert_eq!(applied.processed, 0);
    }
}

#[tokio::test]
async fn test_reopening_does_not_double_count() {
    let test = setup_mirror(snapshot(), |_| {});
    for id in 1..=3 {
        test.mirror.get_build_by_id(id).await.unwrap();
        test.mirror.get_tests(&tests_href(id)).await.unwrap();
    }
    assert_eq!(test.mirror.stats().lookup_test(TEST).unwrap().runs, 3);

    let reopened = reopen_mirror(Arc::clone(&test.store), Arc::clone(&test.remote), |_| {});
    assert_eq!(reopened.mirror.stats().lookup_test(TEST).unwrap().runs, 3);
    assert_eq!(reopened.mirror.stats().lookup_suite(SUITE).unwrap().runs, 3);
}

#[tokio::test]
async fn test_reapplied_pass_rebuilds_from_stored_data() {
    let test = setup_mirror(snapshot(), |config| {
        config.stats.enabled = false;
    });
    for id in 1..=3 {
        test.mirror.get_build_by_id(id).await.unwrap();
        test.mirror.get_tests(&tests_href(id)).await.unwrap();
    }
    let tables = test.mirror.tables();
    let stats = test.mirror.stats();
    assert!(stats.lookup_test(TEST).is_none());

    assert_eq!(
        migrations::apply_pass(tables, stats, "recompute-test-run-stats"),
        Some(3)
    );
    assert_eq!(
        migrations::apply_pass(tables, stats, "recompute-suite-failure-stats"),
        Some(3)
    );
    // applying twice yields the same counts
    assert_eq!(
        migrations::apply_pass(tables, stats, "recompute-test-run-stats"),
        Some(3)
    );

    let stat = stats.lookup_test(TEST).unwrap();
    assert_eq!(stat.runs, 3);
    assert_eq!(stat.failures, 3);
    let ids: Vec<_> = stat.latest.iter().filter_map(|s| s.build_id).collect();
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(stats.lookup_suite(SUITE).unwrap().failures, 0);
}
