use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tcmirror_service::caching::CacheError;
use tcmirror_sources::{
    BuildState, RemoteError, RemoteSnapshot, Status, TestOccurrence, TestOccurrenceFull,
};
use tcmirror_test::CountingRemote;

use crate::{SUITE, reopen_mirror, setup_mirror};

const TEST_HREF: &str = "/app/rest/latest/testOccurrences/id:3,build:(id:42)";

fn snapshot_with_test_details() -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot::default();
    snapshot.test_occurrences_full.insert(
        TEST_HREF.into(),
        TestOccurrenceFull {
            occurrence: TestOccurrence {
                id: "build:(id:42),id:3".into(),
                name: "org.apache.ignite.CacheTest.testPut".into(),
                status: Status::Failure,
                duration_ms: Some(1500),
                ..Default::default()
            },
            details: Some("java.lang.AssertionError: expected 1".into()),
            test_id: Some("-4471527474371931744".into()),
        },
    );
    snapshot
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_loads_call_remote_once() {
    let remote = Arc::new(
        CountingRemote::new(snapshot_with_test_details()).with_latency(Duration::from_millis(100)),
    );
    let test = reopen_mirror(
        Arc::new(tcmirror_service::caching::MemoryStore::new()),
        remote,
        |_| {},
    );

    let loads: Vec<_> = (0..32).map(|_| test.mirror.get_test_full(TEST_HREF)).collect();
    let results = join_all(loads).await;

    let expected = results[0].clone().unwrap();
    assert_eq!(
        expected.details.as_deref(),
        Some("java.lang.AssertionError: expected 1")
    );
    for result in results {
        assert_eq!(result.unwrap(), expected);
    }
    assert_eq!(test.remote.all_hits(), [("get_test_occurrence_full", 1)]);

    // later loads are served from the store
    let stored = test.mirror.get_test_full(TEST_HREF).await.unwrap();
    assert_eq!(stored, expected);
    assert_eq!(test.remote.accesses(), 0);
}

#[tokio::test]
async fn test_dropped_handles_do_not_cancel_the_load() {
    let remote = Arc::new(
        CountingRemote::new(snapshot_with_test_details()).with_latency(Duration::from_millis(50)),
    );
    let test = reopen_mirror(
        Arc::new(tcmirror_service::caching::MemoryStore::new()),
        remote,
        |_| {},
    );

    drop(test.mirror.get_test_full(TEST_HREF));
    let details = test.mirror.get_test_full(TEST_HREF).await.unwrap();
    assert_eq!(details.occurrence.duration_ms, Some(1500));
    assert_eq!(test.remote.accesses(), 1);
}

#[tokio::test]
async fn test_failed_loads_are_shared_and_retried() {
    let test = setup_mirror(snapshot_with_test_details(), |_| {});
    test.remote.fail(
        "get_test_occurrence_full",
        RemoteError::Transport("503 Service Unavailable".into()),
    );

    let (first, second) = futures::join!(
        test.mirror.get_test_full(TEST_HREF),
        test.mirror.get_test_full(TEST_HREF)
    );
    let expected = CacheError::Transport("503 Service Unavailable".into());
    assert_eq!(first.unwrap_err(), expected);
    assert_eq!(second.unwrap_err(), expected);
    assert_eq!(test.remote.accesses(), 1);

    test.remote.clear_failures();
    assert!(test.mirror.get_test_full(TEST_HREF).await.is_ok());
    assert_eq!(test.remote.accesses(), 1);
}

#[tokio::test]
async fn test_log_check_is_stored() {
    let mut snapshot = RemoteSnapshot {
        builds: vec![tcmirror_test::build(
            42,
            SUITE,
            BuildState::Finished,
            Status::Failure,
        )],
        ..Default::default()
    };
    snapshot.logs.insert(
        42,
        "[WARN ] lock held too long\n\
         Full thread dump OpenJDK 64-Bit Server VM:\n\
         \"main\" #1 prio=5 WAITING\n\
         \n\
         Build finished\n"
            .into(),
    );
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    assert_eq!(mirror.thread_dump_cached(42), None);

    let (first, second) = futures::join!(mirror.analyze_build_log(42), mirror.analyze_build_log(42));
    let result = first.unwrap();
    assert_eq!(second.unwrap(), result);
    assert_eq!(result.warns, ["[WARN ] lock held too long"]);
    assert_eq!(test.remote.all_hits(), [("analyze_build_log", 1)]);

    let dump = mirror.thread_dump_cached(42).unwrap();
    assert!(dump.starts_with("Full thread dump"));
    assert!(dump.contains("\"main\" #1"));

    mirror.analyze_build_log(42).await.unwrap();
    assert_eq!(test.remote.accesses(), 0);
}
