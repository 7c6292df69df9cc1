use std::sync::Arc;

use tcmirror_sources::{
    BUILD_VERSION, BuildState, RemoteSnapshot, Status, TestOccurrence, build_href,
};
use tcmirror_test::{build, test_occurrences, tests_href};

use crate::{SUITE, setup_mirror};

const BUILDS: u64 = 40;

fn snapshot_with_tests() -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot::default();
    for id in 1..=BUILDS {
        let status = if id % 4 == 0 {
            Status::Failure
        } else {
            Status::Success
        };
        snapshot
            .builds
            .push(build(id, SUITE, BuildState::Finished, status));
        snapshot.test_occurrences.insert(
            tests_href(id),
            test_occurrences(
                id,
                &[
                    ("org.apache.ignite.CacheTest.testPut", status),
                    ("org.apache.ignite.CacheTest.testGet", Status::Success),
                ],
            ),
        );
    }
    snapshot
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_count_every_run_once() {
    let test = setup_mirror(snapshot_with_tests(), |_| {});

    let tasks: Vec<_> = (1..=BUILDS)
        .map(|id| {
            let mirror = Arc::clone(&test.mirror);
            tokio::spawn(async move {
                let build = mirror.get_build_by_id(id).await.unwrap();
                let href = build.test_occurrences_href.unwrap();
                mirror.get_tests(&href).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = test.mirror.stats();
    let put = stats.lookup_test("org.apache.ignite.CacheTest.testPut").unwrap();
    assert_eq!(put.runs, BUILDS);
    assert_eq!(put.failures, BUILDS / 4);
    assert_eq!(put.latest.len(), BUILDS as usize);

    let get = stats.lookup_test("org.apache.ignite.CacheTest.testGet").unwrap();
    assert_eq!(get.runs, BUILDS);
    assert_eq!(get.failures, 0);
    assert_eq!(get.average_duration_ms(), 200.0);

    let suite = stats.lookup_suite(SUITE).unwrap();
    assert_eq!(suite.runs, BUILDS);
    assert_eq!(suite.failures, BUILDS / 4);

    let top = stats.top_by_failure_rate(1);
    assert_eq!(top[0].name, "org.apache.ignite.CacheTest.testPut");
    let top = stats.top_by_average_duration(1);
    assert_eq!(top[0].name, "org.apache.ignite.CacheTest.testGet");

    // loading again only hits the store
    test.remote.accesses();
    for id in 1..=BUILDS {
        test.mirror.get_tests(&tests_href(id)).await.unwrap();
    }
    assert_eq!(test.remote.accesses(), 0);
    assert_eq!(
        stats
            .lookup_test("org.apache.ignite.CacheTest.testPut")
            .unwrap()
            .runs,
        BUILDS
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_are_exact() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});

    let tasks: Vec<_> = (0..8u64)
        .map(|task| {
            let mirror = Arc::clone(&test.mirror);
            tokio::spawn(async move {
                for run in 0..250u64 {
                    let occurrence = TestOccurrence {
                        id: format!("build:(id:{}),id:1", task * 1000 + run),
                        name: "org.apache.ignite.ServiceTest.testDeploy".into(),
                        status: if run % 10 == 0 {
                            Status::Failure
                        } else {
                            Status::Success
                        },
                        duration_ms: Some(10),
                        ..Default::default()
                    };
                    mirror
                        .stats()
                        .record_test_run(&occurrence.name, &occurrence);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stat = test
        .mirror
        .stats()
        .lookup_test("org.apache.ignite.ServiceTest.testDeploy")
        .unwrap();
    assert_eq!(stat.runs, 2000);
    assert_eq!(stat.failures, 200);
    assert_eq!(stat.total_duration_ms, 20_000);
}

#[tokio::test]
async fn test_disabled_stats_are_not_updated() {
    let test = setup_mirror(snapshot_with_tests(), |config| {
        config.stats.enabled = false;
    });
    assert!(!test.mirror.stat_update_enabled());

    test.mirror.get_build_by_id(1).await.unwrap();
    test.mirror.get_tests(&tests_href(1)).await.unwrap();
    assert!(test.mirror.stats().lookup_suite(SUITE).is_none());

    test.mirror.set_stat_update_enabled(true);
    test.mirror.get_tests(&tests_href(2)).await.unwrap();
    assert_eq!(
        test.mirror
            .stats()
            .lookup_test("org.apache.ignite.CacheTest.testGet")
            .unwrap()
            .runs,
        1
    );
}

#[tokio::test]
async fn test_muted_runs_are_skipped() {
    let mut snapshot = RemoteSnapshot::default();
    let mut tests = test_occurrences(
        5,
        &[
            ("org.apache.ignite.FlakyTest.testMuted", Status::Failure),
            ("org.apache.ignite.FlakyTest.testIgnored", Status::Unknown),
        ],
    );
    tests.occurrences[0].muted = true;
    tests.occurrences[1].ignored = true;
    snapshot.test_occurrences.insert(tests_href(5), tests);

    let test = setup_mirror(snapshot, |_| {});
    test.mirror.get_tests(&tests_href(5)).await.unwrap();

    let stats = test.mirror.stats();
    assert!(stats.lookup_test("org.apache.ignite.FlakyTest.testMuted").is_none());
    assert!(stats.lookup_test("org.apache.ignite.FlakyTest.testIgnored").is_none());
}

#[tokio::test]
async fn test_reloaded_build_is_counted_once() {
    let test = setup_mirror(snapshot_with_tests(), |_| {});
    let mirror = &test.mirror;
    let href = build_href(4);

    mirror.get_build(&href).await.unwrap();
    let suite = mirror.stats().lookup_suite(SUITE).unwrap();
    assert_eq!(suite.runs, 1);
    assert_eq!(suite.failures, 1);

    // a schema upgrade makes the stored build outdated
    let mut outdated = mirror.tables().builds.get(&href).unwrap();
    outdated.version = BUILD_VERSION - 1;
    mirror.tables().builds.put(&href, &outdated);

    let build = mirror.get_build(&href).await.unwrap();
    assert_eq!(build.version, BUILD_VERSION);
    assert_eq!(test.remote.hits("get_build"), 2);

    let suite = mirror.stats().lookup_suite(SUITE).unwrap();
    assert_eq!(suite.runs, 1);
    assert_eq!(suite.failures, 1);
    assert_eq!(suite.latest.len(), 1);
}

#[tokio::test]
async fn test_recording_a_build_twice_counts_once() {
    let test = setup_mirror(snapshot_with_tests(), |_| {});
    let stats = test.mirror.stats();
    let finished = build(8, SUITE, BuildState::Finished, Status::Failure);

    assert!(stats.record_build_run(SUITE, &finished));
    assert!(!stats.record_build_run(SUITE, &finished));

    let tests = test_occurrences(8, &[("org.apache.ignite.CacheTest.testPut", Status::Failure)]);
    assert_eq!(stats.record_test_runs(&tests), 1);
    assert_eq!(stats.record_test_runs(&tests), 0);

    assert_eq!(stats.lookup_suite(SUITE).unwrap().runs, 1);
    let put = stats.lookup_test("org.apache.ignite.CacheTest.testPut").unwrap();
    assert_eq!(put.runs, 1);
    assert_eq!(put.failures, 1);
}
