use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tcmirror_service::caching::{CacheError, MemoryStore};
use tcmirror_sources::{
    BUILD_VERSION, Build, BuildState, Change, RemoteError, RemoteSnapshot, Statistics, Status,
    build_href,
};
use tcmirror_test::{CountingRemote, build, tests_href};

use crate::{SUITE, reopen_mirror, setup_mirror};

#[tokio::test]
async fn test_unknown_build_is_stored_as_stub() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});

    for _ in 0..2 {
        let build = test.mirror.get_build_by_id(404).await.unwrap();
        assert!(build.fake_stub);
    }
    assert_eq!(test.remote.all_hits(), [("get_build", 1)]);
    assert!(test.mirror.actualizer().build_ref(404).is_none());
}

#[tokio::test]
async fn test_unfinished_build_is_not_stored() {
    let snapshot = RemoteSnapshot {
        builds: vec![build(7, SUITE, BuildState::Running, Status::Unknown)],
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    for _ in 0..2 {
        let build = mirror.get_build_by_id(7).await.unwrap();
        assert_eq!(build.build_ref.state, BuildState::Running);
    }
    assert_eq!(test.remote.accesses(), 2);

    test.remote.update(|snapshot| {
        *snapshot.build_mut(7).unwrap() = build(7, SUITE, BuildState::Finished, Status::Failure);
    });
    for _ in 0..2 {
        let build = mirror.get_build_by_id(7).await.unwrap();
        assert!(build.has_finish_date());
    }
    assert_eq!(test.remote.accesses(), 1);

    // loading the finished build advanced its reference and counted the run once
    let build_ref = mirror.actualizer().build_ref(7).unwrap();
    assert_eq!(build_ref.state, BuildState::Finished);
    let stat = mirror.stats().lookup_suite(SUITE).unwrap();
    assert_eq!(stat.runs, 1);
    assert_eq!(stat.failures, 1);
}

#[tokio::test]
async fn test_outdated_build_is_reloaded() {
    let snapshot = RemoteSnapshot {
        builds: vec![build(3, SUITE, BuildState::Finished, Status::Success)],
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    let href = build_href(3);
    let outdated = Build {
        version: BUILD_VERSION - 1,
        ..build(3, SUITE, BuildState::Finished, Status::Success)
    };
    mirror.tables().builds.put(&href, &outdated);

    let build = mirror.get_build(&href).await.unwrap();
    assert_eq!(build.version, BUILD_VERSION);
    assert_eq!(test.remote.accesses(), 1);

    let build = mirror.get_build(&href).await.unwrap();
    assert_eq!(build.version, BUILD_VERSION);
    assert_eq!(test.remote.accesses(), 0);
}

#[tokio::test]
async fn test_stub_does_not_replace_outdated_build() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});
    let mirror = &test.mirror;

    let href = build_href(3);
    let outdated = Build {
        version: BUILD_VERSION - 1,
        ..build(3, SUITE, BuildState::Finished, Status::Success)
    };
    mirror.tables().builds.put(&href, &outdated);

    // the build vanished from the remote server, the stored one is kept and stays outdated
    for _ in 0..2 {
        let build = mirror.get_build(&href).await.unwrap();
        assert_eq!(build, outdated);
    }
    assert_eq!(test.remote.accesses(), 2);
    assert_eq!(mirror.tables().builds.get(&href), Some(outdated));
}

#[tokio::test]
async fn test_transport_errors_are_not_stored() {
    let snapshot = RemoteSnapshot {
        builds: vec![build(5, SUITE, BuildState::Finished, Status::Success)],
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    test.remote
        .fail("get_build", RemoteError::Transport("502 Bad Gateway".into()));
    let err = mirror.get_build_by_id(5).await.unwrap_err();
    assert!(matches!(err, CacheError::Transport(_)));

    test.remote.clear_failures();
    let build = mirror.get_build_by_id(5).await.unwrap();
    assert!(!build.fake_stub);
    assert_eq!(test.remote.accesses(), 2);
}

#[tokio::test]
async fn test_tests_are_stored_without_count_locator() {
    let mut snapshot = RemoteSnapshot::default();
    let href = tests_href(11);
    snapshot.test_occurrences.insert(
        href.clone(),
        tcmirror_test::test_occurrences(11, &[("a.Test.one", Status::Success)]),
    );
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    let tests = mirror.get_tests(&href).await.unwrap();
    assert_eq!(tests.occurrences.len(), 1);

    let paged = mirror.get_tests(&format!("{href},count:100")).await.unwrap();
    assert_eq!(paged, tests);
    assert_eq!(test.remote.all_hits(), [("get_test_occurrences", 1)]);
    assert_eq!(mirror.stats().lookup_test("a.Test.one").unwrap().runs, 1);
}

#[tokio::test]
async fn test_missing_entities_become_empty() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});
    let mirror = &test.mirror;

    for _ in 0..2 {
        assert_eq!(mirror.get_change("/changes/id:1").await.unwrap(), Change::default());
        assert_eq!(
            mirror.get_build_stat("/builds/id:1/statistics").await.unwrap(),
            Statistics::default()
        );
        assert!(
            mirror
                .get_changes_list("/changes?locator=build:(id:1)")
                .await
                .unwrap()
                .changes
                .is_empty()
        );
    }
    assert_eq!(test.remote.accesses(), 3);

    // problems are not substituted
    let err = mirror.get_problems("/problems/1").await.unwrap_err();
    assert_eq!(err, CacheError::NotFound);
}

#[tokio::test]
async fn test_malformed_change_becomes_empty() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});
    test.remote
        .fail("get_change", RemoteError::Malformed("unexpected end of input".into()));

    let change = test.mirror.get_change("/changes/id:2").await.unwrap();
    assert_eq!(change, Change::default());

    test.remote.clear_failures();
    test.mirror.get_change("/changes/id:2").await.unwrap();
    assert_eq!(test.remote.accesses(), 1);
}

#[tokio::test]
async fn test_build_log_is_not_stored() {
    let mut snapshot = RemoteSnapshot::default();
    snapshot.logs.insert(9, "Build started\nBuild finished\n".into());
    let test = setup_mirror(snapshot, |_| {});

    for _ in 0..2 {
        let log = test.mirror.download_build_log(9).await.unwrap();
        assert_eq!(log, b"Build started\nBuild finished\n");
    }
    assert_eq!(test.remote.accesses(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_lookups_share_one_call() {
    let mut snapshot = RemoteSnapshot {
        builds: vec![build(9, SUITE, BuildState::Finished, Status::Failure)],
        ..Default::default()
    };
    snapshot.test_occurrences.insert(
        tests_href(9),
        tcmirror_test::test_occurrences(9, &[("a.Test.one", Status::Failure)]),
    );
    let remote =
        Arc::new(CountingRemote::new(snapshot).with_latency(Duration::from_millis(100)));
    let test = reopen_mirror(Arc::new(MemoryStore::new()), remote, |_| {});
    let mirror = &test.mirror;

    let builds = join_all((0..8).map(|_| mirror.get_build_by_id(9))).await;
    for build in builds {
        assert_eq!(build.unwrap().id(), 9);
    }
    assert_eq!(test.remote.all_hits(), [("get_build", 1)]);

    let suite = mirror.stats().lookup_suite(SUITE).unwrap();
    assert_eq!(suite.runs, 1);
    assert_eq!(suite.failures, 1);

    // paged hrefs share the stored key, and the load
    let hrefs: Vec<_> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                tests_href(9)
            } else {
                format!("{},count:{}", tests_href(9), 100 * i)
            }
        })
        .collect();
    let tests = join_all(hrefs.iter().map(|href| mirror.get_tests(href))).await;
    for tests in tests {
        assert_eq!(tests.unwrap().occurrences.len(), 1);
    }
    assert_eq!(test.remote.all_hits(), [("get_test_occurrences", 1)]);
    assert_eq!(mirror.stats().lookup_test("a.Test.one").unwrap().runs, 1);
}
