use std::sync::Arc;
use std::time::Duration;

use tcmirror_service::caching::MemoryStore;
use tcmirror_sources::{BuildState, RemoteError, RemoteSnapshot, Status};
use tcmirror_test::{CountingRemote, MASTER, finish_all, synthetic_history};

use crate::{SUITE, reopen_mirror, setup_mirror};

const FIRST_ID: u64 = 50_000;
const BUILDS: usize = 1000;

#[tokio::test(flavor = "multi_thread")]
async fn test_reindexed_history_is_finished_after_actualization() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, FIRST_ID, BUILDS, BUILDS / 2),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    let listed = mirror.full_reindex(SUITE, "<default>").await.unwrap();
    assert_eq!(listed, BUILDS);

    let history = mirror.get_build_history(SUITE, "<default>");
    assert_eq!(history.len(), BUILDS);
    assert_eq!(history.iter().filter(|b| b.is_finished()).count(), BUILDS / 2);

    test.remote.update(finish_all);
    test.remote.accesses();

    let report = mirror.actualize_recent_builds().await;
    assert_eq!(report.checked, BUILDS / 2);
    assert_eq!(report.pending, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.missing, 0);

    // everything was found in the listed history
    assert_eq!(test.remote.hits("get_build"), 0);

    let history = mirror.get_build_history(SUITE, "<default>");
    assert_eq!(history.len(), BUILDS);
    for (i, build_ref) in history.iter().enumerate() {
        assert_eq!(build_ref.id, FIRST_ID + i as u64);
        assert_eq!(build_ref.state, BuildState::Finished);
        assert_eq!(build_ref.branch_name, MASTER);
    }
    assert_eq!(mirror.get_build_history(SUITE, MASTER), history);
}

#[tokio::test]
async fn test_reindex_never_reverts_finished_builds() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 3, 3),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;
    mirror.full_reindex(SUITE, MASTER).await.unwrap();

    // the server reports a finished build as running again
    test.remote.update(|snapshot| {
        let build = snapshot.build_mut(2).unwrap();
        build.build_ref.state = BuildState::Running;
        build.build_ref.status = Status::Unknown;
    });
    mirror.full_reindex(SUITE, MASTER).await.unwrap();

    let build_ref = mirror.actualizer().build_ref(2).unwrap();
    assert_eq!(build_ref.state, BuildState::Finished);
    assert_eq!(build_ref.status, Status::Success);
}

#[tokio::test]
async fn test_builds_missing_from_lists_are_fetched() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 4, 2),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;
    mirror.full_reindex(SUITE, MASTER).await.unwrap();

    // the listing of finished builds is unavailable, queued and running builds are listed
    test.remote.update(finish_all);
    test.remote
        .fail("list_finished_builds_include_failed", RemoteError::Transport("timeout".into()));
    test.remote.accesses();

    let report = mirror.actualize_recent_builds().await;
    insta::assert_debug_snapshot!(report, @r###"
    ActualizationReport {
        checked: 2,
        updated: 2,
        pending: 0,
        failed: 0,
        missing: 0,
    }
    "###);
    assert_eq!(test.remote.hits("get_build"), 2);

    assert!(
        mirror
            .get_build_history(SUITE, MASTER)
            .iter()
            .all(|b| b.state == BuildState::Finished)
    );
}

#[tokio::test]
async fn test_transport_errors_keep_builds_pending() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 3, 1),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;
    mirror.full_reindex(SUITE, MASTER).await.unwrap();

    test.remote.update(finish_all);
    for op in [
        "list_queued_builds",
        "list_running_builds",
        "list_finished_builds_include_failed",
        "get_build",
    ] {
        test.remote.fail(op, RemoteError::Transport("connection reset".into()));
    }

    let report = mirror.actualize_recent_builds().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.pending, 2);

    test.remote.clear_failures();
    let report = mirror.actualize_recent_builds().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn test_triggered_build_is_actualized() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});
    let mirror = &test.mirror;

    let queued = mirror.trigger_build(SUITE, "<default>", false).await.unwrap();
    assert_eq!(queued.state, BuildState::Queued);
    assert_eq!(queued.branch_name, MASTER);
    assert_eq!(mirror.get_build_history(SUITE, MASTER), vec![queued.clone()]);

    test.remote.update(|snapshot| {
        let build = snapshot.build_mut(queued.id).unwrap();
        build.build_ref.state = BuildState::Running;
    });
    let report = mirror.actualize_recent_builds().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.pending, 1);
    assert_eq!(
        mirror.actualizer().build_ref(queued.id).unwrap().state,
        BuildState::Running
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_build_fetches_are_bounded() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 40, 0),
        ..Default::default()
    };
    let remote =
        Arc::new(CountingRemote::new(snapshot).with_latency(Duration::from_millis(20)));
    let test = reopen_mirror(Arc::new(MemoryStore::new()), remote, |config| {
        config.workers.max_concurrent_fetches = 4;
    });
    let mirror = &test.mirror;
    assert_eq!(mirror.full_reindex(SUITE, MASTER).await.unwrap(), 40);

    // no listing works, so every pending build is fetched on its own
    test.remote.update(finish_all);
    for op in [
        "list_queued_builds",
        "list_running_builds",
        "list_finished_builds_include_failed",
    ] {
        test.remote.fail(op, RemoteError::Transport("503 Service Unavailable".into()));
    }
    test.remote.accesses();

    let report = mirror.actualize_recent_builds().await;
    assert_eq!(report.checked, 40);
    assert_eq!(report.updated, 40);
    assert_eq!(report.pending, 0);
    assert_eq!(test.remote.hits("get_build"), 40);
    assert_eq!(test.remote.max_concurrent_calls(), 4);
}
