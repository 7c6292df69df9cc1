use std::time::Duration;

use tcmirror_sources::{BuildState, RemoteError, RemoteSnapshot, Status};
use tcmirror_test::{MASTER, build, synthetic_history};

use crate::{SUITE, setup_mirror};

fn ids(builds: &[tcmirror_sources::BuildRef]) -> Vec<u64> {
    builds.iter().map(|b| b.id).collect()
}

#[tokio::test]
async fn test_finished_builds_keep_dropped_history() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 5, 5),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |config| {
        config.caches.finished_builds_ttl = Duration::ZERO;
    });
    let mirror = &test.mirror;

    let history = mirror.get_finished_builds(SUITE, MASTER).await.unwrap();
    assert_eq!(ids(&history), [1, 2, 3, 4, 5]);

    // the server only keeps a limited history
    test.remote.update(|snapshot| {
        snapshot.builds.retain(|b| b.id() > 2);
        snapshot
            .builds
            .push(build(6, SUITE, BuildState::Finished, Status::Failure));
    });

    let history = mirror.get_finished_builds(SUITE, "<default>").await.unwrap();
    assert_eq!(ids(&history), [1, 2, 3, 4, 5, 6]);
    assert_eq!(history[5].status, Status::Failure);
    assert_eq!(test.remote.accesses(), 2);

    // newly listed builds are stored references
    assert!(mirror.actualizer().build_ref(6).is_some());
}

#[tokio::test]
async fn test_fetched_builds_win_over_stored() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 2, 2),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |config| {
        config.caches.finished_builds_ttl = Duration::ZERO;
    });
    let mirror = &test.mirror;
    mirror.get_finished_builds(SUITE, MASTER).await.unwrap();

    test.remote.update(|snapshot| {
        snapshot.build_mut(2).unwrap().build_ref.status = Status::Failure;
    });
    let history = mirror.get_finished_builds(SUITE, MASTER).await.unwrap();
    assert_eq!(history[1].status, Status::Failure);

    // merging the same listing again changes nothing
    let again = mirror.get_finished_builds(SUITE, MASTER).await.unwrap();
    assert_eq!(again, history);
}

#[tokio::test]
async fn test_finished_builds_are_served_until_expired() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 3, 3),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;

    for _ in 0..3 {
        let history = mirror.get_finished_builds(SUITE, MASTER).await.unwrap();
        assert_eq!(history.len(), 3);
    }
    assert_eq!(test.remote.all_hits(), [("list_finished_builds", 1)]);

    // the two listings are stored separately
    let history = mirror
        .get_finished_builds_include_failed(SUITE, MASTER)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(
        test.remote.all_hits(),
        [("list_finished_builds_include_failed", 1)]
    );
}

#[tokio::test]
async fn test_failed_listing_keeps_stored_history() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 3, 3),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |config| {
        config.caches.finished_builds_ttl = Duration::ZERO;
    });
    let mirror = &test.mirror;
    mirror.get_finished_builds(SUITE, MASTER).await.unwrap();

    test.remote
        .fail("list_finished_builds", RemoteError::Transport("timeout".into()));
    assert!(mirror.get_finished_builds(SUITE, MASTER).await.is_err());

    // an unknown suite or branch is an empty listing
    test.remote.clear_failures();
    test.remote.fail("list_finished_builds", RemoteError::NotFound);
    let history = mirror.get_finished_builds(SUITE, MASTER).await.unwrap();
    assert_eq!(ids(&history), [1, 2, 3]);
}

#[tokio::test]
async fn test_build_queue_is_refreshed_after_trigger() {
    let snapshot = RemoteSnapshot {
        builds: synthetic_history(SUITE, 1, 2, 1),
        ..Default::default()
    };
    let test = setup_mirror(snapshot, |_| {});
    let mirror = &test.mirror;
    test.registry.trigger_clock().record_trigger_at(0);

    for _ in 0..2 {
        let queued = mirror.get_queued_builds(None).await.unwrap();
        assert!(queued.is_empty());
        let running = mirror.get_running_builds(None).await.unwrap();
        assert_eq!(ids(&running), [2]);
    }
    assert_eq!(test.remote.accesses(), 2);

    let triggered = mirror.trigger_build(SUITE, MASTER, true).await.unwrap();
    let queued = mirror.get_queued_builds(None).await.unwrap();
    assert_eq!(queued, vec![triggered]);
    assert_eq!(test.remote.hits("list_queued_builds"), 1);
}

#[tokio::test]
async fn test_build_queue_per_branch() {
    let test = setup_mirror(RemoteSnapshot::default(), |_| {});
    let mirror = &test.mirror;

    let master = mirror.trigger_build(SUITE, MASTER, false).await.unwrap();
    let feature = mirror
        .trigger_build(SUITE, "pull/42/head", false)
        .await
        .unwrap();

    let queued = mirror.get_queued_builds(Some("pull/42/head")).await.unwrap();
    assert_eq!(queued, vec![feature.clone()]);
    let queued = mirror.get_queued_builds(None).await.unwrap();
    assert_eq!(queued, vec![master, feature]);
}
