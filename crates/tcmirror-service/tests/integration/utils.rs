use std::sync::Arc;

use tcmirror_service::caching::{KvStore, MemoryStore};
use tcmirror_service::config::{Config, ServerConfig, TrackedChain};
use tcmirror_service::{Mirror, MirrorRegistry};
use tcmirror_sources::{RemoteSnapshot, RemoteSource};
use tcmirror_test::CountingRemote;
use tokio::runtime::Handle;

pub const SERVER: &str = "apache";
pub const SUITE: &str = "IgniteTests24Java8_RunAll";

/// A mirror of [`SERVER`] tracking [`SUITE`] in the default branch.
pub struct TestMirror {
    pub registry: MirrorRegistry,
    pub mirror: Arc<Mirror>,
    pub remote: Arc<CountingRemote>,
    pub store: Arc<dyn KvStore>,
}

pub fn test_config() -> Config {
    Config {
        servers: vec![ServerConfig {
            id: SERVER.into(),
            snapshot: None,
            tracked: vec![TrackedChain {
                suite_id: SUITE.into(),
                branch: None,
            }],
        }],
        ..Default::default()
    }
}

/// Opens a mirror serving `snapshot`, on an empty store.
///
/// Must be called from within a tokio runtime.
pub fn setup_mirror<F>(snapshot: RemoteSnapshot, configure: F) -> TestMirror
where
    F: FnOnce(&mut Config),
{
    let remote = Arc::new(CountingRemote::new(snapshot));
    reopen_mirror(Arc::new(MemoryStore::new()), remote, configure)
}

/// Opens a mirror on an existing store, as after a restart of the process.
pub fn reopen_mirror<F>(
    store: Arc<dyn KvStore>,
    remote: Arc<CountingRemote>,
    configure: F,
) -> TestMirror
where
    F: FnOnce(&mut Config),
{
    tcmirror_test::setup();

    let mut config = test_config();
    configure(&mut config);

    let factory_remote = Arc::clone(&remote);
    let registry = MirrorRegistry::new(
        config,
        Arc::clone(&store),
        Handle::current(),
        move |_| -> Arc<dyn RemoteSource> { factory_remote.clone() },
    );
    let mirror = registry.server(SERVER);

    TestMirror {
        registry,
        mirror,
        remote,
        store,
    }
}
