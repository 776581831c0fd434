mod common;

use cadenza_core::{
    Album, AppDirs, Config, MusicProvider, PlaybackCallback, PlaybackService, PlaybackState,
    Playlist, ProviderIdentifier, RemoteError, RemoteResult, Song,
};
use cadenza_host::{
    Aggregator, Binder, BoundState, EngineLauncher, HostContext, KnownPlugins, LaunchError,
    LocalEngineLauncher, PluginCatalog, PluginDescriptor, PluginRegistry, ProviderKind,
    ProviderLauncher, RegistryOptions, StaticCatalog,
};
use cadenza_player::CommandProxy;
use cadenza_plugin::DeathHandler;
use common::{aggregator, id, song, wait_until, FakeProvider};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(3);

/// Hands out a fake provider and keeps the death handler of the last launch.
struct FakeLauncher {
    fake: Arc<FakeProvider>,
    launches: AtomicUsize,
    on_death: Mutex<Option<DeathHandler>>,
}

impl FakeLauncher {
    fn new(fake: Arc<FakeProvider>) -> Arc<Self> {
        Arc::new(Self {
            fake,
            launches: AtomicUsize::new(0),
            on_death: Mutex::new(None),
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn crash(&self) {
        let on_death = self.on_death.lock().take();
        if let Some(on_death) = on_death {
            on_death();
        }
    }
}

impl ProviderLauncher for FakeLauncher {
    fn launch(&self, on_death: DeathHandler) -> Result<Binder, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.on_death.lock() = Some(on_death);
        let provider: Arc<dyn MusicProvider> = self.fake.clone();
        Ok(Binder::Content(provider))
    }
}

struct FailingLauncher;

impl ProviderLauncher for FailingLauncher {
    fn launch(&self, _on_death: DeathHandler) -> Result<Binder, LaunchError> {
        Err(LaunchError::Other("no such plugin".into()))
    }
}

fn descriptor(service: &str, launcher: Arc<dyn ProviderLauncher>) -> PluginDescriptor {
    PluginDescriptor {
        package: "org.example".into(),
        service: service.into(),
        name: Some(service.into()),
        author: Some("Example".into()),
        config_entry: None,
        kind: ProviderKind::Content,
        launcher,
    }
}

struct CountingEngines {
    launches: AtomicUsize,
}

impl EngineLauncher for CountingEngines {
    fn launch(&self) -> Result<Arc<dyn PlaybackService>, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        LocalEngineLauncher::new().launch()
    }
}

/// Engine whose every call fails as if its process had gone away.
struct DeadEngine {
    calls: Arc<AtomicUsize>,
}

impl DeadEngine {
    fn gone<T>(&self) -> RemoteResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::dead("engine gone"))
    }
}

impl PlaybackService for DeadEngine {
    fn play(&self) -> RemoteResult<()> { self.gone() }
    fn pause(&self) -> RemoteResult<()> { self.gone() }
    fn stop(&self) -> RemoteResult<()> { self.gone() }
    fn play_song(&self, _song: &Song) -> RemoteResult<()> { self.gone() }
    fn play_album(&self, _album: &Album) -> RemoteResult<()> { self.gone() }
    fn play_playlist(&self, _playlist: &Playlist) -> RemoteResult<()> { self.gone() }
    fn play_at_index(&self, _index: usize) -> RemoteResult<()> { self.gone() }
    fn clear_queue(&self) -> RemoteResult<()> { self.gone() }
    fn queue_song(&self, _song: &Song, _top: bool) -> RemoteResult<()> { self.gone() }
    fn queue_album(&self, _album: &Album, _top: bool) -> RemoteResult<()> { self.gone() }
    fn queue_playlist(&self, _playlist: &Playlist, _top: bool) -> RemoteResult<()> { self.gone() }
    fn play_next(&self, _song: &Song) -> RemoteResult<()> { self.gone() }
    fn seek(&self, _position_ms: u64) -> RemoteResult<()> { self.gone() }
    fn next(&self) -> RemoteResult<()> { self.gone() }
    fn previous(&self) -> RemoteResult<()> { self.gone() }
    fn set_dsp_chain(&self, _chain: &[ProviderIdentifier]) -> RemoteResult<()> { self.gone() }
    fn set_repeat_mode(&self, _repeat: bool) -> RemoteResult<()> { self.gone() }
    fn set_shuffle_mode(&self, _shuffle: bool) -> RemoteResult<()> { self.gone() }
    fn add_callback(&self, _callback: Arc<dyn PlaybackCallback>) -> RemoteResult<()> { self.gone() }
    fn remove_callback(&self, _callback: &Arc<dyn PlaybackCallback>) -> RemoteResult<()> { self.gone() }
    fn state(&self) -> RemoteResult<PlaybackState> { self.gone() }
    fn current_track(&self) -> RemoteResult<Option<Song>> { self.gone() }
    fn current_queue(&self) -> RemoteResult<Vec<Song>> { self.gone() }
    fn dsp_chain(&self) -> RemoteResult<Vec<ProviderIdentifier>> { self.gone() }
    fn is_repeat_mode(&self) -> RemoteResult<bool> { self.gone() }
    fn is_shuffle_mode(&self) -> RemoteResult<bool> { self.gone() }
}

/// First launch hands out a dead engine, later ones a working one.
struct FlakyEngines {
    launches: AtomicUsize,
    dead_calls: Arc<AtomicUsize>,
}

impl EngineLauncher for FlakyEngines {
    fn launch(&self) -> Result<Arc<dyn PlaybackService>, LaunchError> {
        if self.launches.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Arc::new(DeadEngine {
                calls: Arc::clone(&self.dead_calls),
            }));
        }
        LocalEngineLauncher::new().launch()
    }
}

struct Fixture {
    dir: TempDir,
    catalog: Arc<StaticCatalog>,
    aggregator: Arc<Aggregator>,
    registry: Arc<PluginRegistry>,
    engines: Arc<CountingEngines>,
}

fn fixture(known: KnownPlugins, dir: TempDir) -> Fixture {
    let catalog = Arc::new(StaticCatalog::default());
    let aggregator = aggregator();
    let engines = Arc::new(CountingEngines {
        launches: AtomicUsize::new(0),
    });
    let as_catalog: Arc<dyn PluginCatalog> = catalog.clone();
    let as_launcher: Arc<dyn EngineLauncher> = engines.clone();
    let registry = PluginRegistry::new(
        as_catalog,
        Arc::clone(&aggregator),
        known,
        as_launcher,
        RegistryOptions {
            bind_on_discovery: true,
            idle_grace: Duration::from_millis(150),
        },
    );
    Fixture {
        dir,
        catalog,
        aggregator,
        registry,
        engines,
    }
}

fn new_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let known = KnownPlugins::in_dir(dir.path());
    fixture(known, dir)
}

#[test]
fn first_run_seeds_known_plugins_then_reports_new_ones() {
    let f = new_fixture();
    f.catalog.push(descriptor("Files", FakeLauncher::new(FakeProvider::ready())));
    f.catalog.push(descriptor("Radio", FakeLauncher::new(FakeProvider::ready())));

    assert_eq!(f.registry.discover().len(), 2);
    assert!(f.registry.new_plugins().is_empty());

    f.catalog.push(descriptor("Podcasts", FakeLauncher::new(FakeProvider::ready())));
    let created = f.registry.discover();
    assert_eq!(created, vec![id("Podcasts")]);
    assert_eq!(f.registry.new_plugins(), vec![id("Podcasts")]);

    f.registry.reset_new_plugins();
    assert!(f.registry.new_plugins().is_empty());

    let stored = KnownPlugins::load(f.dir.path().join(cadenza_host::KNOWN_PLUGINS_FILE)).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.contains("org.example/Podcasts"));
    f.registry.tear_down();
}

#[test]
fn rediscovery_keeps_one_connection_per_plugin() {
    let f = new_fixture();
    let launcher = FakeLauncher::new(FakeProvider::ready());
    f.catalog.push(descriptor("Files", launcher.clone()));
    f.catalog.push(descriptor("Files", launcher.clone()));

    f.registry.discover();
    f.registry.discover();

    assert_eq!(f.registry.connections().len(), 1);
    let connection = f.registry.provider_by_name("Files").unwrap();
    assert!(wait_until(WAIT, || connection.is_bound()));
    f.registry.discover();
    assert_eq!(launcher.launches(), 1);
    f.registry.tear_down();
}

#[test]
fn plugins_without_a_name_are_skipped() {
    let f = new_fixture();
    let mut nameless = descriptor("Hidden", FakeLauncher::new(FakeProvider::ready()));
    nameless.name = None;
    f.catalog.push(nameless);

    assert!(f.registry.discover().is_empty());
    assert!(f.registry.available_providers().is_empty());
}

#[test]
fn bind_is_idempotent_and_registers_with_the_aggregator() {
    let f = new_fixture();
    let fake = FakeProvider::ready();
    let launcher = FakeLauncher::new(fake.clone());
    f.catalog.push(descriptor("Files", launcher.clone()));
    f.registry.discover();

    let connection = f.registry.provider(&id("Files")).unwrap();
    connection.bind();
    connection.bind();
    assert!(wait_until(WAIT, || connection.is_bound()));
    connection.bind();

    assert_eq!(launcher.launches(), 1);
    assert_eq!(fake.identifier(), Some(id("Files")));
    assert!(wait_until(WAIT, || f.aggregator.is_registered(&id("Files"))));
    // already authenticated, so binding pulls the catalog
    assert!(wait_until(WAIT, || fake.called("get_playlists")));
    f.registry.tear_down();
}

#[test]
fn binding_an_unauthenticated_provider_logs_in() {
    let f = new_fixture();
    let fake = FakeProvider::ready();
    fake.set_authenticated(false);
    f.catalog.push(descriptor("Files", FakeLauncher::new(fake.clone())));
    f.registry.discover();

    assert!(wait_until(WAIT, || fake.called("login")));
    assert!(!fake.called("get_playlists"));
    f.registry.tear_down();
}

#[test]
fn failed_bind_returns_to_unbound() {
    let f = new_fixture();
    f.catalog.push(descriptor("Broken", Arc::new(FailingLauncher)));
    f.registry.discover();

    let connection = f.registry.provider(&id("Broken")).unwrap();
    assert!(wait_until(WAIT, || connection.state() == BoundState::Unbound));
    assert!(!f.aggregator.is_registered(&id("Broken")));
}

#[test]
fn crashed_provider_is_kept_and_rebound_on_next_discovery() {
    let f = new_fixture();
    let fake = FakeProvider::ready();
    let launcher = FakeLauncher::new(fake.clone());
    f.catalog.push(descriptor("Files", launcher.clone()));
    f.registry.discover();
    let connection = f.registry.provider(&id("Files")).unwrap();
    assert!(wait_until(WAIT, || f.aggregator.is_registered(&id("Files"))));
    f.aggregator.update_song(&id("Files"), song("s:1", &id("Files")));

    launcher.crash();

    assert_eq!(connection.state(), BoundState::Unbound);
    assert!(!f.aggregator.is_registered(&id("Files")));
    assert_eq!(f.aggregator.cache().song_count(), 0);
    assert_eq!(f.registry.connections().len(), 1);

    f.registry.discover();
    assert!(wait_until(WAIT, || connection.is_bound()));
    assert_eq!(launcher.launches(), 2);
    f.registry.tear_down();
}

#[test]
fn provider_failing_a_call_is_unbound_and_rebound_on_next_discovery() {
    let f = new_fixture();
    let fake = FakeProvider::ready();
    let launcher = FakeLauncher::new(fake.clone());
    f.catalog.push(descriptor("Files", launcher.clone()));
    f.registry.discover();
    let connection = f.registry.provider(&id("Files")).unwrap();
    assert!(wait_until(WAIT, || fake.called("get_playlists")));

    // the process stays up, only the call fails
    fake.kill();
    assert!(f.aggregator.retrieve_song("s:404", &id("Files")).is_none());

    assert!(wait_until(WAIT, || connection.state() == BoundState::Unbound));
    assert!(wait_until(WAIT, || fake.called("shutdown")));
    assert!(!f.aggregator.is_registered(&id("Files")));

    fake.revive();
    f.registry.discover();
    assert!(wait_until(WAIT, || f.aggregator.is_registered(&id("Files"))));
    assert!(connection.is_bound());
    assert_eq!(launcher.launches(), 2);
    f.registry.tear_down();
}

#[test]
fn injected_provider_goes_through_the_same_lifecycle() {
    let f = new_fixture();
    let fake = FakeProvider::ready();
    let provider: Arc<dyn MusicProvider> = fake.clone();
    let connection = f
        .registry
        .inject_provider(id("Bundled"), None, Binder::Content(provider));

    assert!(wait_until(WAIT, || connection.is_bound()));
    assert!(wait_until(WAIT, || f.aggregator.is_registered(&id("Bundled"))));
    assert_eq!(connection.kind(), ProviderKind::Content);

    f.registry.tear_down();
    assert!(f.registry.connections().is_empty());
    assert!(fake.called("shutdown"));
    assert!(!f.aggregator.is_registered(&id("Bundled")));
}

#[cfg(unix)]
#[test]
fn unbind_releases_the_audio_socket_before_shutdown() {
    use cadenza_audio::{HostOptions, NullSink};

    let f = new_fixture();
    let fake = FakeProvider::ready();
    f.catalog.push(descriptor("Files", FakeLauncher::new(fake.clone())));
    f.registry.discover();
    let connection = f.registry.provider(&id("Files")).unwrap();
    assert!(wait_until(WAIT, || connection.is_bound()));

    let sockets = tempfile::tempdir().unwrap();
    let name = connection
        .create_audio_socket(sockets.path(), Box::new(NullSink::new()), HostOptions::default())
        .unwrap();
    let path = connection.audio_socket_path().unwrap();
    assert!(path.exists());
    assert_eq!(fake.socket_names(), vec![name.clone()]);

    connection.unbind();

    assert!(!path.exists());
    assert_eq!(connection.state(), BoundState::Unbound);
    assert!(fake.called("shutdown"));
    assert!(!f.aggregator.is_registered(&id("Files")));

    // the name is re-sent on the next bind
    connection.bind();
    assert!(wait_until(WAIT, || fake.socket_names().len() == 2));
    assert_eq!(fake.socket_names()[1], name);
    f.registry.tear_down();
}

#[test]
fn idle_engine_is_released_after_the_grace_period() {
    let f = new_fixture();
    f.registry.inc_playback_usage();
    assert!(wait_until(WAIT, || f.registry.is_engine_connected()));

    f.registry.dec_playback_usage();
    assert!(f.registry.is_engine_connected());
    assert!(wait_until(WAIT, || !f.registry.is_engine_connected()));
    assert_eq!(f.engines.launches.load(Ordering::SeqCst), 1);
}

#[test]
fn new_use_cancels_a_pending_release() {
    let f = new_fixture();
    let usage = f.registry.playback_usage();
    assert!(wait_until(WAIT, || f.registry.is_engine_connected()));

    drop(usage);
    let _again = f.registry.playback_usage();
    std::thread::sleep(Duration::from_millis(400));

    assert!(f.registry.is_engine_connected());
    assert_eq!(f.registry.playback_usage_count(), 1);
    assert_eq!(f.engines.launches.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct StateLog {
    states: Mutex<Vec<PlaybackState>>,
}

impl PlaybackCallback for StateLog {
    fn on_state_changed(&self, state: PlaybackState) {
        self.states.lock().push(state);
    }

    fn on_track_changed(&self, _song: Option<&Song>) {}
}

#[test]
fn proxy_connects_the_engine_and_replays_callbacks() {
    let f = new_fixture();
    let proxy = CommandProxy::new(f.registry.clone()).unwrap();
    f.registry.set_engine_ready_handle(proxy.ready_handle());

    let log = Arc::new(StateLog::default());
    let callback: Arc<dyn PlaybackCallback> = log.clone();
    proxy.add_callback(callback).unwrap();
    assert!(!proxy.is_engine_connected());

    let track = song("s:1", &id("Files"));
    proxy.queue_song(&track, false).unwrap();
    proxy.play().unwrap();

    assert!(wait_until(WAIT, || proxy.state() == Ok(PlaybackState::Playing)));
    assert_eq!(proxy.current_track().unwrap(), Some(track));
    assert!(log.states.lock().contains(&PlaybackState::Playing));

    // stopped with no users: the engine goes away and the proxy reconnects on demand
    proxy.stop().unwrap();
    assert!(wait_until(WAIT, || !f.registry.is_engine_connected()));
    proxy.play().unwrap();
    assert!(wait_until(WAIT, || f.registry.is_engine_connected()));
    assert_eq!(f.engines.launches.load(Ordering::SeqCst), 2);
    proxy.close();
}

#[test]
fn dead_engine_is_relaunched_and_the_command_retried() {
    let engines = Arc::new(FlakyEngines {
        launches: AtomicUsize::new(0),
        dead_calls: Arc::new(AtomicUsize::new(0)),
    });
    let as_catalog: Arc<dyn PluginCatalog> = Arc::new(StaticCatalog::default());
    let as_launcher: Arc<dyn EngineLauncher> = engines.clone();
    let dir = tempfile::tempdir().unwrap();
    let registry = PluginRegistry::new(
        as_catalog,
        aggregator(),
        KnownPlugins::in_dir(dir.path()),
        as_launcher,
        RegistryOptions::default(),
    );
    let proxy = CommandProxy::new(registry.clone()).unwrap();
    registry.set_engine_ready_handle(proxy.ready_handle());
    let _usage = registry.playback_usage();

    let track = song("s:1", &id("Files"));
    proxy.queue_song(&track, false).unwrap();
    proxy.play().unwrap();

    assert!(wait_until(WAIT, || proxy.state() == Ok(PlaybackState::Playing)));
    assert_eq!(engines.launches.load(Ordering::SeqCst), 2);
    assert!(engines.dead_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(proxy.current_queue().unwrap(), vec![track]);
    proxy.close();
    registry.tear_down();
}

#[test]
fn host_context_wires_registry_and_playback() {
    let dir = tempfile::tempdir().unwrap();
    let dirs = AppDirs::rooted_at(dir.path());
    let context = HostContext::new(Config::default(), dirs).unwrap();

    assert!(context.discover().is_empty());
    let playback = context.playback();
    playback.set_repeat_mode(true).unwrap();
    assert!(wait_until(WAIT, || playback.is_repeat_mode() == Ok(true)));

    context.shutdown();
    assert!(!context.registry().is_engine_connected());
}
