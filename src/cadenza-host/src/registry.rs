//! Live set of provider connections and the single playback engine.

use crate::aggregator::{Aggregator, ProviderDeathListener};
use crate::catalog::{PluginCatalog, PluginDescriptor, ProviderKind};
use crate::connection::{Connection, ConnectionListener};
use crate::known_plugins::KnownPlugins;
use crate::launcher::{Binder, EngineLauncher};
use cadenza_core::{
    Config, PlaybackCallback, PlaybackService, PlaybackState, ProviderIdentifier, RemoteError,
    Song,
};
use cadenza_player::{EngineReadyHandle, EngineResolver};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// Bind connections as soon as discovery finds them.
    pub bind_on_discovery: bool,
    /// How long an idle, unused playback engine is kept before release.
    pub idle_grace: Duration,
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_on_discovery: config.plugins.bind_on_discovery,
            idle_grace: config.playback.idle_grace(),
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            bind_on_discovery: true,
            idle_grace: DEFAULT_IDLE_GRACE,
        }
    }
}

#[derive(Default)]
struct EngineSlot {
    engine: Option<Arc<dyn PlaybackService>>,
    watcher: Option<Arc<dyn PlaybackCallback>>,
    connecting: bool,
    usage: usize,
    /// Bumped whenever a pending release must be cancelled.
    release_generation: u64,
}

/// Discovers plugins, keeps their connections and owns the playback engine.
///
/// Rediscovery is keyed by `package/service`: a plugin found twice keeps one
/// connection. Bound content providers are registered with the
/// [`Aggregator`] and unregistered when they go away.
pub struct PluginRegistry {
    me: Weak<PluginRegistry>,
    catalog: Arc<dyn PluginCatalog>,
    aggregator: Arc<Aggregator>,
    options: RegistryOptions,
    known: Mutex<KnownPlugins>,
    new_plugins: Mutex<Vec<ProviderIdentifier>>,
    connections: RwLock<Vec<Arc<Connection>>>,
    listeners: RwLock<Vec<Weak<dyn ConnectionListener>>>,
    engine_launcher: Arc<dyn EngineLauncher>,
    engine: Mutex<EngineSlot>,
    ready: Mutex<Option<EngineReadyHandle>>,
}

impl PluginRegistry {
    pub fn new(
        catalog: Arc<dyn PluginCatalog>,
        aggregator: Arc<Aggregator>,
        known: KnownPlugins,
        engine_launcher: Arc<dyn EngineLauncher>,
        options: RegistryOptions,
    ) -> Arc<Self> {
        let registry = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            catalog,
            aggregator,
            options,
            known: Mutex::new(known),
            new_plugins: Mutex::new(Vec::new()),
            connections: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            engine_launcher,
            engine: Mutex::new(EngineSlot::default()),
            ready: Mutex::new(None),
        });
        let listener: Weak<dyn ProviderDeathListener> = Arc::downgrade(&registry) as Weak<PluginRegistry>;
        registry.aggregator.set_death_listener(listener);
        registry
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    // Discovery

    /// Reconciles the live connections with what the catalog offers.
    ///
    /// Returns the identifiers of connections created by this pass.
    pub fn discover(&self) -> Vec<ProviderIdentifier> {
        let descriptors: Vec<PluginDescriptor> = self
            .catalog
            .enumerate()
            .into_iter()
            .filter(|descriptor| {
                let named = descriptor.name.is_some();
                if !named {
                    tracing::debug!(plugin = %descriptor.key(), "skipping plugin without a name");
                }
                named
            })
            .collect();

        self.record_known(&descriptors);

        let mut created = Vec::new();
        for descriptor in &descriptors {
            match self.find(&descriptor.package, &descriptor.service) {
                Some(existing) => {
                    if existing.kind() == ProviderKind::Content && self.options.bind_on_discovery {
                        existing.bind();
                    }
                }
                None => {
                    let connection = Arc::new(Connection::new(descriptor));
                    created.push(connection.identifier().clone());
                    self.adopt(&connection);
                    if self.options.bind_on_discovery {
                        connection.bind();
                    }
                }
            }
        }
        tracing::info!(
            found = descriptors.len(),
            created = created.len(),
            "plugin discovery finished"
        );
        created
    }

    fn record_known(&self, descriptors: &[PluginDescriptor]) {
        let mut known = self.known.lock();
        let first_run = known.is_empty();
        let mut changed = false;
        for descriptor in descriptors {
            let inserted = known.insert(descriptor.key());
            changed |= inserted;
            if inserted && !first_run {
                tracing::info!(plugin = %descriptor.key(), "new plugin installed");
                self.new_plugins.lock().push(ProviderIdentifier::new(
                    descriptor.package.as_str(),
                    descriptor.service.as_str(),
                    descriptor.name.clone().unwrap_or_default(),
                ));
            }
        }
        if first_run && changed {
            tracing::debug!(count = known.len(), "seeded known plugins on first run");
        }
        if changed {
            if let Err(err) = known.save() {
                tracing::warn!(error = %err, "failed to persist known plugins");
            }
        }
    }

    /// Plugins installed since the known set was last reset.
    pub fn new_plugins(&self) -> Vec<ProviderIdentifier> {
        self.new_plugins.lock().clone()
    }

    pub fn reset_new_plugins(&self) {
        self.new_plugins.lock().clear();
    }

    /// Adds an in-process provider and binds it. A provider already present
    /// under the same `package/service` is kept instead.
    pub fn inject_provider(
        &self,
        identifier: ProviderIdentifier,
        author: Option<String>,
        binder: Binder,
    ) -> Arc<Connection> {
        if let Some(existing) = self.find(&identifier.package, &identifier.service) {
            tracing::debug!(provider = %identifier, "provider already present, not injecting");
            existing.bind();
            return existing;
        }
        let connection = Arc::new(Connection::injected(identifier, author, binder));
        self.adopt(&connection);
        connection.bind();
        connection
    }

    fn adopt(&self, connection: &Arc<Connection>) {
        let me: Weak<dyn ConnectionListener> = self.me.clone();
        connection.add_listener(me);
        for listener in self.listeners.read().iter() {
            connection.add_listener(listener.clone());
        }
        self.connections.write().push(Arc::clone(connection));
    }

    /// Registers `listener` with every current and future connection.
    pub fn add_connection_listener(&self, listener: Weak<dyn ConnectionListener>) {
        for connection in self.connections.read().iter() {
            connection.add_listener(listener.clone());
        }
        self.listeners.write().push(listener);
    }

    /// Unbinds every connection and releases the playback engine.
    pub fn tear_down(&self) {
        let connections = std::mem::take(&mut *self.connections.write());
        for connection in &connections {
            connection.unbind();
        }
        self.release_engine_now();
        tracing::info!(connections = connections.len(), "registry torn down");
    }

    // Lookups

    fn find(&self, package: &str, service: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.identifier().matches(package, service))
            .cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().clone()
    }

    fn of_kind(&self, kind: ProviderKind) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn provider(&self, identifier: &ProviderIdentifier) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.kind() == ProviderKind::Content && c.identifier() == identifier)
            .cloned()
    }

    pub fn provider_by_name(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.kind() == ProviderKind::Content && c.identifier().name == name)
            .cloned()
    }

    pub fn dsp(&self, identifier: &ProviderIdentifier) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.kind() == ProviderKind::Dsp && c.identifier() == identifier)
            .cloned()
    }

    pub fn available_providers(&self) -> Vec<Arc<Connection>> {
        self.of_kind(ProviderKind::Content)
    }

    pub fn available_dsps(&self) -> Vec<Arc<Connection>> {
        self.of_kind(ProviderKind::Dsp)
    }

    /// Logs in providers that are set up but not authenticated, and refreshes
    /// the ones that already are.
    fn auto_login(&self, identifier: &ProviderIdentifier, connection: &Connection) {
        let Some(provider) = connection.provider() else {
            return;
        };
        let report = |operation: &str, err: RemoteError| self.aggregator.report_failure(identifier, operation, &err);
        match provider.is_setup() {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(provider = %identifier, "provider is not set up");
                return;
            }
            Err(err) => return report("is_setup", err),
        }
        match provider.is_authenticated() {
            Ok(true) => self.aggregator.refresh_provider(identifier),
            Ok(false) => match provider.login() {
                Ok(true) => tracing::debug!(provider = %identifier, "login started"),
                Ok(false) => tracing::warn!(provider = %identifier, "provider refused to log in"),
                Err(err) => report("login", err),
            },
            Err(err) => report("is_authenticated", err),
        }
    }

    // Playback engine

    pub fn set_engine_ready_handle(&self, handle: EngineReadyHandle) {
        *self.ready.lock() = Some(handle);
    }

    pub fn playback_usage_count(&self) -> usize {
        self.engine.lock().usage
    }

    pub fn is_engine_connected(&self) -> bool {
        self.engine.lock().engine.is_some()
    }

    /// Marks the engine as in use, cancelling any pending release.
    pub fn inc_playback_usage(&self) {
        let needs_connect = {
            let mut slot = self.engine.lock();
            slot.usage += 1;
            slot.release_generation += 1;
            slot.engine.is_none()
        };
        if needs_connect {
            self.connect_engine();
        }
    }

    /// Drops one use. The last use of an idle engine schedules its release.
    pub fn dec_playback_usage(&self) {
        let engine = {
            let mut slot = self.engine.lock();
            slot.usage = slot.usage.saturating_sub(1);
            if slot.usage > 0 {
                return;
            }
            slot.engine.clone()
        };
        if let Some(engine) = engine {
            if engine_is_idle(engine.as_ref()) {
                self.schedule_release();
            }
        }
    }

    /// Holds one playback use until dropped.
    pub fn playback_usage(&self) -> PlaybackUsage {
        self.inc_playback_usage();
        PlaybackUsage {
            registry: self.me.clone(),
        }
    }

    fn on_engine_state(&self, state: PlaybackState) {
        if state.is_idle() {
            if self.engine.lock().usage == 0 {
                self.schedule_release();
            }
        } else {
            self.engine.lock().release_generation += 1;
        }
    }

    fn schedule_release(&self) {
        let generation = {
            let mut slot = self.engine.lock();
            slot.release_generation += 1;
            slot.release_generation
        };
        let registry = self.me.clone();
        let grace = self.options.idle_grace;
        tracing::debug!(grace_ms = grace.as_millis() as u64, "playback engine release scheduled");
        let spawned = thread::Builder::new()
            .name("playback-release".into())
            .spawn(move || {
                thread::sleep(grace);
                if let Some(registry) = registry.upgrade() {
                    registry.release_if_current(generation);
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to schedule playback engine release");
        }
    }

    fn release_if_current(&self, generation: u64) {
        let engine = {
            let slot = self.engine.lock();
            if slot.release_generation != generation || slot.usage > 0 {
                return;
            }
            slot.engine.clone()
        };
        let Some(engine) = engine else {
            return;
        };
        if !engine_is_idle(engine.as_ref()) {
            return;
        }
        let taken = {
            let mut slot = self.engine.lock();
            if slot.release_generation != generation || slot.usage > 0 {
                return;
            }
            (slot.engine.take(), slot.watcher.take())
        };
        shut_down_engine(taken);
    }

    fn release_engine_now(&self) {
        let taken = {
            let mut slot = self.engine.lock();
            slot.release_generation += 1;
            (slot.engine.take(), slot.watcher.take())
        };
        shut_down_engine(taken);
    }
}

fn engine_is_idle(engine: &dyn PlaybackService) -> bool {
    engine.state().map(|s| s.is_idle()).unwrap_or(true)
}

fn shut_down_engine(
    (engine, watcher): (Option<Arc<dyn PlaybackService>>, Option<Arc<dyn PlaybackCallback>>),
) {
    let Some(engine) = engine else {
        return;
    };
    if let Some(watcher) = watcher {
        if let Err(err) = engine.remove_callback(&watcher) {
            tracing::debug!(error = %err, "failed to remove engine watcher");
        }
    }
    if let Err(err) = engine.shutdown() {
        tracing::debug!(error = %err, "playback engine shutdown failed");
    }
    tracing::info!("playback engine released");
}

impl ConnectionListener for PluginRegistry {
    fn on_connected(&self, connection: &Arc<Connection>) {
        let Some(provider) = connection.provider() else {
            return;
        };
        let identifier = connection.identifier().clone();
        self.aggregator
            .register_provider(identifier.clone(), provider);
        if self.aggregator.is_registered(&identifier) {
            self.auto_login(&identifier, connection);
        }
    }

    fn on_disconnected(&self, connection: &Arc<Connection>) {
        if connection.kind() == ProviderKind::Content {
            self.aggregator.unregister_provider(connection.identifier());
        }
    }
}

impl ProviderDeathListener for PluginRegistry {
    /// A provider failed a call without its process exiting; drop the
    /// connection so the next discovery pass binds it again.
    fn on_provider_dead(&self, identifier: &ProviderIdentifier) {
        if let Some(connection) = self.provider(identifier) {
            connection.remote_failed();
        }
    }
}

impl EngineResolver for PluginRegistry {
    fn connected_engine(&self) -> Option<Arc<dyn PlaybackService>> {
        self.engine.lock().engine.clone()
    }

    /// Launches the engine on a background thread and signals the ready
    /// handle once it is stored.
    fn connect_engine(&self) {
        {
            let mut slot = self.engine.lock();
            if slot.engine.is_some() || slot.connecting {
                return;
            }
            slot.connecting = true;
        }
        let launcher = Arc::clone(&self.engine_launcher);
        let registry = self.me.clone();
        let spawned = thread::Builder::new()
            .name("playback-connect".into())
            .spawn(move || {
                let result = launcher.launch();
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                match result {
                    Ok(engine) => registry.engine_connected(engine),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to start playback engine");
                        registry.engine.lock().connecting = false;
                    }
                }
            });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn playback connect thread");
            self.engine.lock().connecting = false;
        }
    }

    fn engine_failed(&self, engine: &Arc<dyn PlaybackService>) {
        let taken = {
            let mut slot = self.engine.lock();
            let current = slot
                .engine
                .as_ref()
                .is_some_and(|held| same_engine(held, engine));
            if !current {
                return;
            }
            slot.release_generation += 1;
            (slot.engine.take(), slot.watcher.take())
        };
        tracing::warn!("playback engine stopped answering; dropping it");
        shut_down_engine(taken);
    }
}

fn same_engine(a: &Arc<dyn PlaybackService>, b: &Arc<dyn PlaybackService>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl PluginRegistry {
    fn engine_connected(&self, engine: Arc<dyn PlaybackService>) {
        let watcher: Arc<dyn PlaybackCallback> = Arc::new(IdleWatcher {
            registry: self.me.clone(),
        });
        if let Err(err) = engine.add_callback(Arc::clone(&watcher)) {
            tracing::warn!(error = %err, "failed to watch playback engine state");
        }
        {
            let mut slot = self.engine.lock();
            slot.engine = Some(engine);
            slot.watcher = Some(watcher);
            slot.connecting = false;
        }
        tracing::info!("playback engine connected");
        if let Some(ready) = self.ready.lock().as_ref() {
            ready.notify();
        }
    }
}

/// Releases the engine once it goes idle with nobody using it.
struct IdleWatcher {
    registry: Weak<PluginRegistry>,
}

impl PlaybackCallback for IdleWatcher {
    fn on_state_changed(&self, state: PlaybackState) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_engine_state(state);
        }
    }

    fn on_track_changed(&self, _song: Option<&Song>) {}
}

/// One use of the playback engine; released on drop.
#[must_use = "dropping the guard releases the playback use immediately"]
pub struct PlaybackUsage {
    registry: Weak<PluginRegistry>,
}

impl Drop for PlaybackUsage {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.dec_playback_usage();
        }
    }
}
