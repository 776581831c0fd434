use crate::aggregator::Aggregator;
use crate::catalog::{ManifestCatalog, PluginCatalog};
use crate::events::{EventBus, Subscription, Topic};
use crate::known_plugins::{KnownPlugins, KnownPluginsError, KNOWN_PLUGINS_FILE};
use crate::launcher::{EngineLauncher, LocalEngineLauncher};
use crate::network::{AlwaysOnline, NetworkMonitor};
use crate::registry::{PluginRegistry, RegistryOptions};
use cadenza_core::{AppDirs, Config, ProviderIdentifier, SongSource};
use cadenza_player::{CommandProxy, EngineResolver};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[cfg(unix)]
use crate::connection::socket_name_for;
#[cfg(unix)]
use cadenza_audio::{AudioSink, DspChain, HostOptions};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    KnownPlugins(#[from] KnownPluginsError),
    #[error("failed to start host worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to create socket directory {path}: {source}")]
    SocketDir { path: PathBuf, source: io::Error },
    #[error("no content provider {0}")]
    UnknownProvider(ProviderIdentifier),
    #[error("no dsp provider {0}")]
    UnknownDsp(ProviderIdentifier),
    #[error("failed to open audio route: {0}")]
    Audio(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Everything a running host shares, built once and handed to whoever needs
/// it.
pub struct HostContext {
    config: Config,
    dirs: AppDirs,
    bus: EventBus,
    aggregator: Arc<Aggregator>,
    registry: Arc<PluginRegistry>,
    proxy: Arc<CommandProxy>,
}

impl HostContext {
    /// Host that discovers exec plugins under the plugin directories and
    /// plays through the in-process engine.
    pub fn new(config: Config, dirs: AppDirs) -> Result<Self, HostError> {
        let bus = EventBus::new();
        let network: Arc<dyn NetworkMonitor> = Arc::new(AlwaysOnline);
        let aggregator =
            Aggregator::new(&config.aggregator, bus.clone(), network).map_err(HostError::Spawn)?;

        let mut roots = vec![dirs.plugins_dir().to_path_buf()];
        roots.extend(config.plugins.extra_dirs.iter().cloned());
        let catalog: Arc<dyn PluginCatalog> = Arc::new(ManifestCatalog::new(roots));

        let known = KnownPlugins::load(dirs.data_dir().join(KNOWN_PLUGINS_FILE))?;
        let songs: Arc<dyn SongSource> = aggregator.clone();
        let engine: Arc<dyn EngineLauncher> = Arc::new(LocalEngineLauncher::with_song_source(songs));

        Self::with_parts(config, dirs, bus, aggregator, catalog, known, engine)
    }

    /// Host over caller-supplied collaborators.
    pub fn with_parts(
        config: Config,
        dirs: AppDirs,
        bus: EventBus,
        aggregator: Arc<Aggregator>,
        catalog: Arc<dyn PluginCatalog>,
        known: KnownPlugins,
        engine: Arc<dyn EngineLauncher>,
    ) -> Result<Self, HostError> {
        let registry = PluginRegistry::new(
            catalog,
            Arc::clone(&aggregator),
            known,
            engine,
            RegistryOptions::from_config(&config),
        );
        let resolver: Arc<dyn EngineResolver> = registry.clone();
        let proxy = CommandProxy::with_timeout(resolver, config.playback.engine_connect_timeout())
            .map_err(HostError::Spawn)?;
        registry.set_engine_ready_handle(proxy.ready_handle());

        Ok(Self {
            config,
            dirs,
            bus,
            aggregator,
            registry,
            proxy: Arc::new(proxy),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dirs(&self) -> &AppDirs {
        &self.dirs
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Playback control. Commands are queued and forwarded once the engine
    /// is up.
    pub fn playback(&self) -> Arc<CommandProxy> {
        Arc::clone(&self.proxy)
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        self.bus.subscribe(topics)
    }

    pub fn discover(&self) -> Vec<ProviderIdentifier> {
        self.registry.discover()
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.config
            .audio
            .socket_dir
            .clone()
            .unwrap_or_else(|| self.dirs.socket_dir().to_path_buf())
    }

    #[cfg(unix)]
    pub fn audio_options(&self) -> HostOptions {
        HostOptions {
            max_frame_bytes: self.config.audio.max_frame_bytes,
            pool_buffers: self.config.audio.pool_buffers,
        }
    }

    /// Routes `source`'s audio through `dsp_chain` into `sink` and tells
    /// every provider on the route which socket to use.
    #[cfg(unix)]
    pub fn route_audio(
        &self,
        source: &ProviderIdentifier,
        dsp_chain: &[ProviderIdentifier],
        sink: Box<dyn AudioSink>,
    ) -> Result<DspChain, HostError> {
        let source_connection = self
            .registry
            .provider(source)
            .ok_or_else(|| HostError::UnknownProvider(source.clone()))?;
        let stages = dsp_chain
            .iter()
            .map(|id| {
                self.registry
                    .dsp(id)
                    .ok_or_else(|| HostError::UnknownDsp(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let socket_dir = self.socket_dir();
        std::fs::create_dir_all(&socket_dir).map_err(|source| HostError::SocketDir {
            path: socket_dir.clone(),
            source,
        })?;

        let source_name = socket_name_for(source);
        let stage_names: Vec<String> = dsp_chain.iter().map(socket_name_for).collect();
        let chain = DspChain::build(
            &socket_dir,
            &source_name,
            &stage_names,
            sink,
            self.audio_options(),
        )
        .map_err(|err| HostError::Audio(Box::new(err)))?;

        source_connection.set_audio_socket_name(source_name);
        for (connection, name) in stages.iter().zip(stage_names) {
            connection.set_audio_socket_name(name);
        }
        Ok(chain)
    }

    /// Stops the playback proxy and unbinds every provider.
    pub fn shutdown(&self) {
        self.proxy.close();
        self.registry.tear_down();
        tracing::info!("host shut down");
    }
}
