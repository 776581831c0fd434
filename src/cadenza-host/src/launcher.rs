use cadenza_core::{DspProvider, MusicProvider, PlaybackService, SongSource};
use cadenza_player::LocalPlaybackEngine;
use cadenza_plugin::{DeathHandler, ExecProvider, PluginConfig, PluginHostError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("plugin executable not found: {0}")]
    MissingExecutable(PathBuf),
    #[error(transparent)]
    Plugin(#[from] PluginHostError),
    #[error("{0}")]
    Other(String),
}

/// Call surface of a bound provider.
#[derive(Clone)]
pub enum Binder {
    Content(Arc<dyn MusicProvider>),
    Dsp(Arc<dyn DspProvider>),
}

impl Binder {
    pub fn shutdown(&self) {
        let result = match self {
            Binder::Content(provider) => provider.shutdown(),
            Binder::Dsp(provider) => provider.shutdown(),
        };
        if let Err(error) = result {
            tracing::debug!(%error, "provider shutdown failed");
        }
    }
}

impl std::fmt::Debug for Binder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binder::Content(_) => f.write_str("Binder::Content"),
            Binder::Dsp(_) => f.write_str("Binder::Dsp"),
        }
    }
}

/// Starts a provider and hands back its call surface.
///
/// Called from a connection's bind thread, so it may block. `on_death` must be
/// invoked if the provider later goes away on its own.
pub trait ProviderLauncher: Send + Sync {
    fn launch(&self, on_death: DeathHandler) -> Result<Binder, LaunchError>;
}

/// Launches an exec plugin process.
#[derive(Debug, Clone)]
pub struct ExecLauncher {
    config: PluginConfig,
    dsp: bool,
}

impl ExecLauncher {
    pub fn content(config: PluginConfig) -> Self {
        Self { config, dsp: false }
    }

    pub fn dsp(config: PluginConfig) -> Self {
        Self { config, dsp: true }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl ProviderLauncher for ExecLauncher {
    fn launch(&self, on_death: DeathHandler) -> Result<Binder, LaunchError> {
        if !self.config.executable.exists() {
            return Err(LaunchError::MissingExecutable(self.config.executable.clone()));
        }
        let provider = Arc::new(ExecProvider::spawn(self.config.clone(), on_death)?);
        tracing::debug!(plugin = %provider.info().id, version = %provider.info().version, "plugin process started");
        Ok(if self.dsp {
            Binder::Dsp(provider)
        } else {
            Binder::Content(provider)
        })
    }
}

/// Hands out an in-process provider.
pub struct InjectedLauncher {
    binder: Binder,
}

impl InjectedLauncher {
    pub fn new(binder: Binder) -> Self {
        Self { binder }
    }
}

impl ProviderLauncher for InjectedLauncher {
    fn launch(&self, _on_death: DeathHandler) -> Result<Binder, LaunchError> {
        Ok(self.binder.clone())
    }
}

/// Starts the playback engine the registry hands to the command proxy.
pub trait EngineLauncher: Send + Sync {
    fn launch(&self) -> Result<Arc<dyn PlaybackService>, LaunchError>;
}

/// Starts a fresh [`LocalPlaybackEngine`] per launch.
pub struct LocalEngineLauncher {
    songs: Option<Arc<dyn SongSource>>,
}

impl LocalEngineLauncher {
    pub fn new() -> Self {
        Self { songs: None }
    }

    pub fn with_song_source(songs: Arc<dyn SongSource>) -> Self {
        Self { songs: Some(songs) }
    }
}

impl Default for LocalEngineLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineLauncher for LocalEngineLauncher {
    fn launch(&self) -> Result<Arc<dyn PlaybackService>, LaunchError> {
        let engine = match &self.songs {
            Some(songs) => LocalPlaybackEngine::with_song_source(Arc::clone(songs)),
            None => LocalPlaybackEngine::new(),
        };
        Ok(Arc::new(engine))
    }
}
