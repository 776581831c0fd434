pub mod config;
pub mod identifier;
pub mod logging;
pub mod models;
pub mod paths;
pub mod playback;
pub mod provider;

pub use config::{
    AggregatorConfig, AudioConfig, Config, ConfigError, LogLevel, LoggingConfig, PlaybackConfig,
    PluginsConfig, ValidationError,
};
pub use identifier::{plugin_key, ParseIdentifierError, ProviderIdentifier};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{
    Album, Artist, CatalogEntity, Entity, EntityKind, EntityMeta, Genre, Handle, Playlist,
    SearchResult, Song,
};
pub use paths::{AppDirs, DirsError};
pub use playback::{same_callback, PlaybackCallback, PlaybackService, PlaybackState, SongSource};
pub use provider::{DspProvider, MusicProvider, ProviderCallback, RemoteError, RemoteResult};

pub const APP_NAME: &str = "cadenza";
pub const APP_AUTHOR: &str = "Cadenza";
pub const APP_QUALIFIER: &str = "io";
