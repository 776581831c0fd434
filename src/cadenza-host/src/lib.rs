//! Plugin host for Cadenza.
//!
//! [`PluginRegistry`] discovers provider plugins and keeps one [`Connection`]
//! per plugin. Bound content providers report into the [`Aggregator`], which
//! reconciles their catalog data in the [`ProviderCache`] and publishes
//! batched changes on the [`EventBus`]. [`HostContext`] wires the pieces
//! together with the playback [`cadenza_player::CommandProxy`].

mod aggregator;
mod cache;
mod catalog;
mod connection;
mod context;
mod debouncer;
mod events;
mod known_plugins;
mod launcher;
mod network;
mod registry;
mod rosetta;
mod search;

pub use aggregator::{Aggregator, ProviderDeathListener};
pub use cache::{Cached, Outcome, ProviderCache};
pub use catalog::{
    CatalogError, ManifestCatalog, PluginCatalog, PluginDescriptor, PluginManifest, ProviderKind,
    StaticCatalog, MANIFEST_FILE,
};
pub use connection::{socket_name_for, BoundState, Connection, ConnectionListener};
pub use context::{HostContext, HostError};
pub use debouncer::{Debouncer, DEFAULT_DEBOUNCE};
pub use events::{EventBus, LibraryEvent, ProviderPlayback, Subscription, Topic};
pub use known_plugins::{KnownPlugins, KnownPluginsError, KNOWN_PLUGINS_FILE};
pub use launcher::{
    Binder, EngineLauncher, ExecLauncher, InjectedLauncher, LaunchError, LocalEngineLauncher,
    ProviderLauncher,
};
pub use network::{AlwaysOnline, ManualNetwork, NetworkMonitor};
pub use registry::{PluginRegistry, PlaybackUsage, RegistryOptions, DEFAULT_IDLE_GRACE};
pub use rosetta::RosettaStone;
pub use search::SearchCache;
