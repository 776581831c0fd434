//! Adapter exposing an exec plugin through the provider call surfaces.

use crate::host::{ExecPluginHost, HostEvent, PluginConfig, PluginHostError};
use crate::protocol::{PluginInfo, PluginMethod, PluginResult};
use cadenza_core::{
    Album, Artist, DspProvider, MusicProvider, Playlist, ProviderCallback, ProviderIdentifier,
    RemoteError, RemoteResult, Song,
};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Called once if the plugin process dies on its own.
pub type DeathHandler = Box<dyn FnOnce() + Send>;

type CallbackSlot = Arc<RwLock<Option<Arc<dyn ProviderCallback>>>>;

/// A content or DSP provider backed by an external plugin process.
///
/// Callback messages from the plugin are delivered on a dedicated thread, so a
/// callback may call back into the provider without deadlocking the transport.
pub struct ExecProvider {
    host: ExecPluginHost,
    info: PluginInfo,
    identifier: Arc<RwLock<ProviderIdentifier>>,
    callback: CallbackSlot,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ExecProvider {
    /// Launches the plugin and completes the handshake.
    pub fn spawn(config: PluginConfig, on_death: DeathHandler) -> Result<Self, PluginHostError> {
        let host = ExecPluginHost::new(config);
        let info = host.start()?;

        let identifier = Arc::new(RwLock::new(ProviderIdentifier::default()));
        let callback: CallbackSlot = Arc::new(RwLock::new(None));
        let dispatcher = thread::Builder::new()
            .name(format!("plugin-callbacks-{}", info.id))
            .spawn({
                let events = host.events();
                let identifier = Arc::clone(&identifier);
                let callback = Arc::clone(&callback);
                move || dispatch_loop(events, &identifier, &callback, on_death)
            })
            .map_err(PluginHostError::SpawnFailed)?;

        Ok(Self {
            host,
            info,
            identifier,
            callback,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    /// Stop the underlying plugin process and the callback thread.
    pub fn stop(&self) -> Result<(), PluginHostError> {
        self.callback.write().take();
        self.host.stop()?;
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            if dispatcher.thread().id() != thread::current().id() {
                let _ = dispatcher.join();
            }
        }
        Ok(())
    }

    fn map_host_error(err: PluginHostError) -> RemoteError {
        match err {
            PluginHostError::PluginError(err) => err.into(),
            fatal if fatal.is_fatal() => RemoteError::dead(fatal.to_string()),
            other => RemoteError::Remote {
                message: other.to_string(),
            },
        }
    }

    fn call<T>(
        &self,
        method: PluginMethod,
        extract: impl FnOnce(PluginResult) -> Option<T>,
    ) -> RemoteResult<T> {
        let name = method.name();
        let result = self
            .host
            .send_request(method)
            .map_err(Self::map_host_error)?;
        extract(result).ok_or_else(|| RemoteError::Remote {
            message: format!("unexpected response type for {name}"),
        })
    }

    fn ack(&self, method: PluginMethod) -> RemoteResult<()> {
        self.call(method, |result| match result {
            PluginResult::Ack | PluginResult::ShutdownAck => Some(()),
            _ => None,
        })
    }

    fn flag(&self, method: PluginMethod) -> RemoteResult<bool> {
        self.call(method, |result| match result {
            PluginResult::Flag { value } => Some(value),
            _ => None,
        })
    }

    fn send_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()> {
        *self.identifier.write() = identifier.clone();
        self.ack(PluginMethod::SetIdentifier {
            identifier: identifier.clone(),
        })
    }

    fn send_shutdown(&self) -> RemoteResult<()> {
        self.stop().map_err(Self::map_host_error)
    }
}

impl Drop for ExecProvider {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn dispatch_loop(
    events: Receiver<HostEvent>,
    identifier: &RwLock<ProviderIdentifier>,
    callback: &RwLock<Option<Arc<dyn ProviderCallback>>>,
    on_death: DeathHandler,
) {
    for event in events.iter() {
        match event {
            HostEvent::Callback(event) => {
                let target = callback.read().clone();
                match target {
                    Some(target) => {
                        let provider = identifier.read().clone();
                        event.dispatch(&provider, target.as_ref());
                    }
                    None => tracing::trace!(?event, "no callback registered, dropping event"),
                }
            }
            HostEvent::Terminated => {
                on_death();
                return;
            }
            HostEvent::Closed => return,
        }
    }
}

impl MusicProvider for ExecProvider {
    fn set_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()> {
        self.send_identifier(identifier)
    }

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> RemoteResult<()> {
        *self.callback.write() = Some(callback);
        self.ack(PluginMethod::RegisterCallback)
    }

    fn unregister_callback(&self) -> RemoteResult<()> {
        self.callback.write().take();
        self.ack(PluginMethod::UnregisterCallback)
    }

    fn is_setup(&self) -> RemoteResult<bool> {
        self.flag(PluginMethod::IsSetup)
    }

    fn login(&self) -> RemoteResult<bool> {
        self.flag(PluginMethod::Login)
    }

    fn is_authenticated(&self) -> RemoteResult<bool> {
        self.flag(PluginMethod::IsAuthenticated)
    }

    fn get_albums(&self) -> RemoteResult<Vec<Album>> {
        self.call(PluginMethod::GetAlbums, |result| match result {
            PluginResult::Albums { albums } => Some(albums),
            _ => None,
        })
    }

    fn get_artists(&self) -> RemoteResult<Vec<Artist>> {
        self.call(PluginMethod::GetArtists, |result| match result {
            PluginResult::Artists { artists } => Some(artists),
            _ => None,
        })
    }

    fn get_songs(&self, offset: usize, limit: usize) -> RemoteResult<Vec<Song>> {
        self.call(PluginMethod::GetSongs { offset, limit }, |result| match result {
            PluginResult::Songs { songs } => Some(songs),
            _ => None,
        })
    }

    fn get_playlists(&self) -> RemoteResult<Vec<Playlist>> {
        self.call(PluginMethod::GetPlaylists, |result| match result {
            PluginResult::Playlists { playlists } => Some(playlists),
            _ => None,
        })
    }

    fn get_song(&self, reference: &str) -> RemoteResult<Option<Song>> {
        let method = PluginMethod::GetSong {
            reference: reference.to_string(),
        };
        self.call(method, |result| match result {
            PluginResult::Song { song } => Some(song),
            _ => None,
        })
    }

    fn get_album(&self, reference: &str) -> RemoteResult<Option<Album>> {
        let method = PluginMethod::GetAlbum {
            reference: reference.to_string(),
        };
        self.call(method, |result| match result {
            PluginResult::Album { album } => Some(album),
            _ => None,
        })
    }

    fn get_artist(&self, reference: &str) -> RemoteResult<Option<Artist>> {
        let method = PluginMethod::GetArtist {
            reference: reference.to_string(),
        };
        self.call(method, |result| match result {
            PluginResult::Artist { artist } => Some(artist),
            _ => None,
        })
    }

    fn get_playlist(&self, reference: &str) -> RemoteResult<Option<Playlist>> {
        let method = PluginMethod::GetPlaylist {
            reference: reference.to_string(),
        };
        self.call(method, |result| match result {
            PluginResult::Playlist { playlist } => Some(playlist),
            _ => None,
        })
    }

    fn get_supported_rosetta_prefix(&self) -> RemoteResult<Vec<String>> {
        self.call(PluginMethod::GetSupportedRosettaPrefix, |result| match result {
            PluginResult::Prefixes { prefixes } => Some(prefixes),
            _ => None,
        })
    }

    fn set_audio_socket_name(&self, name: &str) -> RemoteResult<()> {
        self.ack(PluginMethod::SetAudioSocketName {
            name: name.to_string(),
        })
    }

    fn set_offline_mode(&self, offline: bool) -> RemoteResult<()> {
        self.ack(PluginMethod::SetOfflineMode { offline })
    }

    fn start_search(&self, query: &str) -> RemoteResult<()> {
        self.ack(PluginMethod::StartSearch {
            query: query.to_string(),
        })
    }

    fn shutdown(&self) -> RemoteResult<()> {
        self.send_shutdown()
    }
}

impl DspProvider for ExecProvider {
    fn set_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()> {
        self.send_identifier(identifier)
    }

    fn set_audio_socket_name(&self, name: &str) -> RemoteResult<()> {
        self.ack(PluginMethod::SetAudioSocketName {
            name: name.to_string(),
        })
    }

    fn shutdown(&self) -> RemoteResult<()> {
        self.send_shutdown()
    }
}
