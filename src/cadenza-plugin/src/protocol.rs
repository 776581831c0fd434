//! Wire types for exec plugins.
//!
//! Every message is one JSON object per line. The host writes
//! [`PluginRequest`]s to the plugin's stdin; the plugin writes
//! [`PluginMessage`]s to stdout, either a response correlated by id or an
//! unsolicited callback.

use cadenza_core::{
    Album, Artist, Genre, Playlist, ProviderCallback, ProviderIdentifier, RemoteError,
    SearchResult, Song,
};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request sent from the host to a plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Unique request ID for correlation.
    pub id: u64,
    pub method: PluginMethod,
}

/// Anything a plugin writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginMessage {
    Response { id: u64, result: PluginResult },
    Callback { event: CallbackEvent },
}

/// Methods that can be invoked on a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum PluginMethod {
    /// Handshake; must be the first request.
    Initialize,
    SetIdentifier { identifier: ProviderIdentifier },
    /// Start or stop sending callback messages.
    RegisterCallback,
    UnregisterCallback,
    IsSetup,
    Login,
    IsAuthenticated,
    GetAlbums,
    GetArtists,
    GetSongs { offset: usize, limit: usize },
    GetPlaylists,
    GetSong { reference: String },
    GetAlbum { reference: String },
    GetArtist { reference: String },
    GetPlaylist { reference: String },
    GetSupportedRosettaPrefix,
    SetAudioSocketName { name: String },
    SetOfflineMode { offline: bool },
    StartSearch { query: String },
    /// Shutdown the plugin gracefully.
    Shutdown,
}

impl PluginMethod {
    pub fn name(&self) -> &'static str {
        match self {
            PluginMethod::Initialize => "initialize",
            PluginMethod::SetIdentifier { .. } => "set_identifier",
            PluginMethod::RegisterCallback => "register_callback",
            PluginMethod::UnregisterCallback => "unregister_callback",
            PluginMethod::IsSetup => "is_setup",
            PluginMethod::Login => "login",
            PluginMethod::IsAuthenticated => "is_authenticated",
            PluginMethod::GetAlbums => "get_albums",
            PluginMethod::GetArtists => "get_artists",
            PluginMethod::GetSongs { .. } => "get_songs",
            PluginMethod::GetPlaylists => "get_playlists",
            PluginMethod::GetSong { .. } => "get_song",
            PluginMethod::GetAlbum { .. } => "get_album",
            PluginMethod::GetArtist { .. } => "get_artist",
            PluginMethod::GetPlaylist { .. } => "get_playlist",
            PluginMethod::GetSupportedRosettaPrefix => "get_supported_rosetta_prefix",
            PluginMethod::SetAudioSocketName { .. } => "set_audio_socket_name",
            PluginMethod::SetOfflineMode { .. } => "set_offline_mode",
            PluginMethod::StartSearch { .. } => "start_search",
            PluginMethod::Shutdown => "shutdown",
        }
    }
}

/// Result of a plugin method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PluginResult {
    Initialized(PluginInfo),
    /// The call had no return value.
    Ack,
    Flag { value: bool },
    Songs { songs: Vec<Song> },
    Albums { albums: Vec<Album> },
    Artists { artists: Vec<Artist> },
    Playlists { playlists: Vec<Playlist> },
    Song { song: Option<Song> },
    Album { album: Option<Album> },
    Artist { artist: Option<Artist> },
    Playlist { playlist: Option<Playlist> },
    Prefixes { prefixes: Vec<String> },
    ShutdownAck,
    Error(PluginError),
}

/// Unsolicited notification from a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum CallbackEvent {
    LoggedIn { success: bool },
    LoggedOut,
    SongUpdate { song: Song },
    AlbumUpdate { album: Album },
    ArtistUpdate { artist: Artist },
    GenreUpdate { genre: Genre },
    PlaylistUpdate { playlist: Playlist },
    PlaylistRemoved { reference: String },
    SearchResult { result: SearchResult },
    SongPlaying,
    SongPaused,
    TrackEnded,
}

impl CallbackEvent {
    /// Delivers the event to `callback` on behalf of `provider`.
    pub fn dispatch(self, provider: &ProviderIdentifier, callback: &dyn ProviderCallback) {
        match self {
            CallbackEvent::LoggedIn { success } => callback.on_logged_in(provider, success),
            CallbackEvent::LoggedOut => callback.on_logged_out(provider),
            CallbackEvent::SongUpdate { song } => callback.on_song_update(provider, song),
            CallbackEvent::AlbumUpdate { album } => callback.on_album_update(provider, album),
            CallbackEvent::ArtistUpdate { artist } => callback.on_artist_update(provider, artist),
            CallbackEvent::GenreUpdate { genre } => callback.on_genre_update(provider, genre),
            CallbackEvent::PlaylistUpdate { playlist } => {
                callback.on_playlist_added_or_updated(provider, playlist)
            }
            CallbackEvent::PlaylistRemoved { reference } => {
                callback.on_playlist_removed(provider, &reference)
            }
            CallbackEvent::SearchResult { result } => callback.on_search_result(provider, result),
            CallbackEvent::SongPlaying => callback.on_song_playing(provider),
            CallbackEvent::SongPaused => callback.on_song_paused(provider),
            CallbackEvent::TrackEnded => callback.on_track_ended(provider),
        }
    }
}

/// Plugin initialization info returned after Initialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub protocol_version: u32,
}

/// Error returned by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    Network,
    Authentication,
    NotFound,
    NotSupported,
    /// The reply would be too large; retry with a smaller request.
    PayloadTooLarge,
    RateLimited,
    ProtocolMismatch,
    Internal,
}

impl From<PluginError> for RemoteError {
    fn from(err: PluginError) -> Self {
        match err.kind {
            PluginErrorKind::PayloadTooLarge => RemoteError::PayloadTooLarge,
            PluginErrorKind::RateLimited => RemoteError::RateLimited,
            PluginErrorKind::NotSupported => RemoteError::NotSupported {
                operation: err.message,
            },
            PluginErrorKind::Network
            | PluginErrorKind::Authentication
            | PluginErrorKind::NotFound
            | PluginErrorKind::ProtocolMismatch
            | PluginErrorKind::Internal => RemoteError::Remote {
                message: err.message,
            },
        }
    }
}
