use crate::identifier::ProviderIdentifier;
use crate::models::{Album, Artist, Genre, Playlist, SearchResult, Song};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Failure categories of a call across the plugin boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// The plugin process is gone or its transport is broken.
    #[error("provider is unreachable: {reason}")]
    Dead { reason: String },
    /// The reply would not fit through the transport; ask for less.
    #[error("reply payload too large")]
    PayloadTooLarge,
    #[error("provider is rate limited")]
    RateLimited,
    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },
    #[error("provider error: {message}")]
    Remote { message: String },
}

impl RemoteError {
    pub fn dead(reason: impl Into<String>) -> Self {
        RemoteError::Dead {
            reason: reason.into(),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, RemoteError::Dead { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote surface of a content provider plugin.
///
/// Implementations are either in-process (injected) or proxies over a
/// plugin process. Calls block the caller until the plugin answers.
pub trait MusicProvider: Send + Sync {
    fn set_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()>;

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> RemoteResult<()>;

    fn unregister_callback(&self) -> RemoteResult<()>;

    fn is_setup(&self) -> RemoteResult<bool>;

    fn login(&self) -> RemoteResult<bool>;

    fn is_authenticated(&self) -> RemoteResult<bool>;

    fn get_albums(&self) -> RemoteResult<Vec<Album>>;

    fn get_artists(&self) -> RemoteResult<Vec<Artist>>;

    fn get_songs(&self, offset: usize, limit: usize) -> RemoteResult<Vec<Song>>;

    fn get_playlists(&self) -> RemoteResult<Vec<Playlist>>;

    fn get_song(&self, reference: &str) -> RemoteResult<Option<Song>>;

    fn get_album(&self, reference: &str) -> RemoteResult<Option<Album>>;

    fn get_artist(&self, reference: &str) -> RemoteResult<Option<Artist>>;

    fn get_playlist(&self, reference: &str) -> RemoteResult<Option<Playlist>>;

    /// Reference prefixes this provider can resolve, preferred first.
    fn get_supported_rosetta_prefix(&self) -> RemoteResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn set_audio_socket_name(&self, name: &str) -> RemoteResult<()>;

    fn set_offline_mode(&self, offline: bool) -> RemoteResult<()>;

    /// Results arrive later through [`ProviderCallback::on_search_result`].
    fn start_search(&self, query: &str) -> RemoteResult<()>;

    fn shutdown(&self) -> RemoteResult<()> {
        Ok(())
    }
}

/// Remote surface of an audio effect plugin.
pub trait DspProvider: Send + Sync {
    fn set_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()>;

    fn set_audio_socket_name(&self, name: &str) -> RemoteResult<()>;

    fn shutdown(&self) -> RemoteResult<()> {
        Ok(())
    }
}

/// Notifications a content provider pushes to the host.
pub trait ProviderCallback: Send + Sync {
    fn on_logged_in(&self, provider: &ProviderIdentifier, success: bool);

    fn on_logged_out(&self, provider: &ProviderIdentifier);

    fn on_song_update(&self, provider: &ProviderIdentifier, song: Song);

    fn on_album_update(&self, provider: &ProviderIdentifier, album: Album);

    fn on_artist_update(&self, provider: &ProviderIdentifier, artist: Artist);

    fn on_genre_update(&self, provider: &ProviderIdentifier, genre: Genre);

    fn on_playlist_added_or_updated(&self, provider: &ProviderIdentifier, playlist: Playlist);

    fn on_playlist_removed(&self, provider: &ProviderIdentifier, reference: &str);

    fn on_search_result(&self, provider: &ProviderIdentifier, result: SearchResult);

    fn on_song_playing(&self, provider: &ProviderIdentifier);

    fn on_song_paused(&self, provider: &ProviderIdentifier);

    fn on_track_ended(&self, provider: &ProviderIdentifier);
}
