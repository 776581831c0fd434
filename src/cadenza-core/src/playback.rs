use crate::identifier::ProviderIdentifier;
use crate::models::{Album, Playlist, Song};
use crate::provider::RemoteResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Buffering,
    Playing,
    Paused,
}

impl PlaybackState {
    /// The engine may be released when nothing is audible or about to be.
    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Listener for engine-side playback changes.
pub trait PlaybackCallback: Send + Sync {
    fn on_state_changed(&self, state: PlaybackState);

    fn on_track_changed(&self, song: Option<&Song>);

    fn on_queue_changed(&self) {}
}

/// Identity comparison for registered callbacks.
pub fn same_callback(a: &Arc<dyn PlaybackCallback>, b: &Arc<dyn PlaybackCallback>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Resolves queued references to songs.
pub trait SongSource: Send + Sync {
    fn song(&self, reference: &str, provider: &ProviderIdentifier) -> Option<Song>;
}

/// Control surface of the playback engine.
pub trait PlaybackService: Send + Sync {
    fn play(&self) -> RemoteResult<()>;
    fn pause(&self) -> RemoteResult<()>;
    fn stop(&self) -> RemoteResult<()>;

    fn play_song(&self, song: &Song) -> RemoteResult<()>;
    fn play_album(&self, album: &Album) -> RemoteResult<()>;
    fn play_playlist(&self, playlist: &Playlist) -> RemoteResult<()>;
    fn play_at_index(&self, index: usize) -> RemoteResult<()>;
    fn clear_queue(&self) -> RemoteResult<()>;

    fn queue_song(&self, song: &Song, top: bool) -> RemoteResult<()>;
    fn queue_album(&self, album: &Album, top: bool) -> RemoteResult<()>;
    fn queue_playlist(&self, playlist: &Playlist, top: bool) -> RemoteResult<()>;
    fn play_next(&self, song: &Song) -> RemoteResult<()>;

    fn seek(&self, position_ms: u64) -> RemoteResult<()>;
    fn next(&self) -> RemoteResult<()>;
    fn previous(&self) -> RemoteResult<()>;

    fn set_dsp_chain(&self, chain: &[ProviderIdentifier]) -> RemoteResult<()>;
    fn set_repeat_mode(&self, repeat: bool) -> RemoteResult<()>;
    fn set_shuffle_mode(&self, shuffle: bool) -> RemoteResult<()>;

    fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> RemoteResult<()>;
    fn remove_callback(&self, callback: &Arc<dyn PlaybackCallback>) -> RemoteResult<()>;

    fn state(&self) -> RemoteResult<PlaybackState>;
    fn current_track(&self) -> RemoteResult<Option<Song>>;
    fn current_queue(&self) -> RemoteResult<Vec<Song>>;
    fn dsp_chain(&self) -> RemoteResult<Vec<ProviderIdentifier>>;
    fn is_repeat_mode(&self) -> RemoteResult<bool>;
    fn is_shuffle_mode(&self) -> RemoteResult<bool>;

    fn shutdown(&self) -> RemoteResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl PlaybackCallback for Quiet {
        fn on_state_changed(&self, _state: PlaybackState) {}
        fn on_track_changed(&self, _song: Option<&Song>) {}
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let a: Arc<dyn PlaybackCallback> = Arc::new(Quiet);
        let b: Arc<dyn PlaybackCallback> = Arc::new(Quiet);
        assert!(same_callback(&a, &a.clone()));
        assert!(!same_callback(&a, &b));
    }

    #[test]
    fn paused_and_stopped_are_idle() {
        assert!(PlaybackState::Paused.is_idle());
        assert!(PlaybackState::Stopped.is_idle());
        assert!(!PlaybackState::Buffering.is_idle());
        assert!(!PlaybackState::Playing.is_idle());
    }
}
