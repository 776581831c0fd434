use crate::{Placement, Player};
use cadenza_core::{
    same_callback, Album, PlaybackCallback, PlaybackService, PlaybackState, Playlist,
    ProviderIdentifier, RemoteResult, Song, SongSource,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct EngineState {
    player: Player,
    shuffle: bool,
    dsp_chain: Vec<ProviderIdentifier>,
}

/// What changed while the state lock was held.
#[derive(Default)]
struct Changes {
    state: Option<PlaybackState>,
    track: Option<Option<Song>>,
    queue: bool,
}

/// In-process playback engine.
///
/// Keeps a queue and a transport state machine and tells registered
/// callbacks about every state, track and queue change. Audio output is out
/// of scope; this is the engine the host drives when no external engine is
/// installed.
#[derive(Default)]
pub struct LocalPlaybackEngine {
    state: Mutex<EngineState>,
    callbacks: Mutex<Vec<Arc<dyn PlaybackCallback>>>,
    songs: Option<Arc<dyn SongSource>>,
}

impl LocalPlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves album and playlist members through `songs`.
    pub fn with_song_source(songs: Arc<dyn SongSource>) -> Self {
        Self {
            songs: Some(songs),
            ..Self::default()
        }
    }

    pub fn position_ms(&self) -> u64 {
        self.state.lock().player.position_ms()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn resolve(&self, references: &[String], provider: &ProviderIdentifier) -> Vec<Song> {
        references
            .iter()
            .map(|reference| {
                self.songs
                    .as_ref()
                    .and_then(|source| source.song(reference, provider))
                    .unwrap_or_else(|| Song::placeholder(reference.as_str(), provider.clone()))
            })
            .collect()
    }

    /// Applies `op` under the state lock and notifies callbacks afterwards.
    fn mutate(&self, op: impl FnOnce(&mut EngineState)) {
        let changes = {
            let mut state = self.state.lock();
            let before_state = state.player.state();
            let before_track = state.player.current().map(|item| item.id);
            let before_len = state.player.queue().len();

            op(&mut state);

            let mut changes = Changes::default();
            if state.player.state() != before_state {
                changes.state = Some(state.player.state());
            }
            if state.player.current().map(|item| item.id) != before_track {
                changes.track = Some(state.player.current().map(|item| item.song.clone()));
            }
            changes.queue = state.player.queue().len() != before_len;
            changes
        };
        self.notify(changes);
    }

    fn notify(&self, changes: Changes) {
        if changes.state.is_none() && changes.track.is_none() && !changes.queue {
            return;
        }
        let callbacks = self.callbacks.lock().clone();
        for callback in &callbacks {
            if let Some(track) = &changes.track {
                callback.on_track_changed(track.as_ref());
            }
            if let Some(state) = changes.state {
                callback.on_state_changed(state);
            }
            if changes.queue {
                callback.on_queue_changed();
            }
        }
        if let Some(state) = changes.state {
            tracing::debug!(%state, "local playback state changed");
        }
    }

    fn enqueue(&self, songs: Vec<Song>, top: bool) {
        let placement = if top { Placement::Top } else { Placement::Bottom };
        self.mutate(|state| {
            state.player.queue_mut().add(songs, placement);
        });
    }

    fn replace_and_play(&self, songs: Vec<Song>) {
        self.mutate(|state| {
            let shuffle = state.shuffle;
            let queue = state.player.queue_mut();
            queue.replace(songs);
            if shuffle {
                queue.shuffle();
            }
            state.player.play_index(0);
        });
    }
}

impl PlaybackService for LocalPlaybackEngine {
    fn play(&self) -> RemoteResult<()> {
        self.mutate(|state| {
            state.player.play();
        });
        Ok(())
    }

    fn pause(&self) -> RemoteResult<()> {
        self.mutate(|state| {
            state.player.pause();
        });
        Ok(())
    }

    fn stop(&self) -> RemoteResult<()> {
        self.mutate(|state| state.player.stop());
        Ok(())
    }

    fn play_song(&self, song: &Song) -> RemoteResult<()> {
        let song = song.clone();
        self.mutate(|state| {
            state.player.queue_mut().add([song], Placement::Top);
            state.player.play_index(0);
        });
        Ok(())
    }

    fn play_album(&self, album: &Album) -> RemoteResult<()> {
        let songs = self.resolve(&album.songs, &album.meta.provider);
        self.replace_and_play(songs);
        Ok(())
    }

    fn play_playlist(&self, playlist: &Playlist) -> RemoteResult<()> {
        let songs = self.resolve(&playlist.songs, &playlist.meta.provider);
        self.replace_and_play(songs);
        Ok(())
    }

    fn play_at_index(&self, index: usize) -> RemoteResult<()> {
        self.mutate(|state| {
            if state.player.play_index(index).is_none() {
                tracing::debug!(index, "play_at_index out of range");
            }
        });
        Ok(())
    }

    fn clear_queue(&self) -> RemoteResult<()> {
        self.mutate(|state| {
            state.player.stop();
            state.player.queue_mut().clear();
        });
        Ok(())
    }

    fn queue_song(&self, song: &Song, top: bool) -> RemoteResult<()> {
        self.enqueue(vec![song.clone()], top);
        Ok(())
    }

    fn queue_album(&self, album: &Album, top: bool) -> RemoteResult<()> {
        self.enqueue(self.resolve(&album.songs, &album.meta.provider), top);
        Ok(())
    }

    fn queue_playlist(&self, playlist: &Playlist, top: bool) -> RemoteResult<()> {
        self.enqueue(self.resolve(&playlist.songs, &playlist.meta.provider), top);
        Ok(())
    }

    fn play_next(&self, song: &Song) -> RemoteResult<()> {
        let song = song.clone();
        self.mutate(|state| {
            state.player.queue_mut().add([song], Placement::Next);
        });
        Ok(())
    }

    fn seek(&self, position_ms: u64) -> RemoteResult<()> {
        self.state.lock().player.seek(position_ms);
        Ok(())
    }

    fn next(&self) -> RemoteResult<()> {
        self.mutate(|state| {
            state.player.skip_next();
        });
        Ok(())
    }

    fn previous(&self) -> RemoteResult<()> {
        self.mutate(|state| {
            state.player.skip_previous();
        });
        Ok(())
    }

    fn set_dsp_chain(&self, chain: &[ProviderIdentifier]) -> RemoteResult<()> {
        self.state.lock().dsp_chain = chain.to_vec();
        Ok(())
    }

    fn set_repeat_mode(&self, repeat: bool) -> RemoteResult<()> {
        self.state.lock().player.set_repeat(repeat);
        Ok(())
    }

    fn set_shuffle_mode(&self, shuffle: bool) -> RemoteResult<()> {
        let mut state = self.state.lock();
        if shuffle && !state.shuffle {
            state.player.queue_mut().shuffle();
        }
        state.shuffle = shuffle;
        Ok(())
    }

    fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> RemoteResult<()> {
        let mut callbacks = self.callbacks.lock();
        if !callbacks.iter().any(|known| same_callback(known, &callback)) {
            callbacks.push(callback);
        }
        Ok(())
    }

    fn remove_callback(&self, callback: &Arc<dyn PlaybackCallback>) -> RemoteResult<()> {
        self.callbacks
            .lock()
            .retain(|known| !same_callback(known, callback));
        Ok(())
    }

    fn state(&self) -> RemoteResult<PlaybackState> {
        Ok(self.state.lock().player.state())
    }

    fn current_track(&self) -> RemoteResult<Option<Song>> {
        Ok(self
            .state
            .lock()
            .player
            .current()
            .map(|item| item.song.clone()))
    }

    fn current_queue(&self) -> RemoteResult<Vec<Song>> {
        Ok(self.state.lock().player.queue().songs())
    }

    fn dsp_chain(&self) -> RemoteResult<Vec<ProviderIdentifier>> {
        Ok(self.state.lock().dsp_chain.clone())
    }

    fn is_repeat_mode(&self) -> RemoteResult<bool> {
        Ok(self.state.lock().player.is_repeat())
    }

    fn is_shuffle_mode(&self) -> RemoteResult<bool> {
        Ok(self.state.lock().shuffle)
    }

    fn shutdown(&self) -> RemoteResult<()> {
        self.mutate(|state| state.player.stop());
        self.callbacks.lock().clear();
        Ok(())
    }
}
