use cadenza_core::{
    same_callback, Album, PlaybackCallback, PlaybackService, PlaybackState, Playlist,
    ProviderIdentifier, RemoteError, RemoteResult, Song,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the playback engine the proxy forwards to.
///
/// `connect_engine` must not block; readiness is reported back through an
/// [`EngineReadyHandle`]. `engine_failed` drops an engine that returned a
/// transport failure so the next command connects a fresh one.
pub trait EngineResolver: Send + Sync {
    fn connected_engine(&self) -> Option<Arc<dyn PlaybackService>>;
    fn connect_engine(&self);
    fn engine_failed(&self, engine: &Arc<dyn PlaybackService>);
}

/// One queued playback-control call.
#[derive(Clone)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Stop,
    PlaySong(Song),
    PlayAlbum(Album),
    PlayPlaylist(Playlist),
    PlayAtIndex(usize),
    ClearQueue,
    QueueSong { song: Song, top: bool },
    QueueAlbum { album: Album, top: bool },
    QueuePlaylist { playlist: Playlist, top: bool },
    PlayNext(Song),
    Seek(u64),
    Next,
    Previous,
    SetDspChain(Vec<ProviderIdentifier>),
    SetRepeatMode(bool),
    SetShuffleMode(bool),
    AddCallback(Arc<dyn PlaybackCallback>),
    RemoveCallback(Arc<dyn PlaybackCallback>),
}

impl PlaybackCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Stop => "stop",
            PlaybackCommand::PlaySong(_) => "play_song",
            PlaybackCommand::PlayAlbum(_) => "play_album",
            PlaybackCommand::PlayPlaylist(_) => "play_playlist",
            PlaybackCommand::PlayAtIndex(_) => "play_at_index",
            PlaybackCommand::ClearQueue => "clear_queue",
            PlaybackCommand::QueueSong { .. } => "queue_song",
            PlaybackCommand::QueueAlbum { .. } => "queue_album",
            PlaybackCommand::QueuePlaylist { .. } => "queue_playlist",
            PlaybackCommand::PlayNext(_) => "play_next",
            PlaybackCommand::Seek(_) => "seek",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Previous => "previous",
            PlaybackCommand::SetDspChain(_) => "set_dsp_chain",
            PlaybackCommand::SetRepeatMode(_) => "set_repeat_mode",
            PlaybackCommand::SetShuffleMode(_) => "set_shuffle_mode",
            PlaybackCommand::AddCallback(_) => "add_callback",
            PlaybackCommand::RemoveCallback(_) => "remove_callback",
        }
    }

    fn is_registration(&self) -> bool {
        matches!(
            self,
            PlaybackCommand::AddCallback(_) | PlaybackCommand::RemoveCallback(_)
        )
    }

    fn apply(&self, engine: &dyn PlaybackService) -> RemoteResult<()> {
        match self {
            PlaybackCommand::Play => engine.play(),
            PlaybackCommand::Pause => engine.pause(),
            PlaybackCommand::Stop => engine.stop(),
            PlaybackCommand::PlaySong(song) => engine.play_song(song),
            PlaybackCommand::PlayAlbum(album) => engine.play_album(album),
            PlaybackCommand::PlayPlaylist(playlist) => engine.play_playlist(playlist),
            PlaybackCommand::PlayAtIndex(index) => engine.play_at_index(*index),
            PlaybackCommand::ClearQueue => engine.clear_queue(),
            PlaybackCommand::QueueSong { song, top } => engine.queue_song(song, *top),
            PlaybackCommand::QueueAlbum { album, top } => engine.queue_album(album, *top),
            PlaybackCommand::QueuePlaylist { playlist, top } => {
                engine.queue_playlist(playlist, *top)
            }
            PlaybackCommand::PlayNext(song) => engine.play_next(song),
            PlaybackCommand::Seek(position) => engine.seek(*position),
            PlaybackCommand::Next => engine.next(),
            PlaybackCommand::Previous => engine.previous(),
            PlaybackCommand::SetDspChain(chain) => engine.set_dsp_chain(chain),
            PlaybackCommand::SetRepeatMode(repeat) => engine.set_repeat_mode(*repeat),
            PlaybackCommand::SetShuffleMode(shuffle) => engine.set_shuffle_mode(*shuffle),
            PlaybackCommand::AddCallback(callback) => engine.add_callback(callback.clone()),
            PlaybackCommand::RemoveCallback(callback) => engine.remove_callback(callback),
        }
    }
}

enum ProxyMessage {
    Command(PlaybackCommand),
    EngineReady,
    Shutdown,
}

/// Signals the proxy that its engine finished connecting.
#[derive(Clone)]
pub struct EngineReadyHandle {
    tx: Sender<ProxyMessage>,
}

impl EngineReadyHandle {
    pub fn notify(&self) {
        let _ = self.tx.send(ProxyMessage::EngineReady);
    }
}

/// Serializes playback control onto one worker thread.
///
/// Every command returns as soon as it is queued. The worker forwards
/// commands in submission order; while the engine is not connected it asks the
/// resolver to connect and holds the head of the queue until the engine is
/// ready or the connect timeout expires.
pub struct CommandProxy {
    tx: Sender<ProxyMessage>,
    resolver: Arc<dyn EngineResolver>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandProxy {
    pub fn new(resolver: Arc<dyn EngineResolver>) -> std::io::Result<Self> {
        Self::with_timeout(resolver, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(
        resolver: Arc<dyn EngineResolver>,
        connect_timeout: Duration,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Worker {
            rx,
            resolver: resolver.clone(),
            connect_timeout,
            pending: VecDeque::new(),
            callbacks: Vec::new(),
            head_deadline: None,
            head_retried: false,
        };
        let join = thread::Builder::new()
            .name("playback-proxy".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            resolver,
            worker: Mutex::new(Some(join)),
        })
    }

    pub fn ready_handle(&self) -> EngineReadyHandle {
        EngineReadyHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn notify_engine_ready(&self) {
        self.ready_handle().notify();
    }

    pub fn is_engine_connected(&self) -> bool {
        self.resolver.connected_engine().is_some()
    }

    pub fn submit(&self, command: PlaybackCommand) -> RemoteResult<()> {
        self.tx
            .send(ProxyMessage::Command(command))
            .map_err(|_| RemoteError::dead("playback proxy stopped"))
    }

    /// Stops the worker. Commands still waiting for an engine are dropped.
    pub fn close(&self) {
        let Some(join) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(ProxyMessage::Shutdown);
        if join.join().is_err() {
            tracing::error!("playback proxy worker panicked");
        }
    }

    /// Reads from the engine, answering the default when there is no engine
    /// or the call fails.
    fn query<T: Default>(
        &self,
        operation: &'static str,
        read: impl FnOnce(&dyn PlaybackService) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let Some(engine) = self.resolver.connected_engine() else {
            return Ok(T::default());
        };
        match read(engine.as_ref()) {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::debug!(operation, %error, "playback query failed; using default");
                if error.is_transport_failure() {
                    self.resolver.engine_failed(&engine);
                }
                Ok(T::default())
            }
        }
    }
}

impl Drop for CommandProxy {
    fn drop(&mut self) {
        self.close();
    }
}

impl PlaybackService for CommandProxy {
    fn play(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Play)
    }

    fn pause(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Pause)
    }

    fn stop(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Stop)
    }

    fn play_song(&self, song: &Song) -> RemoteResult<()> {
        self.submit(PlaybackCommand::PlaySong(song.clone()))
    }

    fn play_album(&self, album: &Album) -> RemoteResult<()> {
        self.submit(PlaybackCommand::PlayAlbum(album.clone()))
    }

    fn play_playlist(&self, playlist: &Playlist) -> RemoteResult<()> {
        self.submit(PlaybackCommand::PlayPlaylist(playlist.clone()))
    }

    fn play_at_index(&self, index: usize) -> RemoteResult<()> {
        self.submit(PlaybackCommand::PlayAtIndex(index))
    }

    fn clear_queue(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::ClearQueue)
    }

    fn queue_song(&self, song: &Song, top: bool) -> RemoteResult<()> {
        self.submit(PlaybackCommand::QueueSong {
            song: song.clone(),
            top,
        })
    }

    fn queue_album(&self, album: &Album, top: bool) -> RemoteResult<()> {
        self.submit(PlaybackCommand::QueueAlbum {
            album: album.clone(),
            top,
        })
    }

    fn queue_playlist(&self, playlist: &Playlist, top: bool) -> RemoteResult<()> {
        self.submit(PlaybackCommand::QueuePlaylist {
            playlist: playlist.clone(),
            top,
        })
    }

    fn play_next(&self, song: &Song) -> RemoteResult<()> {
        self.submit(PlaybackCommand::PlayNext(song.clone()))
    }

    fn seek(&self, position_ms: u64) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Seek(position_ms))
    }

    fn next(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Next)
    }

    fn previous(&self) -> RemoteResult<()> {
        self.submit(PlaybackCommand::Previous)
    }

    fn set_dsp_chain(&self, chain: &[ProviderIdentifier]) -> RemoteResult<()> {
        self.submit(PlaybackCommand::SetDspChain(chain.to_vec()))
    }

    fn set_repeat_mode(&self, repeat: bool) -> RemoteResult<()> {
        self.submit(PlaybackCommand::SetRepeatMode(repeat))
    }

    fn set_shuffle_mode(&self, shuffle: bool) -> RemoteResult<()> {
        self.submit(PlaybackCommand::SetShuffleMode(shuffle))
    }

    fn add_callback(&self, callback: Arc<dyn PlaybackCallback>) -> RemoteResult<()> {
        self.submit(PlaybackCommand::AddCallback(callback))
    }

    fn remove_callback(&self, callback: &Arc<dyn PlaybackCallback>) -> RemoteResult<()> {
        self.submit(PlaybackCommand::RemoveCallback(callback.clone()))
    }

    fn state(&self) -> RemoteResult<PlaybackState> {
        self.query("state", |engine| engine.state())
    }

    fn current_track(&self) -> RemoteResult<Option<Song>> {
        self.query("current_track", |engine| engine.current_track())
    }

    fn current_queue(&self) -> RemoteResult<Vec<Song>> {
        self.query("current_queue", |engine| engine.current_queue())
    }

    fn dsp_chain(&self) -> RemoteResult<Vec<ProviderIdentifier>> {
        self.query("dsp_chain", |engine| engine.dsp_chain())
    }

    fn is_repeat_mode(&self) -> RemoteResult<bool> {
        self.query("is_repeat_mode", |engine| engine.is_repeat_mode())
    }

    fn is_shuffle_mode(&self) -> RemoteResult<bool> {
        self.query("is_shuffle_mode", |engine| engine.is_shuffle_mode())
    }

    fn shutdown(&self) -> RemoteResult<()> {
        self.close();
        Ok(())
    }
}

struct Worker {
    rx: Receiver<ProxyMessage>,
    resolver: Arc<dyn EngineResolver>,
    connect_timeout: Duration,
    pending: VecDeque<PlaybackCommand>,
    /// Registered callbacks, replayed on every engine (re)connect.
    callbacks: Vec<Arc<dyn PlaybackCallback>>,
    head_deadline: Option<Instant>,
    /// The head already failed once on a dead engine.
    head_retried: bool,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(message) => {
                        if !self.handle(message) {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
            if !self.drain() {
                return;
            }
        }
    }

    /// Returns false on shutdown.
    fn handle(&mut self, message: ProxyMessage) -> bool {
        match message {
            ProxyMessage::Command(command) => self.pending.push_back(command),
            ProxyMessage::EngineReady => self.replay_callbacks(),
            ProxyMessage::Shutdown => return false,
        }
        true
    }

    /// Forwards queued commands until the queue is empty. Returns false on
    /// shutdown.
    fn drain(&mut self) -> bool {
        while let Some(head) = self.pending.front() {
            if head.is_registration() {
                if let Some(command) = self.pending.pop_front() {
                    self.register(command);
                }
                continue;
            }

            if let Some(engine) = self.resolver.connected_engine() {
                self.head_deadline = None;
                match head.apply(engine.as_ref()) {
                    Err(error) if error.is_transport_failure() && !self.head_retried => {
                        tracing::warn!(command = head.name(), %error, "playback engine died; reconnecting");
                        self.head_retried = true;
                        self.resolver.engine_failed(&engine);
                    }
                    result => {
                        if let Err(error) = result {
                            tracing::warn!(command = head.name(), %error, "playback command failed");
                        }
                        self.pending.pop_front();
                        self.head_retried = false;
                    }
                }
                continue;
            }

            let deadline = match self.head_deadline {
                Some(deadline) => deadline,
                None => {
                    tracing::debug!(command = head.name(), "playback engine not connected; connecting");
                    self.resolver.connect_engine();
                    let deadline = Instant::now() + self.connect_timeout;
                    self.head_deadline = Some(deadline);
                    deadline
                }
            };

            match self
                .rx
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            {
                Ok(message) => {
                    if !self.handle(message) {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.head_deadline = None;
                    self.head_retried = false;
                    if let Some(command) = self.pending.pop_front() {
                        tracing::warn!(
                            command = command.name(),
                            timeout_ms = self.connect_timeout.as_millis() as u64,
                            "playback engine did not connect; dropping command"
                        );
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn register(&mut self, command: PlaybackCommand) {
        let engine = self.resolver.connected_engine();
        match &command {
            PlaybackCommand::AddCallback(callback) => {
                if !self.callbacks.iter().any(|known| same_callback(known, callback)) {
                    self.callbacks.push(callback.clone());
                }
            }
            PlaybackCommand::RemoveCallback(callback) => {
                self.callbacks.retain(|known| !same_callback(known, callback));
            }
            _ => {}
        }
        match engine {
            Some(engine) => {
                if let Err(error) = command.apply(engine.as_ref()) {
                    tracing::warn!(command = command.name(), %error, "callback registration failed");
                }
            }
            None => tracing::trace!(command = command.name(), "buffered until engine is ready"),
        }
    }

    fn replay_callbacks(&mut self) {
        let Some(engine) = self.resolver.connected_engine() else {
            tracing::debug!("engine ready signal without a connected engine");
            return;
        };
        tracing::debug!(count = self.callbacks.len(), "replaying playback callbacks");
        for callback in &self.callbacks {
            if let Err(error) = engine.add_callback(callback.clone()) {
                tracing::warn!(%error, "callback replay failed");
            }
        }
    }
}
