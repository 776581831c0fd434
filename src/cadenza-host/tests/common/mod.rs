#![allow(dead_code)]

use cadenza_core::{
    Album, AggregatorConfig, Artist, EntityMeta, MusicProvider, Playlist, ProviderCallback,
    ProviderIdentifier, RemoteError, RemoteResult, SearchResult, Song,
};
use cadenza_host::{Aggregator, EventBus, NetworkMonitor, AlwaysOnline};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub fn id(name: &str) -> ProviderIdentifier {
    ProviderIdentifier::new("org.example", name, name)
}

pub fn song(reference: &str, provider: &ProviderIdentifier) -> Song {
    Song {
        meta: EntityMeta::loaded(reference, provider.clone()),
        title: format!("Title of {reference}"),
        artist: None,
        album: None,
        duration_ms: 180_000,
        year: Some(1999),
        available: true,
    }
}

pub fn album(reference: &str, provider: &ProviderIdentifier, songs: &[&str]) -> Album {
    Album {
        meta: EntityMeta::loaded(reference, provider.clone()),
        name: format!("Album {reference}"),
        year: None,
        songs: songs.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn artist(reference: &str, provider: &ProviderIdentifier) -> Artist {
    Artist {
        meta: EntityMeta::loaded(reference, provider.clone()),
        name: format!("Artist {reference}"),
        albums: Vec::new(),
    }
}

pub fn playlist(reference: &str, provider: &ProviderIdentifier, songs: &[&str]) -> Playlist {
    Playlist {
        meta: EntityMeta::loaded(reference, provider.clone()),
        name: format!("Playlist {reference}"),
        songs: songs.iter().map(|s| s.to_string()).collect(),
        offline_capable: false,
    }
}

pub fn aggregator_with(debounce_ms: u64, page_size: usize) -> Arc<Aggregator> {
    let config = AggregatorConfig {
        debounce_ms,
        sync_page_size: page_size,
        start_offline: false,
    };
    let network: Arc<dyn NetworkMonitor> = Arc::new(AlwaysOnline);
    Aggregator::new(&config, EventBus::new(), network).unwrap()
}

pub fn aggregator() -> Arc<Aggregator> {
    aggregator_with(200, 100)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// In-process content provider that records every call.
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<String>>,
    callback: Mutex<Option<Arc<dyn ProviderCallback>>>,
    identifier: Mutex<Option<ProviderIdentifier>>,
    songs: Mutex<Vec<Song>>,
    albums: Mutex<Vec<Album>>,
    artists: Mutex<Vec<Artist>>,
    playlists: Mutex<Vec<Playlist>>,
    prefixes: Mutex<Vec<String>>,
    page_requests: Mutex<Vec<(usize, usize)>>,
    max_page: Mutex<Option<usize>>,
    offline: Mutex<Vec<bool>>,
    searches: Mutex<Vec<String>>,
    socket_names: Mutex<Vec<String>>,
    setup: AtomicBool,
    authenticated: AtomicBool,
    dead: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ready() -> Arc<Self> {
        let fake = Self::default();
        fake.setup.store(true, Ordering::SeqCst);
        fake.authenticated.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn set_setup(&self, setup: bool) {
        self.setup.store(setup, Ordering::SeqCst);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn revive(&self) {
        self.dead.store(false, Ordering::SeqCst);
    }

    pub fn set_max_page(&self, max: usize) {
        *self.max_page.lock() = Some(max);
    }

    pub fn set_prefixes(&self, prefixes: &[&str]) {
        *self.prefixes.lock() = prefixes.iter().map(|p| p.to_string()).collect();
    }

    pub fn add_song(&self, song: Song) {
        self.songs.lock().push(song);
    }

    pub fn add_album(&self, album: Album) {
        self.albums.lock().push(album);
    }

    pub fn add_artist(&self, artist: Artist) {
        self.artists.lock().push(artist);
    }

    pub fn add_playlist(&self, playlist: Playlist) {
        self.playlists.lock().push(playlist);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    pub fn page_requests(&self) -> Vec<(usize, usize)> {
        self.page_requests.lock().clone()
    }

    pub fn offline_modes(&self) -> Vec<bool> {
        self.offline.lock().clone()
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().clone()
    }

    pub fn socket_names(&self) -> Vec<String> {
        self.socket_names.lock().clone()
    }

    pub fn identifier(&self) -> Option<ProviderIdentifier> {
        self.identifier.lock().clone()
    }

    pub fn callback(&self) -> Option<Arc<dyn ProviderCallback>> {
        self.callback.lock().clone()
    }

    /// Pushes a search result through the registered callback.
    pub fn answer_search(&self, provider: &ProviderIdentifier, query: &str, songs: &[&str]) {
        let result = SearchResult {
            query: query.into(),
            identifier: provider.clone(),
            songs: songs.iter().map(|s| s.to_string()).collect(),
            ..SearchResult::default()
        };
        if let Some(callback) = self.callback() {
            callback.on_search_result(provider, result);
        }
    }

    fn record(&self, call: impl Into<String>) -> RemoteResult<()> {
        let call = call.into();
        self.calls.lock().push(call);
        if self.dead.load(Ordering::SeqCst) {
            return Err(RemoteError::dead("fake provider killed"));
        }
        Ok(())
    }

    fn lookup<T: Clone>(list: &Mutex<Vec<T>>, matches: impl Fn(&T) -> bool) -> Option<T> {
        list.lock().iter().find(|item| matches(item)).cloned()
    }
}

impl MusicProvider for FakeProvider {
    fn set_identifier(&self, identifier: &ProviderIdentifier) -> RemoteResult<()> {
        self.record("set_identifier")?;
        *self.identifier.lock() = Some(identifier.clone());
        Ok(())
    }

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> RemoteResult<()> {
        self.record("register_callback")?;
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn unregister_callback(&self) -> RemoteResult<()> {
        self.callback.lock().take();
        self.record("unregister_callback")
    }

    fn is_setup(&self) -> RemoteResult<bool> {
        self.record("is_setup")?;
        Ok(self.setup.load(Ordering::SeqCst))
    }

    fn login(&self) -> RemoteResult<bool> {
        self.record("login")?;
        Ok(true)
    }

    fn is_authenticated(&self) -> RemoteResult<bool> {
        self.record("is_authenticated")?;
        Ok(self.authenticated.load(Ordering::SeqCst))
    }

    fn get_albums(&self) -> RemoteResult<Vec<Album>> {
        self.record("get_albums")?;
        Ok(self.albums.lock().clone())
    }

    fn get_artists(&self) -> RemoteResult<Vec<Artist>> {
        self.record("get_artists")?;
        Ok(self.artists.lock().clone())
    }

    fn get_songs(&self, offset: usize, limit: usize) -> RemoteResult<Vec<Song>> {
        self.record("get_songs")?;
        self.page_requests.lock().push((offset, limit));
        if self.max_page.lock().is_some_and(|max| limit > max) {
            return Err(RemoteError::PayloadTooLarge);
        }
        Ok(self
            .songs
            .lock()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_playlists(&self) -> RemoteResult<Vec<Playlist>> {
        self.record("get_playlists")?;
        Ok(self.playlists.lock().clone())
    }

    fn get_song(&self, reference: &str) -> RemoteResult<Option<Song>> {
        self.record(format!("get_song {reference}"))?;
        Ok(Self::lookup(&self.songs, |s| s.meta.reference == reference))
    }

    fn get_album(&self, reference: &str) -> RemoteResult<Option<Album>> {
        self.record(format!("get_album {reference}"))?;
        Ok(Self::lookup(&self.albums, |a| a.meta.reference == reference))
    }

    fn get_artist(&self, reference: &str) -> RemoteResult<Option<Artist>> {
        self.record(format!("get_artist {reference}"))?;
        Ok(Self::lookup(&self.artists, |a| a.meta.reference == reference))
    }

    fn get_playlist(&self, reference: &str) -> RemoteResult<Option<Playlist>> {
        self.record(format!("get_playlist {reference}"))?;
        Ok(Self::lookup(&self.playlists, |p| p.meta.reference == reference))
    }

    fn get_supported_rosetta_prefix(&self) -> RemoteResult<Vec<String>> {
        self.record("get_supported_rosetta_prefix")?;
        Ok(self.prefixes.lock().clone())
    }

    fn set_audio_socket_name(&self, name: &str) -> RemoteResult<()> {
        self.record("set_audio_socket_name")?;
        self.socket_names.lock().push(name.to_string());
        Ok(())
    }

    fn set_offline_mode(&self, offline: bool) -> RemoteResult<()> {
        self.record("set_offline_mode")?;
        self.offline.lock().push(offline);
        Ok(())
    }

    fn start_search(&self, query: &str) -> RemoteResult<()> {
        self.record("start_search")?;
        self.searches.lock().push(query.to_string());
        Ok(())
    }

    fn shutdown(&self) -> RemoteResult<()> {
        self.record("shutdown")
    }
}
