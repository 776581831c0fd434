//! Reconciles catalog data pushed and pulled from every registered provider.

use crate::cache::{Cached, Outcome, ProviderCache};
use crate::debouncer::Debouncer;
use crate::events::{EventBus, LibraryEvent, ProviderPlayback};
use crate::network::NetworkMonitor;
use crate::rosetta::RosettaStone;
use crate::search::SearchCache;
use cadenza_core::{
    AggregatorConfig, Album, Artist, CatalogEntity, Genre, Handle, MusicProvider, Playlist,
    ProviderCallback, ProviderIdentifier, RemoteError, RemoteResult, SearchResult, Song,
    SongSource,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Told when a registered provider fails a call with a transport error.
pub trait ProviderDeathListener: Send + Sync {
    fn on_provider_dead(&self, identifier: &ProviderIdentifier);
}

struct Registered {
    identifier: ProviderIdentifier,
    provider: Arc<dyn MusicProvider>,
}

struct PendingBatches {
    songs: Debouncer<Handle<Song>>,
    albums: Debouncer<Handle<Album>>,
    artists: Debouncer<Handle<Artist>>,
    playlists: Debouncer<Handle<Playlist>>,
    genres: Debouncer<Handle<Genre>>,
}

impl PendingBatches {
    fn new(bus: &EventBus, delay: Duration) -> std::io::Result<Self> {
        Ok(Self {
            songs: batch(bus, "songs", delay, LibraryEvent::SongsUpdated)?,
            albums: batch(bus, "albums", delay, LibraryEvent::AlbumsUpdated)?,
            artists: batch(bus, "artists", delay, LibraryEvent::ArtistsUpdated)?,
            playlists: batch(bus, "playlists", delay, LibraryEvent::PlaylistsUpdated)?,
            genres: batch(bus, "genres", delay, LibraryEvent::GenresUpdated)?,
        })
    }
}

fn batch<T: CatalogEntity>(
    bus: &EventBus,
    label: &str,
    delay: Duration,
    wrap: fn(Vec<Handle<T>>) -> LibraryEvent,
) -> std::io::Result<Debouncer<Handle<T>>> {
    let bus = bus.clone();
    Debouncer::new(label, delay, move |items: Vec<Handle<T>>| {
        let mut seen = HashSet::new();
        let unique: Vec<_> = items
            .into_iter()
            .filter(|handle| seen.insert(handle.read().reference().to_string()))
            .collect();
        tracing::trace!(kind = %T::KIND, count = unique.len(), "publishing batched update");
        bus.publish(wrap(unique));
    })
}

/// Callback sink for every content provider and the single source of truth
/// for the merged catalog.
///
/// Incoming entities are reconciled against the [`ProviderCache`]; changes are
/// batched per entity type and published on the [`EventBus`]. A provider that
/// fails with a transport error is unregistered and its cache entries purged.
pub struct Aggregator {
    cache: ProviderCache,
    bus: EventBus,
    rosetta: RosettaStone,
    search: SearchCache,
    network: Arc<dyn NetworkMonitor>,
    providers: RwLock<Vec<Registered>>,
    user_offline: AtomicBool,
    page_size: usize,
    pending: PendingBatches,
    death_listener: RwLock<Option<Weak<dyn ProviderDeathListener>>>,
}

impl Aggregator {
    pub fn new(
        config: &AggregatorConfig,
        bus: EventBus,
        network: Arc<dyn NetworkMonitor>,
    ) -> std::io::Result<Arc<Self>> {
        let pending = PendingBatches::new(&bus, config.debounce())?;
        Ok(Arc::new(Self {
            cache: ProviderCache::new(),
            bus,
            rosetta: RosettaStone::new(),
            search: SearchCache::new(),
            network,
            providers: RwLock::new(Vec::new()),
            user_offline: AtomicBool::new(config.start_offline),
            page_size: config.sync_page_size.max(1),
            pending,
            death_listener: RwLock::new(None),
        }))
    }

    pub fn cache(&self) -> &ProviderCache {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // Provider bookkeeping

    /// Starts aggregating `provider`. Re-registering an identifier replaces
    /// the previous call surface.
    pub fn register_provider(
        self: &Arc<Self>,
        identifier: ProviderIdentifier,
        provider: Arc<dyn MusicProvider>,
    ) {
        {
            let mut providers = self.providers.write();
            providers.retain(|r| r.identifier != identifier);
            providers.push(Registered {
                identifier: identifier.clone(),
                provider: Arc::clone(&provider),
            });
        }
        tracing::info!(provider = %identifier, "provider registered");

        let callback: Arc<dyn ProviderCallback> = self.clone();
        if self
            .guarded(&identifier, "register_callback", provider.register_callback(callback))
            .is_none()
        {
            return;
        }
        if let Some(prefixes) = self.guarded(
            &identifier,
            "get_supported_rosetta_prefix",
            provider.get_supported_rosetta_prefix(),
        ) {
            self.rosetta.register(&identifier, &prefixes);
        }
        if self.is_offline() {
            self.guarded(&identifier, "set_offline_mode", provider.set_offline_mode(true));
        }
        self.bus
            .publish(LibraryEvent::ProviderRegistered(identifier));
    }

    /// Stops aggregating `identifier` and forgets everything it supplied.
    pub fn unregister_provider(&self, identifier: &ProviderIdentifier) -> bool {
        let removed = {
            let mut providers = self.providers.write();
            providers
                .iter()
                .position(|r| &r.identifier == identifier)
                .map(|index| providers.remove(index))
        };
        let Some(removed) = removed else {
            return false;
        };

        if let Err(error) = removed.provider.unregister_callback() {
            tracing::debug!(provider = %identifier, %error, "unregister_callback failed");
        }
        self.rosetta.remove_provider(identifier);
        let purged = self.cache.purge_for_provider(identifier);
        tracing::info!(provider = %identifier, purged, "provider unregistered");
        self.bus
            .publish(LibraryEvent::ProviderRemoved(identifier.clone()));
        true
    }

    pub fn set_death_listener(&self, listener: Weak<dyn ProviderDeathListener>) {
        *self.death_listener.write() = Some(listener);
    }

    pub fn is_registered(&self, identifier: &ProviderIdentifier) -> bool {
        self.providers
            .read()
            .iter()
            .any(|r| &r.identifier == identifier)
    }

    pub fn providers(&self) -> Vec<ProviderIdentifier> {
        self.providers
            .read()
            .iter()
            .map(|r| r.identifier.clone())
            .collect()
    }

    fn provider(&self, identifier: &ProviderIdentifier) -> Option<Arc<dyn MusicProvider>> {
        self.providers
            .read()
            .iter()
            .find(|r| &r.identifier == identifier)
            .map(|r| Arc::clone(&r.provider))
    }

    fn snapshot(&self) -> Vec<(ProviderIdentifier, Arc<dyn MusicProvider>)> {
        self.providers
            .read()
            .iter()
            .map(|r| (r.identifier.clone(), Arc::clone(&r.provider)))
            .collect()
    }

    /// Handles a failed remote call. Transport failures unregister the
    /// provider and tell the death listener; everything else is logged.
    pub fn report_failure(
        &self,
        identifier: &ProviderIdentifier,
        operation: &str,
        error: &RemoteError,
    ) {
        match error {
            RemoteError::Dead { .. } => {
                tracing::warn!(provider = %identifier, operation, %error, "provider died");
                self.unregister_provider(identifier);
                let listener = self.death_listener.read().as_ref().and_then(Weak::upgrade);
                if let Some(listener) = listener {
                    listener.on_provider_dead(identifier);
                }
            }
            RemoteError::RateLimited | RemoteError::PayloadTooLarge => {
                tracing::debug!(provider = %identifier, operation, %error, "transient provider error");
            }
            RemoteError::NotSupported { .. } => {
                tracing::debug!(provider = %identifier, operation, "operation not supported");
            }
            RemoteError::Remote { .. } => {
                tracing::warn!(provider = %identifier, operation, %error, "provider call failed");
            }
        }
    }

    fn guarded<T>(
        &self,
        identifier: &ProviderIdentifier,
        operation: &str,
        result: RemoteResult<T>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.report_failure(identifier, operation, &error);
                None
            }
        }
    }

    // Reconciliation

    fn accept<T: Cached>(
        &self,
        provider: &ProviderIdentifier,
        mut entity: T,
    ) -> Option<(Handle<T>, Outcome)> {
        if entity.reference().is_empty() {
            tracing::warn!(kind = %T::KIND, provider = %provider, "dropping entity with empty reference");
            return None;
        }
        entity.meta_mut().provider = provider.clone();
        Some(self.cache.upsert(entity))
    }

    pub fn update_song(&self, provider: &ProviderIdentifier, song: Song) -> Option<Handle<Song>> {
        let (handle, outcome) = self.accept(provider, song)?;
        if outcome.changed() {
            self.pending.songs.push(handle.clone());
        }
        let first_load = match outcome {
            Outcome::Hydrated => true,
            Outcome::Inserted => handle.read().meta.is_loaded,
            Outcome::Updated | Outcome::Unchanged => false,
        };
        if first_load {
            self.link_song(&handle);
        }
        Some(handle)
    }

    pub fn update_album(&self, provider: &ProviderIdentifier, album: Album) -> Option<Handle<Album>> {
        let (handle, outcome) = self.accept(provider, album)?;
        if !outcome.changed() {
            return Some(handle);
        }
        self.pending.albums.push(handle.clone());

        let (album_ref, members) = {
            let album = handle.read();
            (album.meta.reference.clone(), album.songs.clone())
        };
        for song_ref in members {
            let Some(song) = self.cache.song(&song_ref) else {
                continue;
            };
            let (artist_ref, owner) = {
                let song = song.read();
                if !song.meta.is_loaded {
                    continue;
                }
                (song.artist.clone(), song.meta.provider.clone())
            };
            if let Some(artist) = artist_ref
                .filter(|r| !r.is_empty())
                .and_then(|r| self.retrieve_artist(&r, &owner))
            {
                self.link_artist_album(&artist, &album_ref);
            }
        }
        Some(handle)
    }

    pub fn update_artist(
        &self,
        provider: &ProviderIdentifier,
        artist: Artist,
    ) -> Option<Handle<Artist>> {
        let (handle, outcome) = self.accept(provider, artist)?;
        if outcome.changed() {
            self.pending.artists.push(handle.clone());
        }
        Some(handle)
    }

    pub fn update_genre(&self, provider: &ProviderIdentifier, genre: Genre) -> Option<Handle<Genre>> {
        let (handle, outcome) = self.accept(provider, genre)?;
        if outcome.changed() {
            self.pending.genres.push(handle.clone());
        }
        Some(handle)
    }

    /// Member songs of a changed playlist are resolved before the playlist is
    /// queued for notification.
    pub fn update_playlist(
        &self,
        provider: &ProviderIdentifier,
        playlist: Playlist,
    ) -> Option<Handle<Playlist>> {
        let (handle, outcome) = self.accept(provider, playlist)?;
        if outcome.changed() {
            let (members, owner) = {
                let playlist = handle.read();
                (playlist.songs.clone(), playlist.meta.provider.clone())
            };
            for song_ref in &members {
                self.retrieve_song(song_ref, &owner);
            }
            self.pending.playlists.push(handle.clone());
        }
        Some(handle)
    }

    /// Adds the song's album to its artist once the song is first loaded.
    fn link_song(&self, song: &Handle<Song>) {
        let (artist_ref, album_ref, owner) = {
            let song = song.read();
            (
                song.artist.clone().filter(|r| !r.is_empty()),
                song.album.clone().filter(|r| !r.is_empty()),
                song.meta.provider.clone(),
            )
        };
        let Some(artist_ref) = artist_ref else {
            return;
        };
        let artist = self.retrieve_artist(&artist_ref, &owner);
        let Some(album_ref) = album_ref else {
            return;
        };
        self.retrieve_album(&album_ref, &owner);
        if let Some(artist) = artist {
            self.link_artist_album(&artist, &album_ref);
        }
    }

    fn link_artist_album(&self, artist: &Handle<Artist>, album_ref: &str) {
        let added = artist.write().add_album(album_ref);
        if added {
            self.pending.artists.push(artist.clone());
        }
    }

    // Retrieval

    fn retrieve<T: Cached>(
        &self,
        reference: &str,
        provider: &ProviderIdentifier,
        operation: &str,
        fetch: impl FnOnce(&dyn MusicProvider, &str) -> RemoteResult<Option<T>>,
        ingest: impl FnOnce(&Self, &ProviderIdentifier, T) -> Option<Handle<T>>,
    ) -> Option<Handle<T>> {
        let cached = self.cache.get::<T>(reference);
        if cached.as_ref().is_some_and(|h| h.read().is_loaded()) {
            return cached;
        }
        let Some(remote) = self.provider(provider) else {
            return cached;
        };
        match self.guarded(provider, operation, fetch(remote.as_ref(), reference)) {
            Some(Some(entity)) => ingest(self, provider, entity).or(cached),
            _ => cached,
        }
    }

    /// Cached song, or the owning provider's answer when the cache only holds
    /// a placeholder.
    pub fn retrieve_song(&self, reference: &str, provider: &ProviderIdentifier) -> Option<Handle<Song>> {
        self.retrieve(
            reference,
            provider,
            "get_song",
            |remote, r| remote.get_song(r),
            Self::update_song,
        )
    }

    pub fn retrieve_album(
        &self,
        reference: &str,
        provider: &ProviderIdentifier,
    ) -> Option<Handle<Album>> {
        self.retrieve(
            reference,
            provider,
            "get_album",
            |remote, r| remote.get_album(r),
            Self::update_album,
        )
    }

    pub fn retrieve_artist(
        &self,
        reference: &str,
        provider: &ProviderIdentifier,
    ) -> Option<Handle<Artist>> {
        self.retrieve(
            reference,
            provider,
            "get_artist",
            |remote, r| remote.get_artist(r),
            Self::update_artist,
        )
    }

    pub fn retrieve_playlist(
        &self,
        reference: &str,
        provider: &ProviderIdentifier,
    ) -> Option<Handle<Playlist>> {
        self.retrieve(
            reference,
            provider,
            "get_playlist",
            |remote, r| remote.get_playlist(r),
            Self::update_playlist,
        )
    }

    // Catalog refresh

    pub fn refresh_catalog(&self) {
        for (identifier, _) in self.snapshot() {
            self.refresh_provider(&identifier);
        }
    }

    /// Pulls playlists, songs, albums and artists from one provider. Skipped
    /// unless the provider is set up and authenticated.
    pub fn refresh_provider(&self, identifier: &ProviderIdentifier) {
        let Some(provider) = self.provider(identifier) else {
            return;
        };
        let ready = self
            .guarded(identifier, "is_setup", provider.is_setup())
            .unwrap_or(false)
            && self
                .guarded(identifier, "is_authenticated", provider.is_authenticated())
                .unwrap_or(false);
        if !ready {
            tracing::debug!(provider = %identifier, "skipping refresh of unauthenticated provider");
            return;
        }

        if let Some(playlists) = self.guarded(identifier, "get_playlists", provider.get_playlists()) {
            for playlist in playlists {
                self.update_playlist(identifier, playlist);
            }
        }
        if !self.is_registered(identifier) {
            return;
        }
        let songs = self.sync_songs(identifier, provider.as_ref());
        if !self.is_registered(identifier) {
            return;
        }
        if let Some(albums) = self.guarded(identifier, "get_albums", provider.get_albums()) {
            for album in albums {
                self.update_album(identifier, album);
            }
        }
        if let Some(artists) = self.guarded(identifier, "get_artists", provider.get_artists()) {
            for artist in artists {
                self.update_artist(identifier, artist);
            }
        }
        tracing::info!(provider = %identifier, songs, "catalog refreshed");
    }

    /// Pages through the provider's songs, halving the page on
    /// payload-too-large and retrying the same offset.
    fn sync_songs(&self, identifier: &ProviderIdentifier, provider: &dyn MusicProvider) -> usize {
        let mut limit = self.page_size;
        let mut offset = 0;
        loop {
            match provider.get_songs(offset, limit) {
                Ok(page) => {
                    let count = page.len();
                    for song in page {
                        self.update_song(identifier, song);
                    }
                    offset += count;
                    if count < limit {
                        return offset;
                    }
                }
                Err(RemoteError::PayloadTooLarge) => {
                    limit /= 2;
                    if limit == 0 {
                        tracing::warn!(provider = %identifier, offset, "song page does not fit even at size 1");
                        return offset;
                    }
                    tracing::debug!(provider = %identifier, offset, limit, "halving song page size");
                }
                Err(error) => {
                    self.report_failure(identifier, "get_songs", &error);
                    return offset;
                }
            }
        }
    }

    // Search and offline mode

    pub fn start_search(&self, query: &str) {
        self.search.start(query);
        for (identifier, provider) in self.snapshot() {
            self.guarded(&identifier, "start_search", provider.start_search(query));
        }
    }

    pub fn search_results(&self) -> Option<SearchResult> {
        self.search.current()
    }

    pub fn is_offline(&self) -> bool {
        self.user_offline.load(Ordering::Acquire) || !self.network.has_connectivity()
    }

    pub fn set_offline_mode(&self, offline: bool) {
        self.user_offline.store(offline, Ordering::Release);
        for (identifier, provider) in self.snapshot() {
            self.guarded(&identifier, "set_offline_mode", provider.set_offline_mode(offline));
        }
        self.bus
            .publish(LibraryEvent::OfflineModeChanged(self.is_offline()));
    }

    // Rosetta stone

    pub fn rosetta_prefixes(&self) -> Vec<String> {
        self.rosetta.prefixes()
    }

    pub fn preferred_rosetta_prefix(&self) -> Option<String> {
        self.rosetta.preferred_prefix()
    }

    pub fn rosetta_identifier(&self, prefix: &str) -> Option<ProviderIdentifier> {
        self.rosetta.identifier(prefix)
    }

    /// Provider that owns `reference`: the longest matching Rosetta prefix,
    /// else whoever supplied the cached entity.
    pub fn resolve_reference(&self, reference: &str) -> Option<ProviderIdentifier> {
        self.rosetta
            .resolve(reference)
            .or_else(|| self.cache.owner(reference))
    }

    fn accepts_callbacks_from(&self, provider: &ProviderIdentifier) -> bool {
        let registered = self.is_registered(provider);
        if !registered {
            tracing::debug!(provider = %provider, "ignoring callback from unregistered provider");
        }
        registered
    }

    fn publish_playback(&self, provider: &ProviderIdentifier, event: ProviderPlayback) {
        self.bus.publish(LibraryEvent::Playback {
            provider: provider.clone(),
            event,
        });
    }
}

impl ProviderCallback for Aggregator {
    fn on_logged_in(&self, provider: &ProviderIdentifier, success: bool) {
        if success {
            tracing::info!(provider = %provider, "provider logged in");
            self.refresh_provider(provider);
        } else {
            tracing::warn!(provider = %provider, "provider login failed");
        }
    }

    fn on_logged_out(&self, provider: &ProviderIdentifier) {
        tracing::info!(provider = %provider, "provider logged out");
    }

    fn on_song_update(&self, provider: &ProviderIdentifier, song: Song) {
        if self.accepts_callbacks_from(provider) {
            self.update_song(provider, song);
        }
    }

    fn on_album_update(&self, provider: &ProviderIdentifier, album: Album) {
        if self.accepts_callbacks_from(provider) {
            self.update_album(provider, album);
        }
    }

    fn on_artist_update(&self, provider: &ProviderIdentifier, artist: Artist) {
        if self.accepts_callbacks_from(provider) {
            self.update_artist(provider, artist);
        }
    }

    fn on_genre_update(&self, provider: &ProviderIdentifier, genre: Genre) {
        if self.accepts_callbacks_from(provider) {
            self.update_genre(provider, genre);
        }
    }

    fn on_playlist_added_or_updated(&self, provider: &ProviderIdentifier, playlist: Playlist) {
        if self.accepts_callbacks_from(provider) {
            self.update_playlist(provider, playlist);
        }
    }

    fn on_playlist_removed(&self, provider: &ProviderIdentifier, reference: &str) {
        if !self.accepts_callbacks_from(provider) {
            return;
        }
        if self.cache.owner(reference).as_ref() != Some(provider) {
            tracing::debug!(provider = %provider, playlist = reference, "ignoring removal of a playlist the provider does not own");
            return;
        }
        if self.cache.remove_playlist(reference).is_some() {
            self.bus
                .publish(LibraryEvent::PlaylistRemoved(reference.to_string()));
        }
    }

    fn on_search_result(&self, provider: &ProviderIdentifier, mut result: SearchResult) {
        if !self.accepts_callbacks_from(provider) {
            return;
        }
        result.identifier = provider.clone();
        let merged = self.search.merge(result);
        self.bus.publish(LibraryEvent::SearchResults(merged));
    }

    fn on_song_playing(&self, provider: &ProviderIdentifier) {
        self.publish_playback(provider, ProviderPlayback::SongPlaying);
    }

    fn on_song_paused(&self, provider: &ProviderIdentifier) {
        self.publish_playback(provider, ProviderPlayback::SongPaused);
    }

    fn on_track_ended(&self, provider: &ProviderIdentifier) {
        self.publish_playback(provider, ProviderPlayback::TrackEnded);
    }
}

impl SongSource for Aggregator {
    fn song(&self, reference: &str, provider: &ProviderIdentifier) -> Option<Song> {
        self.retrieve_song(reference, provider)
            .map(|handle| handle.snapshot())
    }
}
