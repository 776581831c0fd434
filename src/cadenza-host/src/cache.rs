use cadenza_core::{Album, Artist, CatalogEntity, Genre, Handle, Playlist, ProviderIdentifier, Song};
use parking_lot::RwLock;
use std::collections::HashMap;

type Map<T> = RwLock<HashMap<String, Handle<T>>>;

/// Result of reconciling an incoming entity against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not cached before.
    Inserted,
    /// Was a placeholder and is now loaded.
    Hydrated,
    /// Loaded before; fields changed.
    Updated,
    Unchanged,
}

impl Outcome {
    pub fn changed(self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

/// Entity types stored in a [`ProviderCache`].
pub trait Cached: CatalogEntity {
    fn map(cache: &ProviderCache) -> &Map<Self>;
}

impl Cached for Song {
    fn map(cache: &ProviderCache) -> &Map<Self> {
        &cache.songs
    }
}

impl Cached for Album {
    fn map(cache: &ProviderCache) -> &Map<Self> {
        &cache.albums
    }
}

impl Cached for Artist {
    fn map(cache: &ProviderCache) -> &Map<Self> {
        &cache.artists
    }
}

impl Cached for Playlist {
    fn map(cache: &ProviderCache) -> &Map<Self> {
        &cache.playlists
    }
}

impl Cached for Genre {
    fn map(cache: &ProviderCache) -> &Map<Self> {
        &cache.genres
    }
}

/// In-memory catalog keyed by entity reference, plus a reverse index from
/// reference to owning provider.
///
/// Lock order: an entity map first, then `owners`. Purging takes every
/// entity map in declaration order before `owners`.
#[derive(Default)]
pub struct ProviderCache {
    songs: Map<Song>,
    albums: Map<Album>,
    artists: Map<Artist>,
    playlists: Map<Playlist>,
    genres: Map<Genre>,
    owners: RwLock<HashMap<String, ProviderIdentifier>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Cached>(&self, reference: &str) -> Option<Handle<T>> {
        T::map(self).read().get(reference).cloned()
    }

    /// Stores `entity`, replacing whatever was cached under its reference.
    pub fn put<T: Cached>(&self, entity: T) -> Handle<T> {
        let reference = entity.reference().to_string();
        let provider = entity.provider().clone();
        let handle = Handle::new(entity);
        let mut map = T::map(self).write();
        map.insert(reference.clone(), handle.clone());
        self.owners.write().insert(reference, provider);
        handle
    }

    /// Applies `incoming` if it adds information.
    ///
    /// Uncached entities are inserted as-is. A cached entity is overwritten in
    /// place only by a loaded, non-identical update, so every outstanding
    /// handle sees the new fields.
    pub fn upsert<T: Cached>(&self, incoming: T) -> (Handle<T>, Outcome) {
        let mut map = T::map(self).write();
        if let Some(existing) = map.get(incoming.reference()) {
            let handle = existing.clone();
            drop(map);
            if !incoming.is_loaded() {
                return (handle, Outcome::Unchanged);
            }
            let mut cached = handle.write();
            if cached.is_identical(&incoming) {
                drop(cached);
                return (handle, Outcome::Unchanged);
            }
            let was_loaded = cached.is_loaded();
            let provider = incoming.provider().clone();
            let reference = incoming.reference().to_string();
            cached.absorb(incoming);
            drop(cached);
            // a purge may have dropped the entity meanwhile; only a handle
            // still in the map gets an owner entry
            let map = T::map(self).read();
            if map.get(&reference).is_some_and(|current| Handle::ptr_eq(current, &handle)) {
                self.owners.write().insert(reference, provider);
            }
            drop(map);
            let outcome = if was_loaded {
                Outcome::Updated
            } else {
                Outcome::Hydrated
            };
            return (handle, outcome);
        }

        let reference = incoming.reference().to_string();
        let provider = incoming.provider().clone();
        let handle = Handle::new(incoming);
        map.insert(reference.clone(), handle.clone());
        self.owners.write().insert(reference, provider);
        (handle, Outcome::Inserted)
    }

    pub fn song(&self, reference: &str) -> Option<Handle<Song>> {
        self.get(reference)
    }

    pub fn album(&self, reference: &str) -> Option<Handle<Album>> {
        self.get(reference)
    }

    pub fn artist(&self, reference: &str) -> Option<Handle<Artist>> {
        self.get(reference)
    }

    pub fn playlist(&self, reference: &str) -> Option<Handle<Playlist>> {
        self.get(reference)
    }

    pub fn genre(&self, reference: &str) -> Option<Handle<Genre>> {
        self.get(reference)
    }

    pub fn owner(&self, reference: &str) -> Option<ProviderIdentifier> {
        self.owners.read().get(reference).cloned()
    }

    pub fn remove_playlist(&self, reference: &str) -> Option<Handle<Playlist>> {
        let mut playlists = self.playlists.write();
        let removed = playlists.remove(reference)?;
        self.owners.write().remove(reference);
        Some(removed)
    }

    /// Drops every entity and owner entry belonging to `provider`.
    pub fn purge_for_provider(&self, provider: &ProviderIdentifier) -> usize {
        let mut songs = self.songs.write();
        let mut albums = self.albums.write();
        let mut artists = self.artists.write();
        let mut playlists = self.playlists.write();
        let mut genres = self.genres.write();
        let mut owners = self.owners.write();

        let before = songs.len() + albums.len() + artists.len() + playlists.len() + genres.len();
        songs.retain(|_, handle| handle.read().provider() != provider);
        albums.retain(|_, handle| handle.read().provider() != provider);
        artists.retain(|_, handle| handle.read().provider() != provider);
        playlists.retain(|_, handle| handle.read().provider() != provider);
        genres.retain(|_, handle| handle.read().provider() != provider);
        owners.retain(|_, owner| owner != provider);
        let after = songs.len() + albums.len() + artists.len() + playlists.len() + genres.len();

        let purged = before - after;
        tracing::debug!(provider = %provider, purged, "purged provider cache");
        purged
    }

    pub fn all_songs(&self) -> Vec<Handle<Song>> {
        self.songs.read().values().cloned().collect()
    }

    pub fn all_albums(&self) -> Vec<Handle<Album>> {
        self.albums.read().values().cloned().collect()
    }

    pub fn all_artists(&self) -> Vec<Handle<Artist>> {
        self.artists.read().values().cloned().collect()
    }

    pub fn all_playlists(&self) -> Vec<Handle<Playlist>> {
        self.playlists.read().values().cloned().collect()
    }

    pub fn song_count(&self) -> usize {
        self.songs.read().len()
    }

    pub fn album_count(&self) -> usize {
        self.albums.read().len()
    }

    pub fn artist_count(&self) -> usize {
        self.artists.read().len()
    }

    pub fn playlist_count(&self) -> usize {
        self.playlists.read().len()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.read().len()
    }
}
