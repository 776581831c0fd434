use crate::identifier::ProviderIdentifier;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fields every catalog entity carries.
///
/// `reference` is an opaque, case-sensitive identifier chosen by the owning
/// provider. An entity with `is_loaded = false` is a placeholder that only
/// knows its reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityMeta {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub provider: ProviderIdentifier,
    #[serde(default)]
    pub is_loaded: bool,
}

impl EntityMeta {
    pub fn placeholder(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            reference: reference.into(),
            provider,
            is_loaded: false,
        }
    }

    pub fn loaded(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            reference: reference.into(),
            provider,
            is_loaded: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Song {
    pub fn placeholder(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            meta: EntityMeta::placeholder(reference, provider),
            title: String::new(),
            artist: None,
            album: None,
            duration_ms: 0,
            year: None,
            available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub songs: Vec<String>,
}

impl Album {
    pub fn placeholder(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            meta: EntityMeta::placeholder(reference, provider),
            name: String::new(),
            year: None,
            songs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub albums: Vec<String>,
}

impl Artist {
    pub fn placeholder(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            meta: EntityMeta::placeholder(reference, provider),
            name: String::new(),
            albums: Vec::new(),
        }
    }

    /// Adds an album reference unless already present. Returns whether the
    /// list changed.
    pub fn add_album(&mut self, album: &str) -> bool {
        if self.albums.iter().any(|a| a == album) {
            return false;
        }
        self.albums.push(album.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(default)]
    pub offline_capable: bool,
}

impl Playlist {
    pub fn placeholder(reference: impl Into<String>, provider: ProviderIdentifier) -> Self {
        Self {
            meta: EntityMeta::placeholder(reference, provider),
            name: String::new(),
            songs: Vec::new(),
            offline_capable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Song,
    Album,
    Artist,
    Playlist,
    Genre,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Song => "song",
            EntityKind::Album => "album",
            EntityKind::Artist => "artist",
            EntityKind::Playlist => "playlist",
            EntityKind::Genre => "genre",
        };
        f.write_str(label)
    }
}

/// Any catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Song(Song),
    Album(Album),
    Artist(Artist),
    Playlist(Playlist),
    Genre(Genre),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Song(_) => EntityKind::Song,
            Entity::Album(_) => EntityKind::Album,
            Entity::Artist(_) => EntityKind::Artist,
            Entity::Playlist(_) => EntityKind::Playlist,
            Entity::Genre(_) => EntityKind::Genre,
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        match self {
            Entity::Song(s) => &s.meta,
            Entity::Album(a) => &a.meta,
            Entity::Artist(a) => &a.meta,
            Entity::Playlist(p) => &p.meta,
            Entity::Genre(g) => &g.meta,
        }
    }

    pub fn reference(&self) -> &str {
        &self.meta().reference
    }

    /// Key under which artwork for this entity would be looked up.
    pub fn art_key(&self) -> Option<&str> {
        match self {
            Entity::Song(song) => song.album.as_deref(),
            Entity::Album(album) => Some(&album.meta.reference),
            Entity::Artist(artist) => Some(&artist.meta.reference),
            Entity::Playlist(playlist) => Some(&playlist.meta.reference),
            Entity::Genre(_) => None,
        }
    }

    pub fn is_identical(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Song(a), Entity::Song(b)) => a.is_identical(b),
            (Entity::Album(a), Entity::Album(b)) => a.is_identical(b),
            (Entity::Artist(a), Entity::Artist(b)) => a.is_identical(b),
            (Entity::Playlist(a), Entity::Playlist(b)) => a.is_identical(b),
            (Entity::Genre(a), Entity::Genre(b)) => a.is_identical(b),
            _ => false,
        }
    }
}

/// Behaviour shared by the entity types the cache stores.
pub trait CatalogEntity: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn reference(&self) -> &str {
        &self.meta().reference
    }

    fn is_loaded(&self) -> bool {
        self.meta().is_loaded
    }

    fn provider(&self) -> &ProviderIdentifier {
        &self.meta().provider
    }

    /// Whether applying `incoming` on top of `self` would change nothing.
    fn is_identical(&self, incoming: &Self) -> bool;

    /// Copies the fields of `incoming` into `self`.
    fn absorb(&mut self, incoming: Self);

    fn into_entity(self) -> Entity;
}

impl CatalogEntity for Song {
    const KIND: EntityKind = EntityKind::Song;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn is_identical(&self, incoming: &Self) -> bool {
        self == incoming
    }

    fn absorb(&mut self, incoming: Self) {
        *self = incoming;
    }

    fn into_entity(self) -> Entity {
        Entity::Song(self)
    }
}

impl CatalogEntity for Album {
    const KIND: EntityKind = EntityKind::Album;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn is_identical(&self, incoming: &Self) -> bool {
        self == incoming
    }

    fn absorb(&mut self, incoming: Self) {
        *self = incoming;
    }

    fn into_entity(self) -> Entity {
        Entity::Album(self)
    }
}

impl CatalogEntity for Artist {
    const KIND: EntityKind = EntityKind::Artist;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    // Album links added locally survive a provider re-sending the artist, so
    // the incoming list only has to be contained in ours.
    fn is_identical(&self, incoming: &Self) -> bool {
        self.meta == incoming.meta
            && self.name == incoming.name
            && incoming.albums.iter().all(|a| self.albums.contains(a))
    }

    fn absorb(&mut self, incoming: Self) {
        self.meta = incoming.meta;
        self.name = incoming.name;
        for album in &incoming.albums {
            self.add_album(album);
        }
    }

    fn into_entity(self) -> Entity {
        Entity::Artist(self)
    }
}

impl CatalogEntity for Playlist {
    const KIND: EntityKind = EntityKind::Playlist;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn is_identical(&self, incoming: &Self) -> bool {
        self.meta == incoming.meta
            && self.name == incoming.name
            && self.offline_capable == incoming.offline_capable
            && self.songs.len() == incoming.songs.len()
            && self.songs.iter().zip(&incoming.songs).all(|(a, b)| a == b)
    }

    fn absorb(&mut self, incoming: Self) {
        *self = incoming;
    }

    fn into_entity(self) -> Entity {
        Entity::Playlist(self)
    }
}

impl CatalogEntity for Genre {
    const KIND: EntityKind = EntityKind::Genre;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn is_identical(&self, incoming: &Self) -> bool {
        self == incoming
    }

    fn absorb(&mut self, incoming: Self) {
        *self = incoming;
    }

    fn into_entity(self) -> Entity {
        Entity::Genre(self)
    }
}

/// Shared, mutable view of a cached entity.
///
/// Every clone points at the same instance; hydrating the entity through one
/// handle is visible through all of them. A [`Handle::snapshot`] is a copy and
/// does not follow later updates.
pub struct Handle<T>(Arc<RwLock<T>>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    /// Mutable access. Only the aggregator writes cached entities.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    pub fn ptr_eq(a: &Handle<T>, b: &Handle<T>) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: Clone> Handle<T> {
    pub fn snapshot(&self) -> T {
        self.0.read().clone()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&*self.0.read()).finish()
    }
}

/// One provider's answer to a search query. Lists hold entity references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    #[serde(default)]
    pub identifier: ProviderIdentifier,
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(default)]
    pub albums: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub playlists: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderIdentifier {
        ProviderIdentifier::new("pkg", "svc", "Test")
    }

    fn loaded_song(reference: &str, album: &str) -> Song {
        Song {
            meta: EntityMeta::loaded(reference, provider()),
            title: "Title".into(),
            artist: Some("artist:1".into()),
            album: Some(album.into()),
            duration_ms: 180_000,
            year: Some(1999),
            available: true,
        }
    }

    #[test]
    fn art_key_follows_entity_kind() {
        let song = Entity::Song(loaded_song("song:1", "album:9"));
        assert_eq!(song.art_key(), Some("album:9"));

        let genre = Entity::Genre(Genre {
            meta: EntityMeta::loaded("genre:rock", provider()),
            name: "Rock".into(),
        });
        assert_eq!(genre.art_key(), None);

        let artist = Entity::Artist(Artist::placeholder("artist:1", provider()));
        assert_eq!(artist.art_key(), Some("artist:1"));
    }

    #[test]
    fn identical_compares_all_fields() {
        let a = loaded_song("song:1", "album:1");
        let mut b = a.clone();
        assert!(a.is_identical(&b));
        b.duration_ms += 1;
        assert!(!a.is_identical(&b));
        assert!(!Entity::Song(a.clone()).is_identical(&Entity::Album(Album::placeholder(
            "song:1",
            provider()
        ))));
    }

    #[test]
    fn artist_keeps_locally_linked_albums() {
        let mut cached = Artist {
            meta: EntityMeta::loaded("artist:1", provider()),
            name: "Band".into(),
            albums: vec!["album:1".into(), "album:2".into()],
        };
        let incoming = Artist {
            meta: EntityMeta::loaded("artist:1", provider()),
            name: "Band".into(),
            albums: vec!["album:2".into()],
        };
        assert!(cached.is_identical(&incoming));

        let renamed = Artist {
            name: "The Band".into(),
            albums: vec!["album:3".into()],
            ..incoming
        };
        assert!(!cached.is_identical(&renamed));
        cached.absorb(renamed);
        assert_eq!(cached.name, "The Band");
        assert_eq!(cached.albums, vec!["album:1", "album:2", "album:3"]);
    }

    #[test]
    fn add_album_deduplicates() {
        let mut artist = Artist::placeholder("artist:1", provider());
        assert!(artist.add_album("album:1"));
        assert!(!artist.add_album("album:1"));
        assert_eq!(artist.albums.len(), 1);
    }

    #[test]
    fn handle_clones_observe_in_place_updates() {
        let handle = Handle::new(Song::placeholder("song:1", provider()));
        let other = handle.clone();
        let before = handle.snapshot();

        handle.write().absorb(loaded_song("song:1", "album:1"));

        assert!(other.read().meta.is_loaded);
        assert_eq!(other.read().title, "Title");
        assert!(!before.meta.is_loaded);
        assert!(Handle::ptr_eq(&handle, &other));
    }

    #[test]
    fn song_json_uses_ref_field() {
        let json = r#"{"ref":"song:1","is_loaded":true,"title":"Hello"}"#;
        let song: Song = serde_json::from_str(json).unwrap();
        assert_eq!(song.meta.reference, "song:1");
        assert!(song.available);
        assert_eq!(song.meta.provider, ProviderIdentifier::default());
    }
}
