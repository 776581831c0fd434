use cadenza_core::{Album, Artist, Genre, Handle, Playlist, ProviderIdentifier, SearchResult, Song};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Songs,
    Albums,
    Artists,
    Playlists,
    Genres,
    Search,
    Providers,
    Offline,
    Playback,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::Songs,
        Topic::Albums,
        Topic::Artists,
        Topic::Playlists,
        Topic::Genres,
        Topic::Search,
        Topic::Providers,
        Topic::Offline,
        Topic::Playback,
    ];
}

/// Playback notification a provider pushed for the track it streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPlayback {
    SongPlaying,
    SongPaused,
    TrackEnded,
}

#[derive(Debug, Clone)]
pub enum LibraryEvent {
    SongsUpdated(Vec<Handle<Song>>),
    AlbumsUpdated(Vec<Handle<Album>>),
    ArtistsUpdated(Vec<Handle<Artist>>),
    PlaylistsUpdated(Vec<Handle<Playlist>>),
    PlaylistRemoved(String),
    GenresUpdated(Vec<Handle<Genre>>),
    /// The merged results for the current query.
    SearchResults(SearchResult),
    ProviderRegistered(ProviderIdentifier),
    ProviderRemoved(ProviderIdentifier),
    OfflineModeChanged(bool),
    Playback {
        provider: ProviderIdentifier,
        event: ProviderPlayback,
    },
}

impl LibraryEvent {
    pub fn topic(&self) -> Topic {
        match self {
            LibraryEvent::SongsUpdated(_) => Topic::Songs,
            LibraryEvent::AlbumsUpdated(_) => Topic::Albums,
            LibraryEvent::ArtistsUpdated(_) => Topic::Artists,
            LibraryEvent::PlaylistsUpdated(_) | LibraryEvent::PlaylistRemoved(_) => Topic::Playlists,
            LibraryEvent::GenresUpdated(_) => Topic::Genres,
            LibraryEvent::SearchResults(_) => Topic::Search,
            LibraryEvent::ProviderRegistered(_) | LibraryEvent::ProviderRemoved(_) => {
                Topic::Providers
            }
            LibraryEvent::OfflineModeChanged(_) => Topic::Offline,
            LibraryEvent::Playback { .. } => Topic::Playback,
        }
    }
}

struct Subscriber {
    id: u64,
    topics: HashSet<Topic>,
    tx: Sender<LibraryEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Typed publish/subscribe hub for library notifications.
///
/// Events are enqueued on each subscriber's channel from the publishing
/// thread; subscribers drain their [`Subscription`] on their own threads.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.subscribers.write().push(Subscriber {
            id,
            topics: topics.iter().copied().collect(),
            tx,
        });
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&Topic::ALL)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.remove(id)
    }

    pub fn publish(&self, event: LibraryEvent) {
        let topic = event.topic();
        let mut closed = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for subscriber in subscribers.iter().filter(|s| s.topics.contains(&topic)) {
                if subscriber.tx.send(event.clone()).is_err() {
                    closed.push(subscriber.id);
                }
            }
        }
        for id in closed {
            self.inner.remove(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<LibraryEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<LibraryEvent> {
        &self.rx
    }

    pub fn try_recv(&self) -> Option<LibraryEvent> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<LibraryEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_only_subscribed_topics() {
        let bus = EventBus::new();
        let offline = bus.subscribe(&[Topic::Offline]);
        let everything = bus.subscribe_all();

        bus.publish(LibraryEvent::PlaylistRemoved("pl:1".into()));
        bus.publish(LibraryEvent::OfflineModeChanged(true));

        assert!(matches!(
            offline.try_recv(),
            Some(LibraryEvent::OfflineModeChanged(true))
        ));
        assert!(offline.try_recv().is_none());
        assert!(matches!(
            everything.try_recv(),
            Some(LibraryEvent::PlaylistRemoved(_))
        ));
        assert!(matches!(
            everything.try_recv(),
            Some(LibraryEvent::OfflineModeChanged(true))
        ));
    }

    #[test]
    fn dropping_or_unsubscribing_ends_delivery() {
        let bus = EventBus::new();
        let kept = bus.subscribe(&[Topic::Offline]);
        let dropped = bus.subscribe(&[Topic::Offline]);
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(kept.id()));
        bus.publish(LibraryEvent::OfflineModeChanged(false));
        assert!(kept.try_recv().is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
