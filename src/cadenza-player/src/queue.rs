//! Play queue of the local engine.

use cadenza_core::Song;
use rand::seq::SliceRandom;
use std::ops::Range;

/// Identity of one queue entry. The same song queued twice gets two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: QueueId,
    pub song: Song,
}

/// Where [`Queue::add`] puts new songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Top,
    /// Right after the selected entry, or at the top when nothing is selected.
    Next,
    Bottom,
}

/// Ordered entries plus a cursor on the one being played.
#[derive(Debug, Default, Clone)]
pub struct Queue {
    entries: Vec<QueueItem>,
    cursor: Option<usize>,
    issued: u64,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QueueItem] {
        &self.entries
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.entries.get(self.cursor?)
    }

    pub fn songs(&self) -> Vec<Song> {
        self.entries.iter().map(|entry| entry.song.clone()).collect()
    }

    /// Inserts `songs` in order at `placement` and returns the indices they
    /// landed on. The selected entry stays selected.
    pub fn add(&mut self, songs: impl IntoIterator<Item = Song>, placement: Placement) -> Range<usize> {
        let at = match placement {
            Placement::Top => 0,
            Placement::Next => self.cursor.map_or(0, |cursor| cursor + 1),
            Placement::Bottom => self.entries.len(),
        };
        let incoming: Vec<QueueItem> = songs
            .into_iter()
            .map(|song| {
                self.issued += 1;
                QueueItem {
                    id: QueueId(self.issued),
                    song,
                }
            })
            .collect();
        let added = incoming.len();
        self.entries.splice(at..at, incoming);
        if let Some(cursor) = self.cursor.as_mut() {
            if at <= *cursor {
                *cursor += added;
            }
        }
        at..at + added
    }

    /// Swaps the whole queue for `songs`, with nothing selected.
    pub fn replace(&mut self, songs: impl IntoIterator<Item = Song>) {
        self.clear();
        self.add(songs, Placement::Bottom);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn select(&mut self, index: usize) -> Option<&QueueItem> {
        if index >= self.entries.len() {
            return None;
        }
        self.cursor = Some(index);
        self.current()
    }

    pub fn deselect(&mut self) {
        self.cursor = None;
    }

    /// Moves one entry on. Past the last entry the cursor wraps to the top
    /// when `wrap` is set and is cleared otherwise.
    pub fn forward(&mut self, wrap: bool) -> Option<&QueueItem> {
        let cursor = self.cursor?;
        self.cursor = if cursor + 1 < self.entries.len() {
            Some(cursor + 1)
        } else if wrap {
            Some(0)
        } else {
            None
        };
        self.current()
    }

    /// Moves one entry back; the first entry stays selected.
    pub fn back(&mut self) -> Option<&QueueItem> {
        let cursor = self.cursor?;
        self.cursor = Some(cursor.saturating_sub(1));
        self.current()
    }

    /// Shuffles every entry. The selected one moves to the top and stays
    /// selected.
    pub fn shuffle(&mut self) {
        let playing = self.cursor.take().map(|cursor| self.entries.remove(cursor));
        self.entries.shuffle(&mut rand::thread_rng());
        if let Some(entry) = playing {
            self.entries.insert(0, entry);
            self.cursor = Some(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::ProviderIdentifier;

    fn song(reference: &str) -> Song {
        Song::placeholder(reference, ProviderIdentifier::new("pkg", "svc", "T"))
    }

    fn references(queue: &Queue) -> Vec<String> {
        queue
            .entries()
            .iter()
            .map(|entry| entry.song.meta.reference.clone())
            .collect()
    }

    #[test]
    fn batches_keep_their_order_at_top_and_bottom() {
        let mut queue = Queue::new();
        assert_eq!(queue.add([song("a"), song("b")], Placement::Bottom), 0..2);
        assert_eq!(queue.add([song("x"), song("y")], Placement::Top), 0..2);
        assert_eq!(queue.add([song("z")], Placement::Bottom), 4..5);
        assert_eq!(references(&queue), vec!["x", "y", "a", "b", "z"]);
    }

    #[test]
    fn adding_on_top_keeps_the_playing_entry_selected() {
        let mut queue = Queue::new();
        queue.add([song("a"), song("b")], Placement::Bottom);
        let playing = queue.select(1).unwrap().id;

        queue.add([song("x"), song("y")], Placement::Top);
        assert_eq!(queue.current().unwrap().id, playing);
        assert_eq!(queue.current().unwrap().song.meta.reference, "b");
    }

    #[test]
    fn next_lands_after_the_playing_entry() {
        let mut queue = Queue::new();
        queue.add([song("n")], Placement::Next);
        queue.add([song("a"), song("b")], Placement::Bottom);
        queue.select(1);

        assert_eq!(queue.add([song("x")], Placement::Next), 2..3);
        assert_eq!(references(&queue), vec!["n", "a", "x", "b"]);
    }

    #[test]
    fn the_same_song_queued_twice_is_two_entries() {
        let mut queue = Queue::new();
        queue.add([song("a"), song("a")], Placement::Bottom);
        assert_ne!(queue.entries()[0].id, queue.entries()[1].id);
    }

    #[test]
    fn forward_wraps_or_clears_at_the_end() {
        let mut queue = Queue::new();
        queue.add([song("a"), song("b")], Placement::Bottom);
        assert!(queue.forward(true).is_none());

        queue.select(1);
        assert_eq!(queue.forward(true).unwrap().song.meta.reference, "a");
        queue.select(1);
        assert!(queue.forward(false).is_none());
        assert!(queue.current().is_none());
    }

    #[test]
    fn back_stops_at_the_first_entry() {
        let mut queue = Queue::new();
        queue.add([song("a"), song("b")], Placement::Bottom);
        queue.select(1);
        assert_eq!(queue.back().unwrap().song.meta.reference, "a");
        assert_eq!(queue.back().unwrap().song.meta.reference, "a");
    }

    #[test]
    fn shuffle_moves_the_playing_entry_to_the_top() {
        let mut queue = Queue::new();
        queue.add([song("a"), song("b"), song("c"), song("d")], Placement::Bottom);
        let playing = queue.select(2).unwrap().id;

        queue.shuffle();
        assert_eq!(queue.entries()[0].id, playing);
        assert_eq!(queue.current().unwrap().id, playing);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn replace_leaves_nothing_selected() {
        let mut queue = Queue::new();
        queue.add([song("a")], Placement::Bottom);
        queue.select(0);
        queue.replace([song("b"), song("c")]);
        assert!(queue.current().is_none());
        assert_eq!(references(&queue), vec!["b", "c"]);
    }
}
