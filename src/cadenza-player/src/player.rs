use crate::{Queue, QueueItem};
use cadenza_core::PlaybackState;

/// Queue plus transport state. Pure state machine; notification is the
/// engine's job.
#[derive(Debug, Default)]
pub struct Player {
    queue: Queue,
    state: PlaybackState,
    position_ms: u64,
    repeat: bool,
}

impl Player {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.queue.current()
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    /// Resumes when paused, otherwise starts the current (or first) item.
    pub fn play(&mut self) -> Option<&QueueItem> {
        if self.state == PlaybackState::Paused && self.queue.current().is_some() {
            self.state = PlaybackState::Playing;
            return self.queue.current();
        }
        if self.queue.current().is_none() {
            self.queue.select(0)?;
        }
        self.start_current()
    }

    pub fn play_index(&mut self, index: usize) -> Option<&QueueItem> {
        self.queue.select(index)?;
        self.start_current()
    }

    pub fn pause(&mut self) -> bool {
        if self.state == PlaybackState::Playing || self.state == PlaybackState::Buffering {
            self.state = PlaybackState::Paused;
            return true;
        }
        false
    }

    pub fn stop(&mut self) {
        self.queue.deselect();
        self.state = PlaybackState::Stopped;
        self.position_ms = 0;
    }

    pub fn skip_next(&mut self) -> Option<&QueueItem> {
        if self.queue.forward(self.repeat).is_none() {
            self.stop();
            return None;
        }
        self.start_current()
    }

    /// Goes back one item; on the first item restarts it.
    pub fn skip_previous(&mut self) -> Option<&QueueItem> {
        self.queue.back()?;
        self.start_current()
    }

    pub fn seek(&mut self, position_ms: u64) -> bool {
        if self.queue.current().is_none() {
            return false;
        }
        let limit = self
            .queue
            .current()
            .map(|item| item.song.duration_ms)
            .filter(|duration| *duration > 0)
            .unwrap_or(u64::MAX);
        self.position_ms = position_ms.min(limit);
        true
    }

    /// The local engine has no decoder, so buffering completes immediately.
    fn start_current(&mut self) -> Option<&QueueItem> {
        self.queue.current()?;
        self.state = PlaybackState::Buffering;
        self.position_ms = 0;
        self.state = PlaybackState::Playing;
        self.queue.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Placement;
    use cadenza_core::{ProviderIdentifier, Song};

    fn song(title: &str) -> Song {
        let mut song = Song::placeholder(title, ProviderIdentifier::new("pkg", "svc", "T"));
        song.title = title.to_string();
        song.duration_ms = 1_000;
        song
    }

    #[test]
    fn play_starts_first_track() {
        let mut player = Player::new();
        player.queue_mut().add([song("one")], Placement::Bottom);

        let current = player.play().expect("should play first track");
        assert_eq!(current.song.title, "one");
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[test]
    fn pause_and_resume_transitions() {
        let mut player = Player::new();
        player.queue_mut().add([song("one")], Placement::Bottom);
        player.play();
        player.seek(500);

        assert!(player.pause());
        assert_eq!(player.state(), PlaybackState::Paused);
        player.play();
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.position_ms(), 500);
    }

    #[test]
    fn skip_past_end_stops_unless_repeating() {
        let mut player = Player::new();
        player
            .queue_mut()
            .add([song("one"), song("two")], Placement::Bottom);
        player.play();

        assert_eq!(player.skip_next().unwrap().song.title, "two");
        player.set_repeat(true);
        assert_eq!(player.skip_next().unwrap().song.title, "one");
        player.set_repeat(false);
        player.skip_next();
        assert!(player.skip_next().is_none());
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn stop_clears_current_selection() {
        let mut player = Player::new();
        player.queue_mut().add([song("one")], Placement::Bottom);
        player.play();

        player.stop();
        assert!(player.current().is_none());
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn seek_clamps_to_duration() {
        let mut player = Player::new();
        assert!(!player.seek(10));
        player.queue_mut().add([song("one")], Placement::Bottom);
        player.play();
        assert!(player.seek(5_000));
        assert_eq!(player.position_ms(), 1_000);
    }
}
