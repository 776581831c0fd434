//! Playback control: the in-process engine and the command proxy that
//! serializes calls to whichever engine is connected.

mod engine;
mod player;
mod proxy;
mod queue;

pub use engine::LocalPlaybackEngine;
pub use player::Player;
pub use proxy::{
    CommandProxy, EngineReadyHandle, EngineResolver, PlaybackCommand, DEFAULT_CONNECT_TIMEOUT,
};
pub use queue::{Placement, Queue, QueueId, QueueItem};
