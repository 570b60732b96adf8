//! Playback: per-session queue, state machine and player

pub mod player;
pub mod queue;
pub mod state;

pub use player::Player;
pub use queue::TrackQueue;
pub use state::PlaybackState;
