//! Playback state for one session
//!
//! Exactly one `PlaybackState` exists per session. Transitions are driven
//! only by queue operations and stream signals, never by direct external
//! mutation.

use serde::{Deserialize, Serialize};

/// Playback state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing to play, or no output stream attached
    Idle,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
