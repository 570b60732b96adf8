//! Per-session track queue
//!
//! Strict FIFO: the head is "now playing" once playback starts and is
//! removed only by completion, skip or stop. No reordering, no dedup of
//! identical tracks.

use crate::resolver::Track;
use std::collections::VecDeque;

/// Ordered queue of pending tracks for one session
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self {
            tracks: VecDeque::new(),
        }
    }

    /// Append to the tail. Returns the new queue length, which doubles as
    /// the track's 1-indexed position for user feedback.
    pub fn enqueue(&mut self, track: Track) -> usize {
        self.tracks.push_back(track);
        self.tracks.len()
    }

    /// Drop the current head and return the new head, if any.
    pub fn advance(&mut self) -> Option<Track> {
        self.tracks.pop_front();
        self.tracks.front().cloned()
    }

    /// Current head without removing it
    pub fn head(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Empty the queue entirely (used by stop and teardown)
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Read-only snapshot of the ordered queue for display
    pub fn peek(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
