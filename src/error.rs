//! Error types for jamroom
//!
//! Defines service-specific error types using thiserror for clear error
//! propagation. Command handlers convert these into one structured outcome
//! per request; they never crash the event loop.

use thiserror::Error;

/// Main error type for jamroom
#[derive(Error, Debug)]
pub enum Error {
    /// Global session capacity reached; the create is rejected, not retried
    #[error("session capacity exceeded")]
    CapacityExceeded,

    /// The (community, user) pair already owns a live session
    #[error("user already owns a session in this community")]
    DuplicateSession,

    /// No session matches the caller or their ambient channel
    #[error("no active session for this caller")]
    NoActiveSession,

    /// A playback control command arrived while nothing is playing
    #[error("nothing is playing")]
    NothingPlaying,

    /// A search yielded no results for the query
    #[error("no results for query: {0}")]
    NotFound(String),

    /// The search provider call itself failed (network, malformed metadata)
    #[error("track resolution failed: {0}")]
    Resolution(String),

    /// Per-track playback failure (stream open refused); not fatal to the session
    #[error("playback error: {0}")]
    Playback(String),

    /// Platform gateway call failed (channel provisioning, deletion)
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Configuration file loading errors
    #[error("configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the jamroom Error
pub type Result<T> = std::result::Result<T, Error>;
