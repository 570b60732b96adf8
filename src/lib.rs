//! jamroom: ephemeral per-user media sessions for shared community spaces
//!
//! Each session owns a private text + voice channel pair and a FIFO
//! playback queue. Sessions are created on request, capped by a global
//! capacity, fed by a bounded request-intake window on the text channel,
//! and torn down when closed, abandoned, or cut off from their output
//! device. An HTTP API drives the whole thing and an SSE feed reports
//! every lifecycle and playback event.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod playback;
pub mod resolver;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
