//! Session lifecycle: registry, request intake and presence reaping

pub mod intake;
pub mod registry;
pub mod reaper;

pub use reaper::{Occupant, PresenceUpdate, Reaper};
pub use registry::{EnqueueOutcome, QueueSnapshot, SessionRecord, SessionRegistry};
