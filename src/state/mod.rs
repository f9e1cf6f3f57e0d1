//! Playback state machine and its worker thread
//!
//! Three states:
//! - Stopped: nothing loaded (the last played file may still be remembered)
//! - Playing: media loaded and audible
//! - Paused: media loaded, output halted at the current position

mod machine;
mod worker;

pub use machine::{PlaybackSnapshot, PlayerOptions};
#[cfg(test)]
pub(crate) use machine::PlaybackStatus;
pub use worker::spawn as spawn_worker;
