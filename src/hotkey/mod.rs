//! Hotkey capture and normalization
//!
//! Chords are normalized into one canonical string form, persisted per
//! action by the binding store, and matched against live keyboard state by
//! a low-level hook that turns them into press/release transitions.

mod bindings;
mod chord;
mod conflict;
mod dispatcher;
mod keys;
mod listener;
mod registry;

pub use bindings::{BindingStore, HotkeyAction};
pub use chord::Chord;
pub use conflict::system_probe;
#[cfg(test)]
pub(crate) use conflict::NoProbe;
pub use dispatcher::HotkeyEvent;
pub use keys::named_key_tokens;
pub use listener::HotkeyListener;
