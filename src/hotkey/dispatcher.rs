//! Per-action press/release state machine
//!
//! Turns raw key-down/key-up edges for registered chords into exactly one
//! `Pressed` and one `Released` per physical press. Auto-repeat key-downs
//! are swallowed and a press arriving within the debounce window after the
//! same action's release is ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::bindings::HotkeyAction;
use super::chord::Chord;
use super::registry::HotkeyRegistry;

/// Default window after a release during which a new press is ignored
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Edge-triggered hotkey transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "edge", content = "action", rename_all = "snake_case")]
pub enum HotkeyEvent {
    Pressed(HotkeyAction),
    Released(HotkeyAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Down,
    Up,
}

/// What the hook should do with a key event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a registered chord; deliver to the focused program
    PassThrough,
    /// Registered chord, but a repeat or inside the debounce window
    Suppressed,
    /// Registered chord that changed state
    Emit(HotkeyEvent),
}

impl Dispatch {
    /// Matched events never reach other programs
    pub fn consumed(&self) -> bool {
        !matches!(self, Dispatch::PassThrough)
    }
}

pub struct Dispatcher {
    registry: Arc<HotkeyRegistry>,
    held: HashSet<(HotkeyAction, Chord)>,
    last_release: HashMap<HotkeyAction, Instant>,
    debounce: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<HotkeyRegistry>, debounce: Duration) -> Self {
        Self {
            registry,
            held: HashSet::new(),
            last_release: HashMap::new(),
            debounce,
        }
    }

    /// Swap in a rebuilt registry. Chords already down stay held so their
    /// key-up still emits `Released`, even if the new bindings dropped them.
    pub fn replace_registry(&mut self, registry: Arc<HotkeyRegistry>) {
        if !self.held.is_empty() {
            debug!(held = self.held.len(), "registry replaced while chords are held");
        }
        self.registry = registry;
    }

    pub fn handle(&mut self, edge: KeyEdge, chord: &Chord, now: Instant) -> Dispatch {
        match edge {
            KeyEdge::Down => self.key_down(chord, now),
            KeyEdge::Up => self.key_up(chord, now),
        }
    }

    fn key_down(&mut self, chord: &Chord, now: Instant) -> Dispatch {
        let Some(action) = self.registry.lookup(&chord.to_string()) else {
            return Dispatch::PassThrough;
        };

        let entry = (action, chord.clone());
        if self.held.contains(&entry) {
            trace!(%action, "key repeat suppressed");
            return Dispatch::Suppressed;
        }

        if let Some(released) = self.last_release.get(&action) {
            if now.saturating_duration_since(*released) < self.debounce {
                debug!(%action, "press inside debounce window suppressed");
                return Dispatch::Suppressed;
            }
        }

        self.held.insert(entry);
        debug!(%action, %chord, "hotkey pressed");
        Dispatch::Emit(HotkeyEvent::Pressed(action))
    }

    fn key_up(&mut self, chord: &Chord, now: Instant) -> Dispatch {
        let exact = self
            .registry
            .lookup(&chord.to_string())
            .map(|action| (action, chord.clone()))
            .filter(|entry| self.held.contains(entry));

        // A modifier let go before the key changes the chord we see here;
        // fall back to whichever held chord uses the same key.
        let entry = exact.or_else(|| {
            self.held
                .iter()
                .find(|(_, held)| held.key().is_some() && held.key() == chord.key())
                .cloned()
        });

        match entry {
            Some(entry) => {
                self.held.remove(&entry);
                let action = entry.0;
                self.last_release.insert(action, now);
                debug!(%action, "hotkey released");
                Dispatch::Emit(HotkeyEvent::Released(action))
            }
            None if self.registry.lookup(&chord.to_string()).is_some() => Dispatch::Suppressed,
            None => Dispatch::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let play = Chord::parse("ctrl+alt+p").unwrap();
        let ff = Chord::parse("ctrl+alt+right").unwrap();
        let registry = HotkeyRegistry::from_bindings([
            (HotkeyAction::TogglePlayPause, &play),
            (HotkeyAction::FastForward, &ff),
        ]);
        Dispatcher::new(Arc::new(registry), DEFAULT_DEBOUNCE)
    }

    fn chord(s: &str) -> Chord {
        Chord::parse(s).unwrap()
    }

    #[test]
    fn test_key_repeat_emits_single_press() {
        let mut d = dispatcher();
        let start = Instant::now();
        let play = chord("alt+ctrl+p");

        let emitted: Vec<_> = (0..5)
            .map(|i| d.handle(KeyEdge::Down, &play, start + Duration::from_millis(i * 30)))
            .filter(|r| matches!(r, Dispatch::Emit(_)))
            .collect();
        assert_eq!(
            emitted,
            vec![Dispatch::Emit(HotkeyEvent::Pressed(HotkeyAction::TogglePlayPause))]
        );

        let up = d.handle(KeyEdge::Up, &play, start + Duration::from_millis(200));
        assert_eq!(up, Dispatch::Emit(HotkeyEvent::Released(HotkeyAction::TogglePlayPause)));
    }

    #[test]
    fn test_press_inside_debounce_window_suppressed() {
        let mut d = dispatcher();
        let start = Instant::now();
        let play = chord("alt+ctrl+p");

        d.handle(KeyEdge::Down, &play, start);
        d.handle(KeyEdge::Up, &play, start + Duration::from_millis(10));

        let early = d.handle(KeyEdge::Down, &play, start + Duration::from_millis(60));
        assert_eq!(early, Dispatch::Suppressed);
        assert!(early.consumed());

        let late = d.handle(KeyEdge::Down, &play, start + Duration::from_millis(120));
        assert_eq!(late, Dispatch::Emit(HotkeyEvent::Pressed(HotkeyAction::TogglePlayPause)));
    }

    #[test]
    fn test_unregistered_chord_passes_through() {
        let mut d = dispatcher();
        let now = Instant::now();
        let other = chord("ctrl+c");
        assert_eq!(d.handle(KeyEdge::Down, &other, now), Dispatch::PassThrough);
        assert!(!d.handle(KeyEdge::Up, &other, now).consumed());
    }

    #[test]
    fn test_release_after_modifier_let_go() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.handle(KeyEdge::Down, &chord("alt+ctrl+right"), now);

        // ctrl released first, so the key-up arrives as alt+right
        let up = d.handle(KeyEdge::Up, &chord("alt+right"), now + Duration::from_millis(300));
        assert_eq!(up, Dispatch::Emit(HotkeyEvent::Released(HotkeyAction::FastForward)));
        assert!(d.held.is_empty());
    }

    #[test]
    fn test_actions_are_independent() {
        let mut d = dispatcher();
        let now = Instant::now();
        let play = chord("alt+ctrl+p");
        let ff = chord("alt+ctrl+right");

        d.handle(KeyEdge::Down, &play, now);
        d.handle(KeyEdge::Up, &play, now + Duration::from_millis(5));
        // a different action is not debounced by play's release
        let r = d.handle(KeyEdge::Down, &ff, now + Duration::from_millis(20));
        assert_eq!(r, Dispatch::Emit(HotkeyEvent::Pressed(HotkeyAction::FastForward)));
    }

    #[test]
    fn test_registry_swap_keeps_held_chord() {
        let mut d = dispatcher();
        let now = Instant::now();
        let play = chord("alt+ctrl+p");
        d.handle(KeyEdge::Down, &play, now);

        let registry = Arc::clone(&d.registry);
        d.replace_registry(registry);
        // still a repeat of the same physical press
        let repeat = d.handle(KeyEdge::Down, &play, now + Duration::from_millis(30));
        assert_eq!(repeat, Dispatch::Suppressed);

        let up = d.handle(KeyEdge::Up, &play, now + Duration::from_millis(60));
        assert_eq!(up, Dispatch::Emit(HotkeyEvent::Released(HotkeyAction::TogglePlayPause)));
    }

    #[test]
    fn test_chord_unbound_while_held_still_releases() {
        let mut d = dispatcher();
        let now = Instant::now();
        let ff = chord("alt+ctrl+right");
        d.handle(KeyEdge::Down, &ff, now);

        let play = chord("ctrl+alt+p");
        d.replace_registry(Arc::new(HotkeyRegistry::from_bindings([(
            HotkeyAction::TogglePlayPause,
            &play,
        )])));

        let up = d.handle(KeyEdge::Up, &ff, now + Duration::from_millis(400));
        assert_eq!(up, Dispatch::Emit(HotkeyEvent::Released(HotkeyAction::FastForward)));
        assert!(d.held.is_empty());
    }

    #[test]
    fn test_orphan_key_up_is_consumed_without_event() {
        let mut d = dispatcher();
        let up = d.handle(KeyEdge::Up, &chord("alt+ctrl+p"), Instant::now());
        assert_eq!(up, Dispatch::Suppressed);
    }
}
