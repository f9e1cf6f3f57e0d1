//! Run-time chord -> action lookup table

use std::collections::HashMap;

use tracing::{debug, info};

use super::bindings::HotkeyAction;
use super::chord::Chord;

/// Immutable chord lookup built from the current bindings.
///
/// Never patched in place: every binding change produces a fresh
/// registry that replaces the old one wholesale.
#[derive(Debug, Clone, Default)]
pub struct HotkeyRegistry {
    mapping: HashMap<String, HotkeyAction>,
}

impl HotkeyRegistry {
    /// Build the registry from `(action, chord)` pairs, skipping unbound actions
    pub fn from_bindings<'a, I>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (HotkeyAction, &'a Chord)>,
    {
        let mut mapping = HashMap::new();
        for (action, chord) in bindings {
            if chord.is_empty() {
                continue;
            }
            let key = chord.to_string();
            debug!(%action, chord = %key, "registered hotkey");
            mapping.insert(key, action);
        }
        info!(count = mapping.len(), "hotkey registry rebuilt");
        Self { mapping }
    }

    /// Resolve a canonical chord string
    pub fn lookup(&self, chord: &str) -> Option<HotkeyAction> {
        self.mapping.get(chord).copied()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_actions_are_skipped() {
        let play = Chord::parse("ctrl+alt+p").unwrap();
        let empty = Chord::empty();
        let registry = HotkeyRegistry::from_bindings([
            (HotkeyAction::TogglePlayPause, &play),
            (HotkeyAction::Rewind, &empty),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alt+ctrl+p"), Some(HotkeyAction::TogglePlayPause));
        assert_eq!(registry.lookup("ctrl+alt+p"), None);
        assert_eq!(registry.lookup(""), None);
    }
}
