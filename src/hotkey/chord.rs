//! Canonical chord representation
//!
//! A chord is a set of modifiers plus one non-modifier key. Its
//! canonical string (`alt+ctrl+shift+windows+<key>`) is what gets
//! persisted, what the registry is keyed by and what the key listener
//! rebuilds from live keyboard state, so all three always agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::keys::{self, Modifier, ModifierState};

/// Errors produced while normalizing a chord
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChordError {
    #[error("chord requires a non-modifier key")]
    MissingKey,

    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),

    #[error("unknown key `{0}`")]
    UnknownKey(String),

    #[error("chord has more than one non-modifier key: `{0}`")]
    MultipleKeys(String),
}

/// A normalized hotkey chord. The default value is the empty chord,
/// which means "unbound".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Chord {
    modifiers: ModifierState,
    key: Option<String>,
}

impl Chord {
    /// The empty (unbound) chord
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize UI selections: modifier names such as `Ctrl`/`Alt` and
    /// one key token such as `T`, `PageUp` or `F5`.
    pub fn from_parts<I, S>(modifiers: I, key: &str) -> Result<Self, ChordError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let held = modifiers
            .into_iter()
            .filter(|name| !name.as_ref().trim().is_empty())
            .map(|name| {
                let name = name.as_ref();
                Modifier::from_name(name).ok_or_else(|| ChordError::UnknownModifier(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let state = ModifierState::from_modifiers(held);

        let key = key.trim();
        if key.is_empty() {
            if state.is_empty() {
                return Ok(Self::empty());
            }
            return Err(ChordError::MissingKey);
        }

        if Modifier::from_name(key).is_some() {
            return Err(ChordError::MissingKey);
        }

        let key = keys::canonical_key_name(key)
            .ok_or_else(|| ChordError::UnknownKey(key.to_string()))?;

        Ok(Self {
            modifiers: state,
            key: Some(key),
        })
    }

    /// Build a chord from live keyboard state and an already canonical key name
    pub fn from_held(modifiers: ModifierState, key: &str) -> Self {
        Self {
            modifiers,
            key: Some(key.to_string()),
        }
    }

    /// Parse a canonical (or differently ordered) chord string
    pub fn parse(s: &str) -> Result<Self, ChordError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::empty());
        }

        let mut modifiers = Vec::new();
        let mut key: Option<&str> = None;
        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            if Modifier::from_name(part).is_some() {
                modifiers.push(part);
            } else if key.replace(part).is_some() {
                return Err(ChordError::MultipleKeys(s.to_string()));
            }
        }

        Self::from_parts(modifiers, key.unwrap_or(""))
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.modifiers.is_empty()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Inverse of `from_parts`: UI modifier names (UI order) and the UI key token
    pub fn display_parts(&self) -> (Vec<&'static str>, String) {
        let modifiers = self.modifiers.display().map(Modifier::display_name).collect();
        let key = self
            .key
            .as_deref()
            .map(keys::display_key_name)
            .unwrap_or_default();
        (modifiers, key)
    }

    /// Windows `RegisterHotKey` modifier flags and virtual-key code
    pub fn win32_parts(&self) -> Option<(u32, u32)> {
        const MOD_ALT: u32 = 0x0001;
        const MOD_CONTROL: u32 = 0x0002;
        const MOD_SHIFT: u32 = 0x0004;
        const MOD_WIN: u32 = 0x0008;

        let vk = keys::virtual_key_code(self.key.as_deref()?)?;
        let flags = self.modifiers.canonical().fold(0, |acc, m| {
            acc | match m {
                Modifier::Alt => MOD_ALT,
                Modifier::Ctrl => MOD_CONTROL,
                Modifier::Shift => MOD_SHIFT,
                Modifier::Win => MOD_WIN,
            }
        });
        Some((flags, vk))
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for modifier in self.modifiers.canonical() {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(modifier.canonical_name())?;
            first = false;
        }
        if let Some(key) = &self.key {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(key)?;
        }
        Ok(())
    }
}

impl FromStr for Chord {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Chord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Chord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Chord::parse(&raw).map_err(serde::de::Error::custom)
    }
}
