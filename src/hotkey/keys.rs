//! Modifier key definitions and state tracking
//!
//! Provides the modifier vocabulary shared by the normalizer and the
//! key listener, a struct for tracking which modifiers are held, and
//! the fixed table that maps UI key tokens to listener key names.

use std::fmt;

/// A modifier key, declared in canonical serialization order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Alt,
    Ctrl,
    Shift,
    Win,
}

impl Modifier {
    /// All modifiers in canonical order (Alt, Ctrl, Shift, Win)
    pub const CANONICAL_ORDER: [Modifier; 4] =
        [Modifier::Alt, Modifier::Ctrl, Modifier::Shift, Modifier::Win];

    /// Order used when showing modifiers in the UI
    pub const DISPLAY_ORDER: [Modifier; 4] =
        [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Win];

    /// Name used in canonical chord strings
    pub fn canonical_name(self) -> &'static str {
        match self {
            Modifier::Alt => "alt",
            Modifier::Ctrl => "ctrl",
            Modifier::Shift => "shift",
            Modifier::Win => "windows",
        }
    }

    /// Name shown by the UI
    pub fn display_name(self) -> &'static str {
        match self {
            Modifier::Alt => "Alt",
            Modifier::Ctrl => "Ctrl",
            Modifier::Shift => "Shift",
            Modifier::Win => "Win",
        }
    }

    /// Parse a modifier from either a UI or a canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "alt" => Some(Modifier::Alt),
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "shift" => Some(Modifier::Shift),
            "win" | "windows" => Some(Modifier::Win),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierState {
    /// Alt key is held
    pub alt: bool,
    /// Control key is held
    pub ctrl: bool,
    /// Shift key is held
    pub shift: bool,
    /// Windows key is held
    pub win: bool,
}

impl ModifierState {
    /// Build a state with the given modifiers held
    pub fn from_modifiers<I: IntoIterator<Item = Modifier>>(modifiers: I) -> Self {
        let mut state = Self::default();
        for modifier in modifiers {
            state.set(modifier, true);
        }
        state
    }

    /// Record a modifier going down or up
    pub fn set(&mut self, modifier: Modifier, held: bool) {
        match modifier {
            Modifier::Alt => self.alt = held,
            Modifier::Ctrl => self.ctrl = held,
            Modifier::Shift => self.shift = held,
            Modifier::Win => self.win = held,
        }
    }

    /// Check whether a modifier is held
    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Alt => self.alt,
            Modifier::Ctrl => self.ctrl,
            Modifier::Shift => self.shift,
            Modifier::Win => self.win,
        }
    }

    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        !self.alt && !self.ctrl && !self.shift && !self.win
    }

    /// Held modifiers in canonical order
    pub fn canonical(&self) -> impl Iterator<Item = Modifier> + '_ {
        Modifier::CANONICAL_ORDER
            .into_iter()
            .filter(move |m| self.contains(*m))
    }

    /// Held modifiers in UI order
    pub fn display(&self) -> impl Iterator<Item = Modifier> + '_ {
        Modifier::DISPLAY_ORDER
            .into_iter()
            .filter(move |m| self.contains(*m))
    }
}

/// UI key token -> listener key name for every non-alphanumeric key the
/// settings UI offers.
const NAMED_KEYS: &[(&str, &str)] = &[
    ("Space", "space"),
    ("Return", "enter"),
    ("Escape", "esc"),
    ("Tab", "tab"),
    ("Delete", "delete"),
    ("Insert", "insert"),
    ("Home", "home"),
    ("End", "end"),
    ("PageUp", "page up"),
    ("PageDown", "page down"),
    ("Left", "left"),
    ("Right", "right"),
    ("Up", "up"),
    ("Down", "down"),
    ("PrintScreen", "print screen"),
    ("CapsLock", "caps lock"),
    ("NumLock", "num lock"),
    ("ScrollLock", "scroll lock"),
    ("F1", "f1"),
    ("F2", "f2"),
    ("F3", "f3"),
    ("F4", "f4"),
    ("F5", "f5"),
    ("F6", "f6"),
    ("F7", "f7"),
    ("F8", "f8"),
    ("F9", "f9"),
    ("F10", "f10"),
    ("F11", "f11"),
    ("F12", "f12"),
];

/// Every UI token in the named-key table
pub fn named_key_tokens() -> impl Iterator<Item = &'static str> {
    NAMED_KEYS.iter().map(|(ui, _)| *ui)
}

/// Map a UI key token (or an already canonical key name) to its
/// canonical listener name. Returns `None` for unknown tokens.
pub fn canonical_key_name(token: &str) -> Option<String> {
    let token = token.trim();

    if let Some((_, canonical)) = NAMED_KEYS.iter().find(|(ui, _)| *ui == token) {
        return Some((*canonical).to_string());
    }

    let lower = token.to_ascii_lowercase();
    if let Some((_, canonical)) = NAMED_KEYS.iter().find(|(_, c)| *c == lower) {
        return Some((*canonical).to_string());
    }

    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase().to_string()),
        _ => None,
    }
}

/// Map a canonical key name back to the token the UI shows
pub fn display_key_name(canonical: &str) -> String {
    NAMED_KEYS
        .iter()
        .find(|(_, c)| *c == canonical)
        .map(|(ui, _)| (*ui).to_string())
        .unwrap_or_else(|| canonical.to_ascii_uppercase())
}

/// Windows virtual-key code for a canonical key name
pub fn virtual_key_code(canonical: &str) -> Option<u32> {
    let code = match canonical {
        "space" => 0x20,
        "enter" => 0x0D,
        "esc" => 0x1B,
        "tab" => 0x09,
        "delete" => 0x2E,
        "insert" => 0x2D,
        "home" => 0x24,
        "end" => 0x23,
        "page up" => 0x21,
        "page down" => 0x22,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "print screen" => 0x2C,
        "caps lock" => 0x14,
        "num lock" => 0x90,
        "scroll lock" => 0x91,
        other => {
            if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
                return (1..=24).contains(&n).then(|| 0x70 + n - 1);
            }
            let mut chars = other.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => {
                    Some(c.to_ascii_uppercase() as u32)
                }
                _ => None,
            };
        }
    };
    Some(code)
}

/// A raw keyboard event from the hook, reduced to what the dispatcher needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// A modifier key changed state
    Modifier(Modifier),
    /// A non-modifier key, by canonical name
    Key(String),
}

#[cfg(windows)]
pub mod platform {
    //! rdev key -> `KeyInput` mapping for the Windows hook

    use rdev::Key;

    use super::{KeyInput, Modifier};

    pub fn key_input(key: Key) -> Option<KeyInput> {
        let modifier = match key {
            Key::Alt | Key::AltGr => Some(Modifier::Alt),
            Key::ControlLeft | Key::ControlRight => Some(Modifier::Ctrl),
            Key::ShiftLeft | Key::ShiftRight => Some(Modifier::Shift),
            Key::MetaLeft | Key::MetaRight => Some(Modifier::Win),
            _ => None,
        };
        if let Some(modifier) = modifier {
            return Some(KeyInput::Modifier(modifier));
        }

        let name = match key {
            Key::Space => "space",
            Key::Return => "enter",
            Key::Escape => "esc",
            Key::Tab => "tab",
            Key::Delete => "delete",
            Key::Insert => "insert",
            Key::Home => "home",
            Key::End => "end",
            Key::PageUp => "page up",
            Key::PageDown => "page down",
            Key::LeftArrow => "left",
            Key::RightArrow => "right",
            Key::UpArrow => "up",
            Key::DownArrow => "down",
            Key::PrintScreen => "print screen",
            Key::CapsLock => "caps lock",
            Key::NumLock => "num lock",
            Key::ScrollLock => "scroll lock",
            Key::F1 => "f1",
            Key::F2 => "f2",
            Key::F3 => "f3",
            Key::F4 => "f4",
            Key::F5 => "f5",
            Key::F6 => "f6",
            Key::F7 => "f7",
            Key::F8 => "f8",
            Key::F9 => "f9",
            Key::F10 => "f10",
            Key::F11 => "f11",
            Key::F12 => "f12",
            Key::KeyA => "a",
            Key::KeyB => "b",
            Key::KeyC => "c",
            Key::KeyD => "d",
            Key::KeyE => "e",
            Key::KeyF => "f",
            Key::KeyG => "g",
            Key::KeyH => "h",
            Key::KeyI => "i",
            Key::KeyJ => "j",
            Key::KeyK => "k",
            Key::KeyL => "l",
            Key::KeyM => "m",
            Key::KeyN => "n",
            Key::KeyO => "o",
            Key::KeyP => "p",
            Key::KeyQ => "q",
            Key::KeyR => "r",
            Key::KeyS => "s",
            Key::KeyT => "t",
            Key::KeyU => "u",
            Key::KeyV => "v",
            Key::KeyW => "w",
            Key::KeyX => "x",
            Key::KeyY => "y",
            Key::KeyZ => "z",
            Key::Num0 => "0",
            Key::Num1 => "1",
            Key::Num2 => "2",
            Key::Num3 => "3",
            Key::Num4 => "4",
            Key::Num5 => "5",
            Key::Num6 => "6",
            Key::Num7 => "7",
            Key::Num8 => "8",
            Key::Num9 => "9",
            _ => return None,
        };
        Some(KeyInput::Key(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let state = ModifierState::default();
        assert!(state.is_empty());
        assert_eq!(state.canonical().count(), 0);
    }

    #[test]
    fn test_canonical_and_display_order() {
        let state = ModifierState::from_modifiers([Modifier::Win, Modifier::Ctrl, Modifier::Alt]);
        let canonical: Vec<_> = state.canonical().collect();
        assert_eq!(canonical, vec![Modifier::Alt, Modifier::Ctrl, Modifier::Win]);
        let display: Vec<_> = state.display().collect();
        assert_eq!(display, vec![Modifier::Ctrl, Modifier::Alt, Modifier::Win]);
    }

    #[test]
    fn test_set_and_release() {
        let mut state = ModifierState::default();
        state.set(Modifier::Shift, true);
        assert!(state.contains(Modifier::Shift));
        state.set(Modifier::Shift, false);
        assert!(state.is_empty());
    }

    #[test]
    fn test_modifier_names() {
        assert_eq!(Modifier::from_name("Ctrl"), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_name("control"), Some(Modifier::Ctrl));
        assert_eq!(Modifier::from_name("Win"), Some(Modifier::Win));
        assert_eq!(Modifier::from_name("windows"), Some(Modifier::Win));
        assert_eq!(Modifier::from_name("hyper"), None);
    }

    #[test]
    fn test_key_token_mapping() {
        assert_eq!(canonical_key_name("T").as_deref(), Some("t"));
        assert_eq!(canonical_key_name("7").as_deref(), Some("7"));
        assert_eq!(canonical_key_name("Return").as_deref(), Some("enter"));
        assert_eq!(canonical_key_name("Escape").as_deref(), Some("esc"));
        assert_eq!(canonical_key_name("PageUp").as_deref(), Some("page up"));
        assert_eq!(canonical_key_name("page up").as_deref(), Some("page up"));
        assert_eq!(canonical_key_name("F5").as_deref(), Some("f5"));
        assert_eq!(canonical_key_name("Banana"), None);
        assert_eq!(canonical_key_name("é"), None);
    }

    #[test]
    fn test_display_key_name() {
        assert_eq!(display_key_name("page up"), "PageUp");
        assert_eq!(display_key_name("enter"), "Return");
        assert_eq!(display_key_name("t"), "T");
        assert_eq!(display_key_name("f12"), "F12");
    }

    #[test]
    fn test_virtual_key_codes() {
        assert_eq!(virtual_key_code("t"), Some(0x54));
        assert_eq!(virtual_key_code("0"), Some(0x30));
        assert_eq!(virtual_key_code("f1"), Some(0x70));
        assert_eq!(virtual_key_code("f24"), Some(0x87));
        assert_eq!(virtual_key_code("f25"), None);
        assert_eq!(virtual_key_code("page down"), Some(0x22));
        assert_eq!(virtual_key_code("right"), Some(0x27));
        assert_eq!(virtual_key_code("nope"), None);
    }
}
