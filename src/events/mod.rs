//! Events module for the UI event channel
//!
//! Every observable change in the daemon is broadcast as an [`AppEvent`].
//! The UI bridge forwards them verbatim to subscribed clients.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hotkey::HotkeyAction;
use crate::state::PlaybackSnapshot;

/// Failure categories surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ChordConflict,
    SystemConflict,
    InvalidChord,
    BindingPersistFailure,
    MediaLoadFailure,
    MediaSeekUnsupported,
    BackendUnavailable,
    HookInstallFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ChordConflict => "CHORD_CONFLICT",
            ErrorKind::SystemConflict => "SYSTEM_CONFLICT",
            ErrorKind::InvalidChord => "INVALID_CHORD",
            ErrorKind::BindingPersistFailure => "BINDING_PERSIST_FAILURE",
            ErrorKind::MediaLoadFailure => "MEDIA_LOAD_FAILURE",
            ErrorKind::MediaSeekUnsupported => "MEDIA_SEEK_UNSUPPORTED",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::HookInstallFailure => "HOOK_INSTALL_FAILURE",
        };
        f.write_str(name)
    }
}

/// Which label dialog the UI should open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPromptKind {
    Add,
    Search,
}

/// Events broadcast to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    HotkeyPressed {
        action: HotkeyAction,
    },

    HotkeyReleased {
        action: HotkeyAction,
    },

    /// Published by the playback worker after every state change
    PlaybackStateChanged {
        #[serde(flatten)]
        snapshot: PlaybackSnapshot,
    },

    MonitoringChanged {
        enabled: bool,
    },

    VisibilityChanged {
        visible: bool,
    },

    /// Ask the UI for label input. `path` is the file being labelled
    /// for `add` and absent for `search`.
    LabelPrompt {
        kind: LabelPromptKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },

    BindingsChanged,

    Notification {
        kind: ErrorKind,
        message: String,
    },
}

impl AppEvent {
    pub fn notification(kind: ErrorKind, message: impl Into<String>) -> Self {
        AppEvent::Notification {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEvent::HotkeyPressed { action } => write!(f, "HOTKEY_PRESSED ({action})"),
            AppEvent::HotkeyReleased { action } => write!(f, "HOTKEY_RELEASED ({action})"),
            AppEvent::PlaybackStateChanged { snapshot } => {
                write!(f, "PLAYBACK_STATE_CHANGED ({})", snapshot.status)
            }
            AppEvent::MonitoringChanged { enabled } => write!(f, "MONITORING_CHANGED ({enabled})"),
            AppEvent::VisibilityChanged { visible } => write!(f, "VISIBILITY_CHANGED ({visible})"),
            AppEvent::LabelPrompt { kind, .. } => write!(f, "LABEL_PROMPT ({kind:?})"),
            AppEvent::BindingsChanged => write!(f, "BINDINGS_CHANGED"),
            AppEvent::Notification { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlaybackStatus;

    #[test]
    fn test_event_serialization() {
        let event = AppEvent::notification(ErrorKind::MediaLoadFailure, "no such file");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"notification\""));
        assert!(json.contains("\"kind\":\"media_load_failure\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"hotkey_pressed","action":"exit_application"}"#;
        let event: AppEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            AppEvent::HotkeyPressed {
                action: HotkeyAction::Exit
            }
        );
    }

    #[test]
    fn test_playback_event_is_flat() {
        let event = AppEvent::PlaybackStateChanged {
            snapshot: PlaybackSnapshot {
                status: PlaybackStatus::Paused,
                current_file: Some(PathBuf::from("a.mp3")),
                last_played: Some(PathBuf::from("a.mp3")),
                duration_ms: Some(1200),
                position_ms: 300,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "playback_state_changed");
        assert_eq!(value["status"], "paused");
        assert_eq!(value["duration_ms"], 1200);
    }

    #[test]
    fn test_label_prompt_omits_missing_path() {
        let event = AppEvent::LabelPrompt {
            kind: LabelPromptKind::Search,
            path: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"label_prompt","kind":"search"}"#);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::HookInstallFailure.to_string(), "HOOK_INSTALL_FAILURE");
    }
}
