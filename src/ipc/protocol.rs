//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::events::AppEvent;
use crate::hotkey::HotkeyAction;
use crate::state::PlaybackSnapshot;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to event notifications
    Subscribe,

    /// Current file-browser selection; acted on only while monitoring
    Preview {
        #[serde(default)]
        path: Option<PathBuf>,
    },

    /// Play unconditionally
    Play { path: PathBuf },
    Stop,
    Pause,
    Resume,
    TogglePlayPause,
    Seek { seconds: f64 },

    ToggleMonitor,
    ToggleVisibility,
    Exit,

    ListBindings,
    GetBinding { action: HotkeyAction },
    /// Key tokens the settings dialog may offer
    ListKeys,
    SetBinding {
        action: HotkeyAction,
        #[serde(default)]
        modifiers: Vec<String>,
        key: String,
    },
    ResetBindings,

    /// Attach comma-separated labels to a file
    AddLabels { path: PathBuf, labels: String },
    SearchLabel { query: String },
    GetLabels { path: PathBuf },
}

/// One row of the hotkey settings table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub action: HotkeyAction,
    pub name: String,
    /// Canonical chord string, empty when unbound
    pub chord: String,
    /// Modifier names as the settings dialog shows them
    pub modifiers: Vec<String>,
    pub key: String,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Request accepted
    Ok,

    Bindings { bindings: Vec<BindingInfo> },

    Binding(BindingInfo),

    Keys { keys: Vec<String> },

    BindingUpdated {
        action: HotkeyAction,
        chord: String,
        /// False when the change could not be written to disk
        persisted: bool,
    },

    LabelsAdded { count: usize },

    SearchResults { paths: Vec<PathBuf> },

    Labels { labels: Vec<String> },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl ToString, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: AppEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Whether the global keyboard hook is installed
    pub hotkeys_active: bool,

    pub monitoring: bool,
    pub visible: bool,

    pub playback: PlaybackSnapshot,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: 0,
            hotkeys_active: false,
            monitoring: false,
            visible: true,
            playback: PlaybackSnapshot::default(),
        }
    }
}
