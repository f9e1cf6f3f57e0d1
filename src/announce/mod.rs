//! Screen reader announcements
//!
//! Only a closed set of phrases is ever spoken. Each supported screen
//! reader is reached through its vendor client DLL; a missing DLL or a
//! reader that is not running simply means silence.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(windows)]
mod windows;

/// Everything the daemon may say
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    MonitoringStarted,
    MonitoringStopped,
    WindowHidden,
    WindowShown,
}

impl Phrase {
    pub fn text(self) -> &'static str {
        match self {
            Phrase::MonitoringStarted => "Monitoring started",
            Phrase::MonitoringStopped => "Monitoring stopped",
            Phrase::WindowHidden => "Hidden",
            Phrase::WindowShown => "Shown",
        }
    }
}

/// Speaks phrases to whoever is listening
pub trait Announcer: Send + Sync {
    fn speak(&self, phrase: Phrase);
    /// Cancel any speech in progress
    fn stop(&self);
}

/// One screen reader's client API
pub trait ScreenReader: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_running(&self) -> bool;
    fn speak(&self, text: &str);
    fn cancel(&self);
}

/// Which screen readers receive announcements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    None,
    Nvda,
    Zdsr,
    /// Every reader whose client loaded
    #[default]
    Broadcast,
    /// The first running reader, ZDSR preferred
    Auto,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Strategy::None),
            "nvda" => Ok(Strategy::Nvda),
            "zdsr" => Ok(Strategy::Zdsr),
            "broadcast" => Ok(Strategy::Broadcast),
            "auto" => Ok(Strategy::Auto),
            other => Err(format!("unknown announcer strategy `{other}`")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::None => "none",
            Strategy::Nvda => "nvda",
            Strategy::Zdsr => "zdsr",
            Strategy::Broadcast => "broadcast",
            Strategy::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Announcer backed by zero or more screen reader clients
pub struct ScreenReaderAnnouncer {
    readers: Vec<Box<dyn ScreenReader>>,
}

impl ScreenReaderAnnouncer {
    /// Load the clients `strategy` asks for from `dll_dir`
    pub fn load(strategy: Strategy, dll_dir: &Path) -> Self {
        let available = match strategy {
            Strategy::None => Vec::new(),
            Strategy::Nvda => load_nvda(dll_dir).into_iter().collect(),
            Strategy::Zdsr => load_zdsr(dll_dir).into_iter().collect(),
            Strategy::Broadcast | Strategy::Auto => load_zdsr(dll_dir)
                .into_iter()
                .chain(load_nvda(dll_dir))
                .collect(),
        };
        Self::with_readers(strategy, available)
    }

    /// Apply `strategy` to already loaded readers (ZDSR first)
    pub fn with_readers(strategy: Strategy, readers: Vec<Box<dyn ScreenReader>>) -> Self {
        let readers: Vec<_> = if strategy == Strategy::Auto {
            readers.into_iter().find(|r| r.is_running()).into_iter().collect()
        } else {
            readers
        };

        let names: Vec<_> = readers.iter().map(|r| r.name()).collect();
        info!(%strategy, readers = ?names, "announcer ready");
        Self { readers }
    }

    pub fn is_silent(&self) -> bool {
        self.readers.is_empty()
    }
}

impl Announcer for ScreenReaderAnnouncer {
    fn speak(&self, phrase: Phrase) {
        debug!(?phrase, "announcing");
        for reader in &self.readers {
            reader.speak(phrase.text());
        }
    }

    fn stop(&self) {
        for reader in &self.readers {
            reader.cancel();
        }
    }
}

#[cfg(windows)]
fn load_nvda(dir: &Path) -> Option<Box<dyn ScreenReader>> {
    windows::NvdaClient::load(dir).map(|c| Box::new(c) as Box<dyn ScreenReader>)
}

#[cfg(windows)]
fn load_zdsr(dir: &Path) -> Option<Box<dyn ScreenReader>> {
    windows::ZdsrClient::load(dir).map(|c| Box::new(c) as Box<dyn ScreenReader>)
}

#[cfg(not(windows))]
fn load_nvda(_dir: &Path) -> Option<Box<dyn ScreenReader>> {
    None
}

#[cfg(not(windows))]
fn load_zdsr(_dir: &Path) -> Option<Box<dyn ScreenReader>> {
    None
}
