//! Turns file-browser selections into preview commands
//!
//! Only audio files are previewed. Reporting the same file again does not
//! restart it, and moving the selection off audio stops what the previous
//! selection started.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::audio::AudioCommand;

/// Extensions previewed on selection, compared case-insensitively
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma", "aiff", "opus",
];

/// Existing regular file with one of the audio extensions
pub fn is_audio_file(path: &Path) -> bool {
    let audio = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)));
    audio && path.is_file()
}

/// Identity of a selected file: its path plus size, so a file rewritten
/// in place counts as a new selection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    size: Option<u64>,
}

impl Fingerprint {
    fn of(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            size: std::fs::metadata(path).ok().map(|m| m.len()),
        }
    }
}

#[derive(Debug, Default)]
pub struct SelectionFilter {
    last: Option<Fingerprint>,
}

impl SelectionFilter {
    /// Command for a new selection, `None` for nothing selected
    pub fn select(&mut self, path: Option<&Path>) -> Option<AudioCommand> {
        match path {
            Some(path) if is_audio_file(path) => {
                let fingerprint = Fingerprint::of(path);
                if self.last.as_ref() == Some(&fingerprint) {
                    debug!(path = %path.display(), "same file selected again");
                    return None;
                }
                self.last = Some(fingerprint);
                Some(AudioCommand::Play(path.to_path_buf()))
            }
            _ => {
                // only stop playback this filter started
                let previous = self.last.take()?;
                debug!(previous = %previous.path.display(), "selection left audio, stopping");
                Some(AudioCommand::Stop)
            }
        }
    }

    /// Forget the last selection
    pub fn reset(&mut self) {
        self.last = None;
    }
}
