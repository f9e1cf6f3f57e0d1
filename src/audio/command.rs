//! Playback command queue
//!
//! Unbounded FIFO between any producer (controller, UI bridge) and the
//! single playback worker. Commands are never coalesced or reordered.

use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A request for the playback worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arg", rename_all = "snake_case")]
pub enum AudioCommand {
    Play(PathBuf),
    Stop,
    /// Stop and forget the last-played file
    StopAndClear,
    Pause,
    Resume,
    TogglePlayPause,
    /// Relative seek in seconds
    Seek(f64),
    Quit,
}

/// Cloneable producer handle for the command queue
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<AudioCommand>,
}

impl CommandSender {
    /// Enqueue a command. Never blocks; returns `false` once the worker is gone.
    pub fn send(&self, command: AudioCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(command = ?e.into_inner(), "playback worker gone, command dropped");
                false
            }
        }
    }

    pub fn play(&self, path: impl Into<PathBuf>) -> bool {
        self.send(AudioCommand::Play(path.into()))
    }

    pub fn seek(&self, delta_seconds: f64) -> bool {
        self.send(AudioCommand::Seek(delta_seconds))
    }
}

/// Create the command queue
pub fn channel() -> (CommandSender, Receiver<AudioCommand>) {
    let (tx, rx) = unbounded();
    (CommandSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_without_coalescing() {
        let (tx, rx) = channel();
        tx.seek(1.0);
        tx.seek(1.0);
        tx.send(AudioCommand::Pause);
        tx.play("a.wav");

        let drained: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            drained,
            vec![
                AudioCommand::Seek(1.0),
                AudioCommand::Seek(1.0),
                AudioCommand::Pause,
                AudioCommand::Play(PathBuf::from("a.wav")),
            ]
        );
    }

    #[test]
    fn test_send_after_worker_exit() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(!tx.send(AudioCommand::Stop));
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&AudioCommand::Seek(-1.0)).unwrap();
        assert_eq!(json, r#"{"command":"seek","arg":-1.0}"#);
        let cmd: AudioCommand = serde_json::from_str(r#"{"command":"stop"}"#).unwrap();
        assert_eq!(cmd, AudioCommand::Stop);
    }
}
