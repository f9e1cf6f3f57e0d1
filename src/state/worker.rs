//! Playback worker thread
//!
//! The single consumer of the command queue. It builds the backend on its
//! own thread (audio device handles are not `Send` on every platform) and
//! polls it for end of media whenever the queue goes quiet.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use super::machine::{PlaybackSnapshot, Player, PlayerOptions};
use crate::audio::{AudioCommand, BackendFactory, MediaBackend};
use crate::events::AppEvent;

/// Spawn the `playback-worker` thread
pub fn spawn<B>(
    factory: BackendFactory<B>,
    commands: Receiver<AudioCommand>,
    options: PlayerOptions,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    event_tx: broadcast::Sender<AppEvent>,
) -> io::Result<JoinHandle<()>>
where
    B: MediaBackend + 'static,
{
    thread::Builder::new()
        .name("playback-worker".to_string())
        .spawn(move || {
            let backend = match factory() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    error!(error = %e, "audio backend unavailable, playback disabled");
                    None
                }
            };

            let mut player = Player::new(backend, options, snapshot_tx, event_tx);
            info!("playback worker started");
            run(&mut player, &commands, options);
            info!(status = %player.status(), "playback worker stopped");
        })
}

fn run<B: MediaBackend>(
    player: &mut Player<B>,
    commands: &Receiver<AudioCommand>,
    options: PlayerOptions,
) {
    loop {
        match commands.recv_timeout(options.poll_interval) {
            Ok(command) => {
                if player.apply(command).is_break() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => player.poll_backend(),
            Err(RecvTimeoutError::Disconnected) => {
                info!("command queue closed");
                let _ = player.apply(AudioCommand::Quit);
                break;
            }
        }
    }
}
