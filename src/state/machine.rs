//! Playback state machine
//!
//! Owns the media backend and the authoritative `PlaybackState`. Commands
//! are applied strictly one at a time; every status change is published
//! as a snapshot on a watch channel and as an `AppEvent` on the broadcast
//! channel. Failures never stop the machine, they become notifications.

use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::audio::{AudioCommand, BackendError, BackendState, MediaBackend};
use crate::events::{AppEvent, ErrorKind};

/// The three playback states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackStatus::Stopped => write!(f, "Stopped"),
            PlaybackStatus::Playing => write!(f, "Playing"),
            PlaybackStatus::Paused => write!(f, "Paused"),
        }
    }
}

/// Read-only copy of the playback state handed to other threads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub current_file: Option<PathBuf>,
    pub last_played: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub position_ms: u64,
}

/// Timing knobs for the worker
#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    /// Idle time after which the backend is polled for end of media
    pub poll_interval: Duration,
    /// Upper bound on waiting for a freshly loaded file's duration
    pub probe_timeout: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

const PROBE_STEP: Duration = Duration::from_millis(10);

/// The playback state machine
pub struct Player<B> {
    /// `None` when the backend could not be created
    backend: Option<B>,
    status: PlaybackStatus,
    current_file: Option<PathBuf>,
    last_played: Option<PathBuf>,
    duration_ms: Option<u64>,
    options: PlayerOptions,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    event_tx: broadcast::Sender<AppEvent>,
}

impl<B: MediaBackend> Player<B> {
    pub fn new(
        backend: Option<B>,
        options: PlayerOptions,
        snapshot_tx: watch::Sender<PlaybackSnapshot>,
        event_tx: broadcast::Sender<AppEvent>,
    ) -> Self {
        Self {
            backend,
            status: PlaybackStatus::Stopped,
            current_file: None,
            last_played: None,
            duration_ms: None,
            options,
            snapshot_tx,
            event_tx,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let position_ms = match (&self.backend, self.status) {
            (Some(backend), PlaybackStatus::Playing | PlaybackStatus::Paused) => {
                backend.position_ms().unwrap_or(0)
            }
            _ => 0,
        };
        PlaybackSnapshot {
            status: self.status,
            current_file: self.current_file.clone(),
            last_played: self.last_played.clone(),
            duration_ms: self.duration_ms,
            position_ms,
        }
    }

    /// Apply one command. `Break` means the worker should exit.
    pub fn apply(&mut self, command: AudioCommand) -> ControlFlow<()> {
        debug!(?command, status = %self.status, "applying command");

        if self.backend.is_none() {
            if command == AudioCommand::Quit {
                return ControlFlow::Break(());
            }
            self.notify(
                ErrorKind::BackendUnavailable,
                format!("cannot {}: audio output is unavailable", command_name(&command)),
            );
            return ControlFlow::Continue(());
        }

        match command {
            AudioCommand::Play(path) => self.play(path),
            AudioCommand::Stop => self.stop(false),
            AudioCommand::StopAndClear => self.stop(true),
            AudioCommand::Pause => self.pause(),
            AudioCommand::Resume => self.resume(),
            AudioCommand::TogglePlayPause => self.toggle(),
            AudioCommand::Seek(delta) => self.seek(delta),
            AudioCommand::Quit => {
                self.release();
                info!("playback worker quitting");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Called when the queue has been idle for `poll_interval`
    pub fn poll_backend(&mut self) {
        if self.status == PlaybackStatus::Stopped {
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };

        match backend.state() {
            Ok(BackendState::Ended) | Ok(BackendState::Stopped) => {
                info!(file = ?self.current_file, "media finished");
                self.release();
                self.status = PlaybackStatus::Stopped;
                self.current_file = None;
                self.duration_ms = None;
                self.publish();
            }
            Ok(_) => {
                if self.duration_ms.is_none() {
                    if let Ok(Some(ms)) = backend.duration_ms() {
                        debug!(duration_ms = ms, "duration became known");
                        self.duration_ms = Some(ms);
                        self.publish();
                    }
                }
            }
            Err(e) => debug!(error = %e, "backend state query failed"),
        }
    }

    fn play(&mut self, path: PathBuf) {
        self.release();

        if !path.is_file() {
            self.fail_play(&path, format!("not a playable file: {}", path.display()));
            return;
        }

        let result = match self.backend.as_mut() {
            Some(backend) => backend.load(&path).and_then(|_| backend.play()),
            None => Err(BackendError::Unavailable("no backend".into())),
        };
        if let Err(e) = result {
            if let Some(backend) = self.backend.as_mut() {
                let _ = backend.stop();
            }
            self.fail_play(&path, e.to_string());
            return;
        }

        self.duration_ms = self.probe_duration();
        info!(file = %path.display(), duration_ms = ?self.duration_ms, "playing");
        self.status = PlaybackStatus::Playing;
        self.current_file = Some(path.clone());
        self.last_played = Some(path);
        self.publish();
    }

    fn fail_play(&mut self, path: &Path, message: String) {
        warn!(file = %path.display(), error = %message, "play failed");
        self.status = PlaybackStatus::Stopped;
        self.current_file = None;
        self.last_played = None;
        self.duration_ms = None;
        self.publish();
        self.notify(ErrorKind::MediaLoadFailure, message);
    }

    fn probe_duration(&self) -> Option<u64> {
        let backend = self.backend.as_ref()?;
        let deadline = Instant::now() + self.options.probe_timeout;
        loop {
            match backend.duration_ms() {
                Ok(Some(ms)) => return Some(ms),
                Ok(None) if Instant::now() < deadline => thread::sleep(PROBE_STEP),
                Ok(None) => {
                    debug!("duration unknown after probe timeout");
                    return None;
                }
                Err(e) => {
                    debug!(error = %e, "duration probe failed");
                    return None;
                }
            }
        }
    }

    fn stop(&mut self, clear_last: bool) {
        let changed = self.status != PlaybackStatus::Stopped
            || self.current_file.is_some()
            || (clear_last && self.last_played.is_some());

        self.release();
        self.status = PlaybackStatus::Stopped;
        self.current_file = None;
        self.duration_ms = None;
        if clear_last {
            self.last_played = None;
        }

        if changed {
            info!(clear_last, "stopped");
            self.publish();
        } else {
            debug!("stop ignored, already stopped");
        }
    }

    fn pause(&mut self) {
        if self.status != PlaybackStatus::Playing {
            debug!(status = %self.status, "pause ignored");
            return;
        }
        match self.backend.as_mut().map(|b| b.pause()) {
            Some(Ok(())) => {
                self.status = PlaybackStatus::Paused;
                info!("paused");
                self.publish();
            }
            Some(Err(e)) => {
                warn!(error = %e, "backend failed to pause");
                self.notify(ErrorKind::BackendUnavailable, e.to_string());
            }
            None => {}
        }
    }

    fn resume(&mut self) {
        if self.status != PlaybackStatus::Paused {
            debug!(status = %self.status, "resume ignored");
            return;
        }
        match self.backend.as_mut().map(|b| b.resume()) {
            Some(Ok(())) => {
                self.status = PlaybackStatus::Playing;
                info!("resumed");
                self.publish();
            }
            Some(Err(e)) => {
                warn!(error = %e, "backend failed to resume");
                self.notify(ErrorKind::BackendUnavailable, e.to_string());
            }
            None => {}
        }
    }

    fn toggle(&mut self) {
        match self.status {
            PlaybackStatus::Playing => self.pause(),
            PlaybackStatus::Paused => self.resume(),
            PlaybackStatus::Stopped => match self.last_played.clone() {
                Some(path) => self.play(path),
                None => debug!("toggle ignored, nothing to replay"),
            },
        }
    }

    fn seek(&mut self, delta_seconds: f64) {
        if self.status == PlaybackStatus::Stopped {
            debug!(delta_seconds, "seek ignored while stopped");
            return;
        }
        let duration = self.duration_ms;
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        let result = backend.position_ms().and_then(|position| {
            let target = seek_target(position, delta_seconds, duration);
            debug!(position, target, "seeking");
            backend.seek_to(target)
        });

        match result {
            Ok(()) => self.publish(),
            Err(e) => self.notify(ErrorKind::MediaSeekUnsupported, e.to_string()),
        }
    }

    /// Halt and release whatever is loaded
    fn release(&mut self) {
        if self.status == PlaybackStatus::Stopped && self.current_file.is_none() {
            return;
        }
        let result = match self.backend.as_mut() {
            Some(backend) => backend.stop(),
            None => return,
        };
        if let Err(e) = result {
            warn!(error = %e, "backend failed to stop");
            self.notify(ErrorKind::BackendUnavailable, e.to_string());
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        let _ = self
            .event_tx
            .send(AppEvent::PlaybackStateChanged { snapshot });
    }

    fn notify(&self, kind: ErrorKind, message: String) {
        warn!(%kind, %message, "playback notification");
        let _ = self.event_tx.send(AppEvent::notification(kind, message));
    }
}

/// `position + delta`, floored at zero and capped at the duration if known
fn seek_target(position_ms: u64, delta_seconds: f64, duration_ms: Option<u64>) -> u64 {
    let target = (position_ms as f64 + delta_seconds * 1000.0).max(0.0);
    let target = match duration_ms {
        Some(duration) => target.min(duration as f64),
        None => target,
    };
    target.round() as u64
}

fn command_name(command: &AudioCommand) -> &'static str {
    match command {
        AudioCommand::Play(_) => "play",
        AudioCommand::Stop | AudioCommand::StopAndClear => "stop",
        AudioCommand::Pause => "pause",
        AudioCommand::Resume => "resume",
        AudioCommand::TogglePlayPause => "toggle playback",
        AudioCommand::Seek(_) => "seek",
        AudioCommand::Quit => "quit",
    }
}
