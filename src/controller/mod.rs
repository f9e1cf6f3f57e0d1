//! Application controller
//!
//! Consumes hotkey transitions and UI actions, and turns them into playback
//! commands, announcements and UI events. Held fast-forward/rewind keeps
//! seeking on a fixed interval until the key is released.

mod selection;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::announce::{Announcer, Phrase};
use crate::audio::{AudioCommand, CommandSender};
use crate::events::{AppEvent, ErrorKind, LabelPromptKind};
use crate::hotkey::{HotkeyAction, HotkeyEvent};
use crate::state::PlaybackSnapshot;

use self::selection::SelectionFilter;

/// Requests from the UI side that go through the controller
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    ToggleMonitor,
    ToggleVisibility,
    /// Current file-browser selection, `None` when nothing is selected.
    /// Acted on only while monitoring.
    Preview(Option<PathBuf>),
    Exit,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Seconds per seek step
    pub seek_step: f64,
    pub seek_repeat: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            seek_step: 1.0,
            seek_repeat: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    StartRepeat,
    Exit,
}

pub struct Controller {
    commands: CommandSender,
    announcer: Arc<dyn Announcer>,
    events: broadcast::Sender<AppEvent>,
    playback: watch::Receiver<PlaybackSnapshot>,
    options: ControllerOptions,
    monitoring: bool,
    selection: SelectionFilter,
    visible: bool,
    /// Direction of the held seek key, if any
    seeking: Option<HotkeyAction>,
}

impl Controller {
    pub fn new(
        commands: CommandSender,
        announcer: Arc<dyn Announcer>,
        events: broadcast::Sender<AppEvent>,
        playback: watch::Receiver<PlaybackSnapshot>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            commands,
            announcer,
            events,
            playback,
            options,
            monitoring: false,
            selection: SelectionFilter::default(),
            visible: true,
            seeking: None,
        }
    }

    /// Run until an exit is requested or both inputs close
    pub async fn run(
        mut self,
        mut hotkeys: mpsc::UnboundedReceiver<HotkeyEvent>,
        mut ui: mpsc::Receiver<UiAction>,
    ) {
        info!("controller started");
        let mut repeat = time::interval(self.options.seek_repeat);
        repeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                Some(event) = hotkeys.recv() => self.on_hotkey(event),
                Some(action) = ui.recv() => self.on_ui(action),
                _ = repeat.tick(), if self.seeking.is_some() => {
                    self.repeat_seek();
                    Step::Continue
                }
                else => Step::Exit,
            };

            match step {
                Step::Continue => {}
                // first step already sent; next one a full interval later
                Step::StartRepeat => repeat.reset(),
                Step::Exit => break,
            }
        }

        self.announcer.stop();
        info!("controller stopped");
    }

    fn on_hotkey(&mut self, event: HotkeyEvent) -> Step {
        match event {
            HotkeyEvent::Pressed(action) => {
                self.emit(AppEvent::HotkeyPressed { action });
                self.on_press(action)
            }
            HotkeyEvent::Released(action) => {
                self.emit(AppEvent::HotkeyReleased { action });
                if self.seeking == Some(action) {
                    debug!(%action, "seek repeat stopped");
                    self.seeking = None;
                }
                Step::Continue
            }
        }
    }

    fn on_press(&mut self, action: HotkeyAction) -> Step {
        match action {
            HotkeyAction::TogglePlayPause => {
                self.commands.send(AudioCommand::TogglePlayPause);
            }
            HotkeyAction::FastForward | HotkeyAction::Rewind => {
                self.seeking = Some(action);
                self.repeat_seek();
                return Step::StartRepeat;
            }
            HotkeyAction::ToggleMonitor => self.toggle_monitor(),
            HotkeyAction::ToggleVisibility => self.toggle_visibility(),
            HotkeyAction::AddLabel => self.prompt_add_label(),
            HotkeyAction::SearchLabel => self.emit(AppEvent::LabelPrompt {
                kind: LabelPromptKind::Search,
                path: None,
            }),
            HotkeyAction::Exit => {
                info!("exit requested by hotkey");
                return Step::Exit;
            }
        }
        Step::Continue
    }

    fn on_ui(&mut self, action: UiAction) -> Step {
        match action {
            UiAction::ToggleMonitor => self.toggle_monitor(),
            UiAction::ToggleVisibility => self.toggle_visibility(),
            UiAction::Preview(path) => {
                if !self.monitoring {
                    debug!(path = ?path, "preview ignored, monitoring is off");
                } else if let Some(command) = self.selection.select(path.as_deref()) {
                    self.commands.send(command);
                }
            }
            UiAction::Exit => {
                info!("exit requested by UI");
                return Step::Exit;
            }
        }
        Step::Continue
    }

    fn repeat_seek(&mut self) {
        let delta = match self.seeking {
            Some(HotkeyAction::FastForward) => self.options.seek_step,
            Some(HotkeyAction::Rewind) => -self.options.seek_step,
            _ => return,
        };
        self.commands.seek(delta);
    }

    fn toggle_monitor(&mut self) {
        self.monitoring = !self.monitoring;
        self.selection.reset();
        if self.monitoring {
            info!("monitoring started");
            self.announcer.speak(Phrase::MonitoringStarted);
        } else {
            info!("monitoring stopped");
            self.commands.send(AudioCommand::StopAndClear);
            self.announcer.speak(Phrase::MonitoringStopped);
        }
        self.emit(AppEvent::MonitoringChanged {
            enabled: self.monitoring,
        });
    }

    fn toggle_visibility(&mut self) {
        self.visible = !self.visible;
        self.announcer.speak(if self.visible {
            Phrase::WindowShown
        } else {
            Phrase::WindowHidden
        });
        self.emit(AppEvent::VisibilityChanged {
            visible: self.visible,
        });
    }

    fn prompt_add_label(&mut self) {
        let last = self.playback.borrow().last_played.clone();
        match last {
            Some(path) if path.is_file() => self.emit(AppEvent::LabelPrompt {
                kind: LabelPromptKind::Add,
                path: Some(path),
            }),
            _ => {
                warn!("add label requested with no recently played file");
                self.emit(AppEvent::notification(
                    ErrorKind::MediaLoadFailure,
                    "no playing or recently played file to label",
                ));
            }
        }
    }

    fn emit(&self, event: AppEvent) {
        debug!(%event, "app event");
        let _ = self.events.send(event);
    }
}
