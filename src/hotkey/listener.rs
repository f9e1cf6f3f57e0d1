//! Global hotkey listener using a low-level keyboard hook
//!
//! Runs on a dedicated thread. Tracks held modifiers, builds the chord for
//! each non-modifier key and lets the dispatcher decide whether the event
//! is a hotkey transition. Matched events are swallowed so they never reach
//! the focused program.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::chord::Chord;
use super::dispatcher::{Dispatch, Dispatcher, HotkeyEvent, KeyEdge};
use super::keys::{KeyInput, ModifierState};
use super::registry::HotkeyRegistry;

/// Global hotkey listener feeding `HotkeyEvent`s to the controller
pub struct HotkeyListener {
    event_tx: mpsc::UnboundedSender<HotkeyEvent>,
    registry_rx: watch::Receiver<Arc<HotkeyRegistry>>,
    debounce: Duration,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(
        event_tx: mpsc::UnboundedSender<HotkeyEvent>,
        registry_rx: watch::Receiver<Arc<HotkeyRegistry>>,
        debounce: Duration,
    ) -> Self {
        Self {
            event_tx,
            registry_rx,
            debounce,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the hook on a dedicated thread.
    ///
    /// Returns once the hook is known to be installed (or failed to
    /// install). The hook lives for the rest of the process; `stop()`
    /// makes it pass every event through untouched.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let state = HookState::new(
            self.event_tx.clone(),
            self.registry_rx.clone(),
            self.debounce,
        );

        match platform::spawn_hook(state, Arc::clone(&self.running)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop reacting to hotkeys
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to install keyboard hook: {0}")]
    HookInstall(String),

    #[error("global hotkeys are not supported on this platform")]
    Unsupported,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

/// Everything the hook callback owns
pub(crate) struct HookState {
    modifiers: ModifierState,
    dispatcher: Dispatcher,
    registry_rx: watch::Receiver<Arc<HotkeyRegistry>>,
    event_tx: mpsc::UnboundedSender<HotkeyEvent>,
}

impl HookState {
    pub(crate) fn new(
        event_tx: mpsc::UnboundedSender<HotkeyEvent>,
        mut registry_rx: watch::Receiver<Arc<HotkeyRegistry>>,
        debounce: Duration,
    ) -> Self {
        let registry = Arc::clone(&registry_rx.borrow_and_update());
        Self {
            modifiers: ModifierState::default(),
            dispatcher: Dispatcher::new(registry, debounce),
            registry_rx,
            event_tx,
        }
    }

    /// Handle one raw key event. Returns `true` when the event must be
    /// swallowed.
    pub(crate) fn process(&mut self, input: KeyInput, edge: KeyEdge, now: Instant) -> bool {
        if self.registry_rx.has_changed().unwrap_or(false) {
            let registry = Arc::clone(&self.registry_rx.borrow_and_update());
            debug!(bindings = registry.len(), "hook picked up new bindings");
            self.dispatcher.replace_registry(registry);
        }

        let key = match input {
            KeyInput::Modifier(modifier) => {
                self.modifiers.set(modifier, edge == KeyEdge::Down);
                return false;
            }
            KeyInput::Key(key) => key,
        };

        let chord = Chord::from_held(self.modifiers, &key);
        let dispatch = self.dispatcher.handle(edge, &chord, now);
        if let Dispatch::Emit(event) = &dispatch {
            // unbounded: never blocks the hook
            if self.event_tx.send(*event).is_err() {
                warn!(?event, "hotkey event dropped, receiver closed");
            }
        }
        dispatch.consumed()
    }
}

#[cfg(windows)]
mod platform {
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    use rdev::{grab, Event, EventType};
    use tracing::{error, info};

    use super::super::keys::platform::key_input;
    use super::{HookState, HotkeyError, KeyEdge};

    /// How long to wait for `grab` to report an install failure
    const INSTALL_GRACE: Duration = Duration::from_millis(250);

    pub(super) fn spawn_hook(state: HookState, running: Arc<AtomicBool>) -> Result<(), HotkeyError> {
        let (result_tx, result_rx) = std_mpsc::channel::<String>();

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                let state = RefCell::new(state);

                let callback = move |event: Event| -> Option<Event> {
                    if !running.load(Ordering::SeqCst) {
                        return Some(event);
                    }
                    let (key, edge) = match event.event_type {
                        EventType::KeyPress(key) => (key, KeyEdge::Down),
                        EventType::KeyRelease(key) => (key, KeyEdge::Up),
                        _ => return Some(event),
                    };
                    let Some(input) = key_input(key) else {
                        return Some(event);
                    };
                    let consumed = state.borrow_mut().process(input, edge, Instant::now());
                    if consumed {
                        None
                    } else {
                        Some(event)
                    }
                };

                // blocks for the life of the hook
                if let Err(e) = grab(callback) {
                    error!(?e, "keyboard hook failed");
                    let _ = result_tx.send(format!("{e:?}"));
                }
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match result_rx.recv_timeout(INSTALL_GRACE) {
            Ok(reason) => Err(HotkeyError::HookInstall(reason)),
            Err(_) => {
                info!("keyboard hook installed");
                Ok(())
            }
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::{HookState, HotkeyError};

    pub(super) fn spawn_hook(_state: HookState, _running: Arc<AtomicBool>) -> Result<(), HotkeyError> {
        tracing::warn!("no global keyboard hook on this platform");
        Err(HotkeyError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::bindings::HotkeyAction;
    use crate::hotkey::keys::Modifier;

    fn hook_with(bindings: &[(HotkeyAction, &str)]) -> (
        HookState,
        mpsc::UnboundedReceiver<HotkeyEvent>,
        watch::Sender<Arc<HotkeyRegistry>>,
    ) {
        let chords: Vec<_> = bindings
            .iter()
            .map(|(a, c)| (*a, Chord::parse(c).unwrap()))
            .collect();
        let registry = HotkeyRegistry::from_bindings(chords.iter().map(|(a, c)| (*a, c)));
        let (registry_tx, registry_rx) = watch::channel(Arc::new(registry));
        let (tx, rx) = mpsc::unbounded_channel();
        let state = HookState::new(tx, registry_rx, Duration::from_millis(100));
        (state, rx, registry_tx)
    }

    fn key(name: &str) -> KeyInput {
        KeyInput::Key(name.to_string())
    }

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_registry_tx, registry_rx) = watch::channel(Arc::new(HotkeyRegistry::default()));
        let listener = HotkeyListener::new(tx, registry_rx, Duration::from_millis(100));
        assert!(!listener.is_running());
    }

    #[test]
    fn test_held_chord_emits_one_press_and_one_release() {
        let (mut hook, mut rx, _registry_tx) = hook_with(&[(HotkeyAction::TogglePlayPause, "ctrl+alt+p")]);
        let now = Instant::now();

        assert!(!hook.process(KeyInput::Modifier(Modifier::Ctrl), KeyEdge::Down, now));
        assert!(!hook.process(KeyInput::Modifier(Modifier::Alt), KeyEdge::Down, now));
        for i in 0..5 {
            assert!(hook.process(key("p"), KeyEdge::Down, now + Duration::from_millis(i * 30)));
        }
        assert!(hook.process(key("p"), KeyEdge::Up, now + Duration::from_millis(200)));

        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Pressed(HotkeyAction::TogglePlayPause));
        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Released(HotkeyAction::TogglePlayPause));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unmatched_keys_pass_through() {
        let (mut hook, mut rx, _registry_tx) = hook_with(&[(HotkeyAction::TogglePlayPause, "ctrl+alt+p")]);
        let now = Instant::now();

        // p without modifiers is ordinary typing
        assert!(!hook.process(key("p"), KeyEdge::Down, now));
        assert!(!hook.process(key("p"), KeyEdge::Up, now));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_modifier_released_first() {
        let (mut hook, mut rx, _registry_tx) = hook_with(&[(HotkeyAction::Rewind, "ctrl+alt+left")]);
        let now = Instant::now();

        hook.process(KeyInput::Modifier(Modifier::Ctrl), KeyEdge::Down, now);
        hook.process(KeyInput::Modifier(Modifier::Alt), KeyEdge::Down, now);
        hook.process(key("left"), KeyEdge::Down, now);
        hook.process(KeyInput::Modifier(Modifier::Ctrl), KeyEdge::Up, now);
        assert!(hook.process(key("left"), KeyEdge::Up, now + Duration::from_millis(50)));

        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Pressed(HotkeyAction::Rewind));
        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Released(HotkeyAction::Rewind));
    }

    #[test]
    fn test_picks_up_rebuilt_registry() {
        let (mut hook, mut rx, registry_tx) = hook_with(&[]);
        let now = Instant::now();

        hook.process(KeyInput::Modifier(Modifier::Ctrl), KeyEdge::Down, now);
        assert!(!hook.process(key("space"), KeyEdge::Down, now));
        hook.process(key("space"), KeyEdge::Up, now);

        let chord = Chord::parse("ctrl+space").unwrap();
        let registry = HotkeyRegistry::from_bindings([(HotkeyAction::TogglePlayPause, &chord)]);
        registry_tx.send_replace(Arc::new(registry));

        assert!(hook.process(key("space"), KeyEdge::Down, now + Duration::from_millis(10)));
        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Pressed(HotkeyAction::TogglePlayPause));
    }

    #[test]
    fn test_release_survives_registry_rebuild() {
        let (mut hook, mut rx, registry_tx) = hook_with(&[(HotkeyAction::FastForward, "ctrl+alt+right")]);
        let now = Instant::now();

        hook.process(KeyInput::Modifier(Modifier::Ctrl), KeyEdge::Down, now);
        hook.process(KeyInput::Modifier(Modifier::Alt), KeyEdge::Down, now);
        assert!(hook.process(key("right"), KeyEdge::Down, now));

        // another binding is saved while fast-forward is held
        let ff = Chord::parse("ctrl+alt+right").unwrap();
        let play = Chord::parse("ctrl+alt+p").unwrap();
        let registry = HotkeyRegistry::from_bindings([
            (HotkeyAction::FastForward, &ff),
            (HotkeyAction::TogglePlayPause, &play),
        ]);
        registry_tx.send_replace(Arc::new(registry));

        assert!(hook.process(key("right"), KeyEdge::Up, now + Duration::from_millis(300)));
        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Pressed(HotkeyAction::FastForward));
        assert_eq!(rx.try_recv().unwrap(), HotkeyEvent::Released(HotkeyAction::FastForward));
        assert!(rx.try_recv().is_err());
    }
}
