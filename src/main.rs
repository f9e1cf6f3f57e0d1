//! audio-preview-daemon: Background daemon for keyboard-driven audio previewing
//!
//! The daemon provides:
//! - Global, user-configurable hotkeys via a low-level keyboard hook
//! - A playback worker that previews one file at a time
//! - A SQLite label store for tagging and finding samples
//! - Screen reader announcements of state changes
//! - An IPC server for the UI process

mod announce;
mod audio;
mod config;
mod controller;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod state;
mod tags;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::announce::{Announcer, ScreenReaderAnnouncer};
use crate::audio::{command_channel, default_backend, AudioCommand, BackendFactory, DefaultBackend};
use crate::config::Config;
use crate::controller::{Controller, ControllerOptions};
use crate::events::AppEvent;
use crate::hotkey::{system_probe, BindingStore, HotkeyListener};
use crate::ipc::{Server, ServerContext};
use crate::lifecycle::ShutdownSignal;
use crate::state::{spawn_worker, PlaybackSnapshot, PlayerOptions};
use crate::tags::TagStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "audio-preview-daemon starting"
    );

    config.ensure_dirs()?;
    info!(
        bindings = %config.bindings_path.display(),
        db = %config.db_path.display(),
        ipc = %config.ipc_addr,
        "configuration loaded"
    );

    // The label store is the one hard requirement
    let tags = Arc::new(TagStore::open(&config.db_path).context("cannot start without the tag store")?);

    let shutdown = ShutdownSignal::new();

    // Controller/worker -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<AppEvent>(256);

    let bindings = BindingStore::load(config.bindings_path.clone(), system_probe());
    let registry_rx = bindings.subscribe();
    if registry_rx.borrow().is_empty() {
        warn!("no hotkeys are bound");
    }
    let bindings = Arc::new(Mutex::new(bindings));

    // Hotkey listener -> controller
    let (hotkey_tx, hotkey_rx) = mpsc::unbounded_channel();
    let hotkey_listener = HotkeyListener::new(hotkey_tx, registry_rx, config.debounce);

    // Start the hotkey listener (runs on dedicated thread)
    let hook_failure = match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
            None
        }
        Err(e) => {
            error!(error = %e, "failed to start hotkey listener");
            warn!("continuing without global hotkeys");
            Some(e.to_string())
        }
    };

    // Controller/IPC -> playback worker
    let (commands, command_rx) = command_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::default());
    let player_options = PlayerOptions {
        poll_interval: config.poll_interval,
        probe_timeout: config.probe_timeout,
    };
    let factory: BackendFactory<DefaultBackend> = Box::new(default_backend);
    let worker = spawn_worker(factory, command_rx, player_options, snapshot_tx, event_tx.clone())
        .context("failed to spawn playback worker")?;

    let screen_readers = ScreenReaderAnnouncer::load(config.announcer, &config.dll_dir);
    if screen_readers.is_silent() {
        warn!(strategy = %config.announcer, "no screen reader reachable, announcements disabled");
    }
    let announcer: Arc<dyn Announcer> = Arc::new(screen_readers);

    // IPC -> controller
    let (ui_tx, ui_rx) = mpsc::channel(32);
    let context = ServerContext {
        commands: commands.clone(),
        ui: ui_tx,
        bindings,
        tags,
        events: event_tx.clone(),
        playback: snapshot_rx.clone(),
    };
    let server = match Server::bind(config.ipc_addr, context).await {
        Ok(server) => {
            // no UI is connected yet; the server repeats the failure on subscribe
            match hook_failure {
                Some(reason) => server.set_hook_failure(reason).await,
                None => server.set_hotkeys_active(true).await,
            }
            Some(server)
        }
        Err(e) => {
            error!(error = %e, "IPC server unavailable, continuing without UI bridge");
            None
        }
    };
    let status_rx = event_tx.subscribe();

    let controller = Controller::new(
        commands.clone(),
        Arc::clone(&announcer),
        event_tx.clone(),
        snapshot_rx,
        ControllerOptions {
            seek_step: config.seek_step,
            seek_repeat: config.seek_repeat,
        },
    );

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the controller (processes hotkey and UI actions)
        _ = controller.run(hotkey_rx, ui_rx) => {
            info!("controller exited");
        }

        // Run the IPC server alongside its status tracker
        _ = async {
            match &server {
                Some(server) => {
                    tokio::join!(server.run(), server.track_events(status_rx));
                }
                None => std::future::pending::<()>().await,
            }
        } => {
            info!("IPC server exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    announcer.stop();
    if hotkey_listener.is_running() {
        hotkey_listener.stop();
    }
    if let Some(server) = &server {
        server.shutdown().await;
    }

    commands.send(AudioCommand::Quit);
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("playback worker panicked"),
        Err(e) => error!(error = %e, "failed to join playback worker"),
    }

    info!("audio-preview-daemon stopped");

    Ok(())
}
