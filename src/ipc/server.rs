//! Localhost TCP server for IPC
//!
//! Provides request-response communication and push notifications of
//! `AppEvent`s to subscribed clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioCommand, CommandSender};
use crate::controller::UiAction;
use crate::events::{AppEvent, ErrorKind};
use crate::hotkey::{named_key_tokens, BindingStore, Chord, HotkeyAction};
use crate::state::PlaybackSnapshot;
use crate::tags::TagStore;

use super::protocol::{BindingInfo, DaemonStatus, Notification, Request, Response};

const MAX_FRAME: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

/// Handles to the rest of the daemon used to serve requests
#[derive(Clone)]
pub struct ServerContext {
    pub commands: CommandSender,
    pub ui: mpsc::Sender<UiAction>,
    pub bindings: Arc<Mutex<BindingStore>>,
    pub tags: Arc<TagStore>,
    pub events: broadcast::Sender<AppEvent>,
    pub playback: watch::Receiver<PlaybackSnapshot>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: Instant,
    /// Why the keyboard hook is missing; repeated to each new subscriber
    hook_failure: Option<String>,
}

/// IPC Server handling client connections
pub struct Server {
    listener: TcpListener,
    context: ServerContext,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the server to `addr`
    pub async fn bind(addr: SocketAddr, context: ServerContext) -> Result<Self, IpcError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| IpcError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        info!(addr = %local, "IPC server listening");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: Instant::now(),
            hook_failure: None,
        }));

        Ok(Self {
            listener,
            context,
            state,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IpcError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn set_hotkeys_active(&self, active: bool) {
        self.state.write().await.status.hotkeys_active = active;
    }

    /// Record that the keyboard hook could not be installed. Subscribers
    /// get a `HookInstallFailure` notification right after subscribing.
    pub async fn set_hook_failure(&self, reason: String) {
        let mut state = self.state.write().await;
        state.status.hotkeys_active = false;
        state.hook_failure = Some(reason);
    }

    /// Keep the status view in step with application events
    pub async fn track_events(&self, mut events: broadcast::Receiver<AppEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let mut state = self.state.write().await;
                    match event {
                        AppEvent::MonitoringChanged { enabled } => state.status.monitoring = enabled,
                        AppEvent::VisibilityChanged { visible } => state.status.visible = visible,
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "IPC status tracker lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "client connected");
                    let context = self.context.clone();
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, context, state) => {
                                if let Err(e) = result {
                                    warn!(%addr, error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!(%addr, "client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    /// Disconnect every client
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("IPC server shutdown complete");
    }
}

/// Handle a single client connection
async fn handle_client(
    stream: TcpStream,
    context: ServerContext,
    state: Arc<RwLock<ServerState>>,
) -> Result<(), IpcError> {
    let (reader, mut writer) = stream.into_split();
    let (request_tx, mut request_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(read_requests(reader, request_tx));

    let mut subscription: Option<broadcast::Receiver<AppEvent>> = None;

    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else { break Ok(()) };
                let mut replay = None;
                let response = match request {
                    Ok(Request::Subscribe) => {
                        debug!("client subscribed to notifications");
                        subscription = Some(context.events.subscribe());
                        replay = state.read().await.hook_failure.clone().map(|reason| {
                            AppEvent::notification(ErrorKind::HookInstallFailure, reason)
                        });
                        Response::Subscribed
                    }
                    Ok(request) => {
                        debug!(?request, "received request");
                        process_request(request, &context, &state).await
                    }
                    Err(e) => Response::error("INVALID_REQUEST", e.to_string()),
                };
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
                if let Some(event) = replay {
                    let note = Notification::Event { event };
                    if let Err(e) = send_message(&mut writer, &note).await {
                        break Err(e);
                    }
                }
            }
            event = next_event(&mut subscription) => {
                let Some(event) = event else { continue };
                let note = Notification::Event { event };
                if let Err(e) = send_message(&mut writer, &note).await {
                    break Err(e);
                }
            }
        }
    };

    reader_task.abort();
    result
}

/// Read frames until the peer hangs up. Malformed JSON is passed on as an
/// error; framing errors end the connection.
async fn read_requests(
    mut reader: OwnedReadHalf,
    requests: mpsc::Sender<Result<Request, serde_json::Error>>,
) {
    let mut len_buf = [0u8; 4];
    loop {
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read from client");
                return;
            }
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME {
            warn!(error = %IpcError::FrameTooLarge(len), "disconnecting client");
            return;
        }

        let mut msg_buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut msg_buf).await {
            warn!(error = %e, "truncated message");
            return;
        }

        if requests.send(serde_json::from_slice(&msg_buf)).await.is_err() {
            return;
        }
    }
}

/// Next event for a subscribed client; pending forever otherwise
async fn next_event(subscription: &mut Option<broadcast::Receiver<AppEvent>>) -> Option<AppEvent> {
    let Some(rx) = subscription else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(skipped = n, "subscriber lagged");
            None
        }
        Err(broadcast::error::RecvError::Closed) => {
            *subscription = None;
            None
        }
    }
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

/// Process a request and return a response
async fn process_request(
    request: Request,
    context: &ServerContext,
    state: &Arc<RwLock<ServerState>>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Subscribe => Response::Subscribed,

        Request::GetStatus => {
            let state = state.read().await;
            let mut status = state.status.clone();
            status.uptime_secs = state.start_time.elapsed().as_secs();
            status.playback = context.playback.borrow().clone();
            Response::Status(status)
        }

        Request::Play { path } => command(context, AudioCommand::Play(path)),
        Request::Stop => command(context, AudioCommand::Stop),
        Request::Pause => command(context, AudioCommand::Pause),
        Request::Resume => command(context, AudioCommand::Resume),
        Request::TogglePlayPause => command(context, AudioCommand::TogglePlayPause),
        Request::Seek { seconds } => command(context, AudioCommand::Seek(seconds)),

        Request::Preview { path } => ui_action(context, UiAction::Preview(path)).await,
        Request::ToggleMonitor => ui_action(context, UiAction::ToggleMonitor).await,
        Request::ToggleVisibility => ui_action(context, UiAction::ToggleVisibility).await,
        Request::Exit => ui_action(context, UiAction::Exit).await,

        Request::ListBindings => {
            let bindings = lock_bindings(&context.bindings)
                .bindings()
                .map(|(action, chord)| binding_info(action, chord))
                .collect();
            Response::Bindings { bindings }
        }

        Request::GetBinding { action } => {
            let chord = lock_bindings(&context.bindings).chord_for(action);
            Response::Binding(binding_info(action, &chord))
        }

        Request::ListKeys => Response::Keys { keys: key_choices() },

        Request::SetBinding {
            action,
            modifiers,
            key,
        } => {
            // saving the file and probing the OS both block
            let result = with_bindings(context, move |store| store.update(action, &modifiers, &key)).await;
            match result {
                None => Response::error("UNAVAILABLE", "binding update did not complete"),
                Some(Ok(outcome)) => {
                    if let Some(e) = &outcome.persist_error {
                        let _ = context.events.send(AppEvent::notification(e.kind(), e.to_string()));
                    }
                    let _ = context.events.send(AppEvent::BindingsChanged);
                    Response::BindingUpdated {
                        action,
                        chord: outcome.chord.to_string(),
                        persisted: outcome.persist_error.is_none(),
                    }
                }
                Some(Err(e)) => {
                    info!(%action, error = %e, "binding update rejected");
                    Response::error(e.kind(), e.to_string())
                }
            }
        }

        Request::ResetBindings => {
            let Some(result) = with_bindings(context, BindingStore::reset_to_defaults).await else {
                return Response::error("UNAVAILABLE", "binding reset did not complete");
            };
            let _ = context.events.send(AppEvent::BindingsChanged);
            match result {
                Ok(()) => Response::Ok,
                Err(e) => {
                    let _ = context.events.send(AppEvent::notification(e.kind(), e.to_string()));
                    Response::error(e.kind(), e.to_string())
                }
            }
        }

        Request::AddLabels { path, labels } => {
            let tags = Arc::clone(&context.tags);
            let count = tokio::task::spawn_blocking(move || tags.add_labels(&path, &labels))
                .await
                .unwrap_or(0);
            Response::LabelsAdded { count }
        }

        Request::SearchLabel { query } => {
            let tags = Arc::clone(&context.tags);
            let paths = tokio::task::spawn_blocking(move || tags.find_by_label(&query))
                .await
                .unwrap_or_default();
            Response::SearchResults { paths }
        }

        Request::GetLabels { path } => {
            let tags = Arc::clone(&context.tags);
            let labels = tokio::task::spawn_blocking(move || tags.labels_for(&path))
                .await
                .unwrap_or_default();
            Response::Labels { labels }
        }
    }
}

fn command(context: &ServerContext, command: AudioCommand) -> Response {
    if context.commands.send(command) {
        Response::Ok
    } else {
        Response::error("UNAVAILABLE", "playback worker has stopped")
    }
}

async fn ui_action(context: &ServerContext, action: UiAction) -> Response {
    match context.ui.send(action).await {
        Ok(()) => Response::Ok,
        Err(_) => Response::error("UNAVAILABLE", "controller has stopped"),
    }
}

fn lock_bindings(bindings: &Mutex<BindingStore>) -> std::sync::MutexGuard<'_, BindingStore> {
    bindings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `f` against the binding store on the blocking pool
async fn with_bindings<T, F>(context: &ServerContext, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&mut BindingStore) -> T + Send + 'static,
{
    let bindings = Arc::clone(&context.bindings);
    match tokio::task::spawn_blocking(move || f(&mut lock_bindings(&bindings))).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(error = %e, "binding store task failed");
            None
        }
    }
}

fn binding_info(action: HotkeyAction, chord: &Chord) -> BindingInfo {
    let (modifiers, key) = chord.display_parts();
    BindingInfo {
        action,
        name: action.display_name().to_string(),
        chord: chord.to_string(),
        modifiers: modifiers.into_iter().map(str::to_string).collect(),
        key,
    }
}

/// Letters, digits and every named key
fn key_choices() -> Vec<String> {
    ('A'..='Z')
        .chain('0'..='9')
        .map(String::from)
        .chain(named_key_tokens().map(str::to_string))
        .collect()
}
