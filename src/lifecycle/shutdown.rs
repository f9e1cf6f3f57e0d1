//! Signal handling for graceful shutdown

use tracing::{debug, error};

/// Resolves on Ctrl+C, Ctrl+Break or SIGTERM, whichever the platform offers
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal
    pub async fn wait(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "failed to register SIGTERM handler");
                    return ctrl_c().await;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => debug!("received SIGTERM"),
                _ = ctrl_c() => {}
            }
        }

        #[cfg(windows)]
        {
            let mut ctrl_break = match tokio::signal::windows::ctrl_break() {
                Ok(ctrl_break) => ctrl_break,
                Err(e) => {
                    error!(error = %e, "failed to register Ctrl+Break handler");
                    return ctrl_c().await;
                }
            };

            tokio::select! {
                _ = ctrl_break.recv() => debug!("received Ctrl+Break"),
                _ = ctrl_c() => {}
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("received Ctrl+C"),
        Err(e) => {
            // never resolve rather than shut down spuriously
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
