//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the run token. A transfer in progress is stopped and its
//! snapshot left unpublished; `latest` keeps pointing at the previous one.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown; hand it to the executor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT), then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling backup...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling backup...");
            }
            _ = self.token.cancelled() => return,
        }

        self.trigger();
    }

    /// Cancel without a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
