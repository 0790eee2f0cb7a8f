//! Graceful shutdown handling for the realtime hub.
//!
//! Shutdown runs in two phases:
//! 1. Every connected client is sent a "going away" close frame and the hub
//!    stops accepting commands
//! 2. Background tasks are signalled to stop

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::hub::Hub;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for the hub to close every connection (default: 5 seconds)
    pub client_notification_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
        }
    }
}

/// Handles graceful shutdown of the realtime service
pub struct GracefulShutdown {
    hub: Hub,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(hub: Hub, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(hub, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(hub: Hub, shutdown_tx: broadcast::Sender<()>, config: ShutdownConfig) -> Self {
        Self {
            hub,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Closing connections");
        match timeout(self.config.client_notification_timeout, self.hub.shutdown(reason)).await {
            Ok(Ok(closed)) => {
                result.clients_notified = closed;
                result.success = true;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Hub already stopped");
                result.success = true;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.client_notification_timeout.as_millis(),
                    "Timed out waiting for the hub to close connections"
                );
            }
        }

        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        result.duration = start.elapsed();

        tracing::info!(
            clients_notified = result.clients_notified,
            success = result.success,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether the hub confirmed it stopped
    pub success: bool,
    /// Number of clients that were sent a close frame
    pub clients_notified: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}
