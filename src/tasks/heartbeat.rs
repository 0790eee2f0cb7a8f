use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::hub::Hub;

/// Background task for heartbeat and idle connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    hub: Hub,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(config: WebSocketConfig, hub: Hub, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            config,
            hub,
            shutdown,
        }
    }

    /// Run until shutdown is signalled or the hub stops
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = Duration::from_secs(self.config.connection_timeout);

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    if self.hub.heartbeat().await.is_err() {
                        tracing::info!("Hub stopped, ending heartbeat task");
                        break;
                    }
                }
                _ = cleanup_timer.tick() => {
                    if self.hub.sweep_idle(connection_timeout).await.is_err() {
                        tracing::info!("Hub stopped, ending heartbeat task");
                        break;
                    }
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }
}
