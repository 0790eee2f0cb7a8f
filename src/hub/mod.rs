//! Real-time connection hub.
//!
//! The hub is the single authority over which connections exist and which of
//! them receive an event. It is split into:
//! - `event`: typed project events and their JSON envelope
//! - `registry`: live connections indexed by project
//! - `dispatcher`: the task that owns the registry and serializes every
//!   register / unregister / dispatch decision
//!
//! [`Hub`] is the cloneable handle used by sessions, HTTP handlers and
//! background tasks. It only sends commands; it never touches the registry.

mod dispatcher;
mod event;
mod registry;
mod types;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::metrics::SubmitMetrics;

use dispatcher::{Command, Dispatcher};

pub use event::{DecodeError, Envelope, Event, EventKind, EventPayload, ProjectId, UserId};
pub use registry::{Member, Registry};
pub use types::{
    Activity, ConnectionId, ConnectionInfo, EvictionReason, HubStats, Identity, Outbound,
    Registration,
};

/// Default capacity of the hub's command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// Handle to the hub's dispatch loop
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawn the dispatch loop and return a handle to it
    pub fn spawn(command_buffer: usize) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(command_buffer.max(1));
        let task = tokio::spawn(Dispatcher::new(receiver).run());
        (Self { commands }, task)
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Admit a connection that completed its handshake
    pub async fn register(&self, registration: Registration) -> Result<(), HubError> {
        self.send(Command::Register(registration)).await
    }

    /// Remove a connection. Safe to call any number of times, from anywhere.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        if self.send(Command::Unregister(connection_id)).await.is_err() {
            tracing::debug!(connection_id = %connection_id, "Hub stopped before unregister");
        }
    }

    /// Route an event to every connection scoped to its project
    pub async fn dispatch(&self, event: Event) -> Result<(), HubError> {
        self.send(Command::Dispatch(event)).await
    }

    /// Decode a raw envelope from an external source and dispatch it.
    /// Malformed payloads are logged and dropped.
    pub async fn submit(&self, raw: &[u8]) {
        let event = match Event::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                SubmitMetrics::record_decode_failure("external");
                tracing::warn!(error = %e, "Dropping malformed submitted payload");
                return;
            }
        };

        if let Err(e) = self.dispatch(event).await {
            tracing::warn!(error = %e, "Dropping submitted event");
        }
    }

    /// Decode a frame received from a session and dispatch it on behalf of
    /// that session.
    ///
    /// Frames addressed to another project are dropped; the sender is always
    /// stamped with the session's authenticated user.
    pub async fn submit_from(&self, raw: &[u8], origin: &Identity) {
        let event = match Event::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                SubmitMetrics::record_decode_failure("peer");
                tracing::debug!(
                    error = %e,
                    user_id = origin.user_id,
                    project_id = origin.project_id,
                    "Dropping malformed peer frame"
                );
                return;
            }
        };

        if event.project_id != origin.project_id {
            SubmitMetrics::record_scope_mismatch();
            tracing::warn!(
                user_id = origin.user_id,
                project_id = origin.project_id,
                frame_project_id = event.project_id,
                "Dropping peer frame addressed to another project"
            );
            return;
        }

        if let Err(e) = self.dispatch(event.with_user(origin.user_id)).await {
            tracing::debug!(error = %e, "Dropping peer event");
        }
    }

    /// Queue a ping on every connection
    pub async fn heartbeat(&self) -> Result<(), HubError> {
        self.send(Command::Heartbeat).await
    }

    /// Evict connections with no inbound activity for longer than `timeout`
    pub async fn sweep_idle(&self, timeout: Duration) -> Result<(), HubError> {
        self.send(Command::SweepIdle { timeout }).await
    }

    /// Connections currently scoped to a project
    pub async fn connections(&self, project_id: ProjectId) -> Result<Vec<ConnectionInfo>, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Connections { project_id, reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Close every connection and stop the dispatch loop.
    /// Returns the number of connections that were sent a close frame.
    pub async fn shutdown(&self, reason: impl Into<String>) -> Result<usize, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown {
            reason: reason.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Whether the dispatch loop is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
