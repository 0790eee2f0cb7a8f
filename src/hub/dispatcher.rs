//! The hub's dispatch loop.
//!
//! A single task owns the [`Registry`] and processes [`Command`]s one at a
//! time, in the order they were sent. Registration, removal and fan-out never
//! race with each other, and the loop never awaits on a recipient: every
//! enqueue is a `try_send`, and a recipient whose queue is full is evicted.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::metrics::HubMetrics;

use super::event::{Event, ProjectId};
use super::registry::Registry;
use super::types::{ConnectionId, ConnectionInfo, EvictionReason, HubStats, Outbound, Registration};

pub(super) enum Command {
    Register(Registration),
    Unregister(ConnectionId),
    Dispatch(Event),
    Heartbeat,
    SweepIdle {
        timeout: Duration,
    },
    Connections {
        project_id: ProjectId,
        reply: oneshot::Sender<Vec<ConnectionInfo>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reason: String,
        reply: oneshot::Sender<usize>,
    },
}

pub(super) struct Dispatcher {
    registry: Registry,
    commands: mpsc::Receiver<Command>,
    events_dispatched: u64,
    deliveries: u64,
    evictions: u64,
}

impl Dispatcher {
    pub(super) fn new(commands: mpsc::Receiver<Command>) -> Self {
        Self {
            registry: Registry::new(),
            commands,
            events_dispatched: 0,
            deliveries: 0,
            evictions: 0,
        }
    }

    /// Process commands until shutdown or until every hub handle is dropped
    pub(super) async fn run(mut self) {
        tracing::info!("Hub dispatcher started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(registration) => self.register(registration),
                Command::Unregister(connection_id) => self.unregister(connection_id),
                Command::Dispatch(event) => self.dispatch(event),
                Command::Heartbeat => self.heartbeat(),
                Command::SweepIdle { timeout } => self.sweep_idle(timeout),
                Command::Connections { project_id, reply } => {
                    let _ = reply.send(self.registry.connections_of(project_id));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown { reason, reply } => {
                    self.commands.close();
                    let closed = self.close_all(&reason);
                    let _ = reply.send(closed);
                    break;
                }
            }
        }

        if !self.registry.is_empty() {
            self.close_all("hub stopped");
        }

        tracing::info!(
            events_dispatched = self.events_dispatched,
            deliveries = self.deliveries,
            evictions = self.evictions,
            "Hub dispatcher stopped"
        );
    }

    fn register(&mut self, registration: Registration) {
        let connection_id = registration.id;
        let identity = registration.identity;

        if !self.registry.insert(registration) {
            tracing::warn!(
                connection_id = %connection_id,
                "Connection already registered, ignoring"
            );
            return;
        }

        HubMetrics::set_active_connections(self.registry.len());
        tracing::info!(
            connection_id = %connection_id,
            user_id = identity.user_id,
            project_id = identity.project_id,
            total_connections = self.registry.len(),
            "Connection registered"
        );
    }

    /// Remove a connection. Dropping its sender closes the outbound queue;
    /// the writer drains what is left and then ends the session.
    fn unregister(&mut self, connection_id: ConnectionId) {
        let Some(member) = self.registry.remove(connection_id) else {
            return;
        };

        HubMetrics::set_active_connections(self.registry.len());
        tracing::info!(
            connection_id = %connection_id,
            user_id = member.identity.user_id,
            project_id = member.identity.project_id,
            total_connections = self.registry.len(),
            "Connection unregistered"
        );
    }

    fn evict(&mut self, connection_id: ConnectionId, reason: EvictionReason) {
        let Some(member) = self.registry.remove(connection_id) else {
            return;
        };

        self.evictions += 1;
        HubMetrics::record_eviction(reason);
        HubMetrics::set_active_connections(self.registry.len());
        tracing::warn!(
            connection_id = %connection_id,
            user_id = member.identity.user_id,
            project_id = member.identity.project_id,
            reason = reason.as_str(),
            "Connection evicted"
        );
    }

    fn dispatch(&mut self, event: Event) {
        let frame: std::sync::Arc<str> = match event.encode() {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event_type = %event.kind,
                    project_id = event.project_id,
                    "Failed to serialize event"
                );
                return;
            }
        };

        let mut delivered = 0u64;
        let mut faulted = Vec::new();

        for (connection_id, member) in self.registry.members_of(event.project_id) {
            match member.sender.try_send(Outbound::Event(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    faulted.push((connection_id, EvictionReason::Backpressure))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    faulted.push((connection_id, EvictionReason::Closed))
                }
            }
        }

        for (connection_id, reason) in faulted {
            self.evict(connection_id, reason);
        }

        self.events_dispatched += 1;
        self.deliveries += delivered;
        HubMetrics::record_dispatched(event.kind, delivered);

        tracing::debug!(
            event_type = %event.kind,
            project_id = event.project_id,
            delivered = delivered,
            "Event dispatched"
        );
    }

    /// Queue a ping on every connection. Pings obey the same backpressure
    /// policy as events.
    fn heartbeat(&mut self) {
        let faulted: Vec<_> = self
            .registry
            .iter()
            .filter_map(|(connection_id, member)| match member.sender.try_send(Outbound::Ping) {
                Ok(()) => None,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    Some((connection_id, EvictionReason::Backpressure))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Some((connection_id, EvictionReason::Closed))
                }
            })
            .collect();

        for (connection_id, reason) in faulted {
            self.evict(connection_id, reason);
        }
    }

    fn sweep_idle(&mut self, timeout: Duration) {
        let idle = self.registry.idle_connections(timeout.as_secs(), Utc::now());
        for connection_id in idle {
            self.evict(connection_id, EvictionReason::Idle);
        }
    }

    /// Send every connection a close frame and empty the registry.
    /// Returns the number of connections that accepted the close frame.
    fn close_all(&mut self, reason: &str) -> usize {
        let mut notified = 0;

        for (connection_id, member) in self.registry.drain() {
            let close = Outbound::Close {
                reason: reason.to_string(),
            };
            if member.sender.try_send(close).is_ok() {
                notified += 1;
            } else {
                tracing::debug!(
                    connection_id = %connection_id,
                    "Could not queue close frame"
                );
            }
        }

        HubMetrics::set_active_connections(0);
        notified
    }

    fn stats(&self) -> HubStats {
        HubStats {
            total_connections: self.registry.len(),
            unique_users: self.registry.unique_users(),
            projects: self.registry.project_counts(),
            events_dispatched: self.events_dispatched,
            deliveries: self.deliveries,
            evictions: self.evictions,
        }
    }
}
