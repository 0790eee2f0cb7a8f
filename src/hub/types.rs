//! Connection records and the handles shared between the hub and sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::event::{ProjectId, UserId};

pub type ConnectionId = Uuid;

/// Frames queued for a session's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Pre-serialized event envelope, shared by every recipient of a dispatch
    Event(Arc<str>),
    /// Server heartbeat
    Ping,
    /// Close the transport with a reason
    Close { reason: String },
}

/// Identity and scope established by a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub project_id: ProjectId,
}

/// Last inbound activity of a session, shared lock-free with the hub
#[derive(Debug)]
pub struct Activity {
    /// Unix seconds
    last_seen: AtomicI64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last_seen: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn touch(&self) {
        self.last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_seen.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Seconds elapsed since the last recorded activity
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.last_seen.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, at: DateTime<Utc>) {
        self.last_seen.store(at.timestamp(), Ordering::Relaxed);
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the hub needs to route events to one connection.
///
/// The session keeps the receiving half of the outbound queue; the hub only
/// ever holds the sender.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub identity: Identity,
    pub sender: mpsc::Sender<Outbound>,
    pub activity: Arc<Activity>,
    pub connected_at: DateTime<Utc>,
}

impl Registration {
    /// Create a registration together with its bounded outbound queue
    pub fn channel(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let registration = Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            activity: Arc::new(Activity::new()),
            connected_at: Utc::now(),
        };
        (registration, receiver)
    }
}

/// Why the hub removed a connection on its own initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Outbound queue was full
    Backpressure,
    /// Writer had already gone away
    Closed,
    /// No inbound activity within the connection timeout
    Idle,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Backpressure => "backpressure",
            EvictionReason::Closed => "closed",
            EvictionReason::Idle => "idle",
        }
    }
}

/// Public view of a registered connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Hub statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub unique_users: usize,
    /// project_id -> connection count
    pub projects: HashMap<ProjectId, usize>,
    pub events_dispatched: u64,
    pub deliveries: u64,
    pub evictions: u64,
}
