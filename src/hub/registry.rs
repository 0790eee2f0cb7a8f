use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::event::{ProjectId, UserId};
use super::types::{Activity, ConnectionId, ConnectionInfo, Identity, Outbound, Registration};

/// The hub's non-owning view of a live session
#[derive(Debug)]
pub struct Member {
    pub identity: Identity,
    pub sender: mpsc::Sender<Outbound>,
    pub activity: Arc<Activity>,
    pub connected_at: DateTime<Utc>,
}

impl Member {
    fn info(&self, connection_id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            connection_id,
            user_id: self.identity.user_id,
            project_id: self.identity.project_id,
            connected_at: self.connected_at,
            last_activity: self.activity.last_seen(),
        }
    }
}

/// Live connections, indexed by project.
///
/// Plain maps with no interior locking: the registry is owned by the hub's
/// dispatch loop and nothing else ever touches it.
#[derive(Debug, Default)]
pub struct Registry {
    /// connection_id -> Member
    connections: HashMap<ConnectionId, Member>,
    /// project_id -> Set<connection_id>
    project_index: HashMap<ProjectId, HashSet<ConnectionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns false if the id is already registered.
    pub fn insert(&mut self, registration: Registration) -> bool {
        let Registration {
            id,
            identity,
            sender,
            activity,
            connected_at,
        } = registration;

        if self.connections.contains_key(&id) {
            return false;
        }

        self.connections.insert(
            id,
            Member {
                identity,
                sender,
                activity,
                connected_at,
            },
        );
        self.project_index
            .entry(identity.project_id)
            .or_default()
            .insert(id);

        true
    }

    /// Remove a connection, returning its member if it was present
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Member> {
        let member = self.connections.remove(&connection_id)?;
        let project_id = member.identity.project_id;

        if let Some(conns) = self.project_index.get_mut(&project_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                self.project_index.remove(&project_id);
            }
        }

        Some(member)
    }

    /// Connections scoped to a project
    pub fn members_of(&self, project_id: ProjectId) -> impl Iterator<Item = (ConnectionId, &Member)> {
        self.project_index
            .get(&project_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id).map(|member| (*id, member)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Member)> {
        self.connections.iter().map(|(id, member)| (*id, member))
    }

    /// Connections with no inbound activity for longer than `timeout_secs`
    pub fn idle_connections(&self, timeout_secs: u64, now: DateTime<Utc>) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, member)| member.activity.idle_secs(now) > timeout_secs as i64)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn connections_of(&self, project_id: ProjectId) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .members_of(project_id)
            .map(|(id, member)| member.info(id))
            .collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn unique_users(&self) -> usize {
        self.connections
            .values()
            .map(|member| member.identity.user_id)
            .collect::<HashSet<UserId>>()
            .len()
    }

    /// project_id -> connection count
    pub fn project_counts(&self) -> HashMap<ProjectId, usize> {
        self.project_index
            .iter()
            .map(|(project_id, conns)| (*project_id, conns.len()))
            .collect()
    }

    /// Remove every connection
    pub fn drain(&mut self) -> Vec<(ConnectionId, Member)> {
        self.project_index.clear();
        self.connections.drain().collect()
    }
}
