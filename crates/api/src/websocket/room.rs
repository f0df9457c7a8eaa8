//! Broadcast groups
//!
//! Session groups hold the connections of a session's two participants; role
//! groups hold every connected supporter of one role and carry queue updates.

use harbor_shared::{Role, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// Broadcast group key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Session(Uuid),
    Role(Role),
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{}", id),
            Self::Role(role) => write!(f, "role:{}", role),
        }
    }
}

pub struct GroupManager {
    /// Map of group -> member connections
    groups: Arc<RwLock<HashMap<Group, Vec<Arc<Connection>>>>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a group; joining twice is a no-op
    pub async fn join(&self, group: Group, conn: Arc<Connection>) {
        let mut groups = self.groups.write().await;
        let members = groups.entry(group).or_default();
        if members.iter().any(|c| c.connection_id == conn.connection_id) {
            return;
        }
        members.push(Arc::clone(&conn));

        tracing::debug!(
            group = %group,
            connection_id = %conn.connection_id,
            group_size = members.len(),
            "Connection joined group"
        );
    }

    pub async fn leave(&self, group: &Group, connection_id: &Uuid) {
        let mut groups = self.groups.write().await;
        if let Some(conns) = groups.get_mut(group) {
            conns.retain(|c| c.connection_id != *connection_id);

            if conns.is_empty() {
                groups.remove(group);
                tracing::debug!(group = %group, "Removed empty group");
            } else {
                tracing::debug!(
                    group = %group,
                    connection_id = %connection_id,
                    group_size = conns.len(),
                    "Connection left group"
                );
            }
        }
    }

    /// Send an event to every connection in a group, skipping connections owned
    /// by `exclude_user`. Returns the number of connections that accepted it.
    ///
    /// Closed connections are skipped; they are cleaned up on disconnect.
    pub async fn broadcast(
        &self,
        group: &Group,
        event: ServerEvent,
        exclude_user: Option<Uuid>,
    ) -> usize {
        let groups = self.groups.read().await;
        let Some(conns) = groups.get(group) else {
            tracing::debug!(
                group = %group,
                event_type = event.kind(),
                "No live connections in group - event dropped"
            );
            return 0;
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in conns.iter().filter(|c| Some(c.user_id) != exclude_user) {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        connection_id = %conn.connection_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            group = %group,
            event_type = event.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to group"
        );

        success_count
    }

    /// Remove a connection from all groups
    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let mut groups = self.groups.write().await;
        let mut removed_from = 0;

        for conns in groups.values_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.connection_id != *connection_id);
            if conns.len() < before_len {
                removed_from += 1;
            }
        }

        groups.retain(|_, conns| !conns.is_empty());

        if removed_from > 0 {
            tracing::debug!(
                connection_id = %connection_id,
                group_count = removed_from,
                "Removed connection from groups"
            );
        }
    }

    pub async fn get_group_count(&self) -> usize {
        let groups = self.groups.read().await;
        groups.len()
    }
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new()
    }
}
