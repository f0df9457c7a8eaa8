//! Realtime channel state
//!
//! One `RealtimeChannel` is constructed at startup and handed to the session
//! service and the socket handler. It tracks live connections and their groups;
//! it never touches session storage.

use harbor_shared::{Role, RoutingTarget, ServerEvent, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::{Group, GroupManager};

/// Roles whose connections join a role group at connect time
const QUEUE_ROLES: &[Role] = &[Role::Counselor, Role::PeerSupporter];

#[derive(Clone)]
pub struct RealtimeChannel {
    /// All active connections indexed by connection_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    pub groups: Arc<GroupManager>,
}

impl RealtimeChannel {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            groups: Arc::new(GroupManager::new()),
        }
    }

    /// Register a connection and place supporters in their role group
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        {
            let mut connections = self.connections.write().await;
            connections.insert(conn.connection_id, Arc::clone(&conn));

            tracing::info!(
                connection_id = %conn.connection_id,
                user_id = %conn.user_id,
                role = %conn.role,
                total_connections = connections.len(),
                "Realtime connection added"
            );
        }

        if QUEUE_ROLES.contains(&conn.role) {
            self.groups.join(Group::Role(conn.role), Arc::clone(&conn)).await;
        }

        conn
    }

    /// Drop a connection from every group. If it was the user's last live
    /// connection, each session group it had joined is told the user went offline.
    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let removed = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(connection_id);
            if let Some(conn) = &removed {
                tracing::info!(
                    connection_id = %connection_id,
                    user_id = %conn.user_id,
                    remaining_connections = connections.len(),
                    "Realtime connection removed"
                );
            }
            removed
        };

        let Some(conn) = removed else {
            return;
        };
        self.groups.remove_connection(connection_id).await;

        if self.is_user_online(conn.user_id).await {
            return;
        }
        for session_id in conn.get_subscriptions().await {
            self.groups
                .broadcast(
                    &Group::Session(session_id),
                    ServerEvent::PresenceUpdate {
                        session_id,
                        user_id: conn.user_id,
                        online: false,
                    },
                    None,
                )
                .await;
        }
    }

    pub async fn get_user_connections(&self, user_id: Uuid) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Whether any connection of the user is live
    pub async fn is_user_online(&self, user_id: Uuid) -> bool {
        let connections = self.connections.read().await;
        connections.values().any(|c| c.user_id == user_id)
    }

    /// Join one connection to a session group. The caller has already checked
    /// that the user participates in `session`.
    ///
    /// The joiner learns the other participant's presence; the rest of the
    /// group learns the joiner is online.
    pub async fn join_session(&self, conn: &Arc<Connection>, session: &Session) {
        let group = Group::Session(session.id);
        conn.subscribe(session.id).await;
        self.groups.join(group, Arc::clone(conn)).await;
        let _ = conn.send(ServerEvent::Joined {
            session_id: session.id,
        });

        if let Some(other) = session.other_participant(conn.user_id) {
            if self.is_user_online(other).await {
                let _ = conn.send(ServerEvent::PresenceUpdate {
                    session_id: session.id,
                    user_id: other,
                    online: true,
                });
            }
        }

        self.groups
            .broadcast(
                &group,
                ServerEvent::PresenceUpdate {
                    session_id: session.id,
                    user_id: conn.user_id,
                    online: true,
                },
                Some(conn.user_id),
            )
            .await;
    }

    pub async fn leave_session(&self, conn: &Arc<Connection>, session_id: Uuid) {
        conn.unsubscribe(session_id).await;
        self.groups
            .leave(&Group::Session(session_id), &conn.connection_id)
            .await;
    }

    /// Join every live connection of `user_id` to the session group.
    /// Used when a user becomes a participant (create, claim). Each attached
    /// connection learns whether the other participant is already online.
    pub async fn attach_user(&self, user_id: Uuid, session: &Session) -> usize {
        let conns = self.get_user_connections(user_id).await;
        let other_online = match session.other_participant(user_id) {
            Some(other) if self.is_user_online(other).await => Some(other),
            _ => None,
        };

        for conn in &conns {
            conn.subscribe(session.id).await;
            self.groups
                .join(Group::Session(session.id), Arc::clone(conn))
                .await;
            if let Some(other) = other_online {
                let _ = conn.send(ServerEvent::PresenceUpdate {
                    session_id: session.id,
                    user_id: other,
                    online: true,
                });
            }
        }
        conns.len()
    }

    /// Broadcast to a session group, optionally skipping one user's connections.
    /// Returns the number of connections reached.
    pub async fn publish_to_session(
        &self,
        session_id: Uuid,
        event: ServerEvent,
        exclude_user: Option<Uuid>,
    ) -> usize {
        self.groups
            .broadcast(&Group::Session(session_id), event, exclude_user)
            .await
    }

    /// Broadcast a queue update to every role group able to claim `target`
    pub async fn publish_to_queue(&self, target: RoutingTarget, event: ServerEvent) -> usize {
        let mut recipients = 0;
        for role in QUEUE_ROLES.iter().filter(|r| r.can_claim(target)) {
            recipients += self
                .groups
                .broadcast(&Group::Role(*role), event.clone(), None)
                .await;
        }
        recipients
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn get_stats(&self) -> RealtimeStats {
        RealtimeStats {
            active_connections: self.connection_count().await,
            active_groups: self.groups.get_group_count().await,
        }
    }
}

impl Default for RealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeStats {
    pub active_connections: usize,
    pub active_groups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_shared::{SessionState, Topic, Urgency};
    use time::OffsetDateTime;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn connect(
        channel: &RealtimeChannel,
        user_id: Uuid,
        role: Role,
    ) -> (Arc<Connection>, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (channel.add_connection(Connection::new(user_id, role, tx)).await, rx)
    }

    fn active_session(requester: Uuid, supporter: Uuid) -> Session {
        Session {
            id: Uuid::new_v4(),
            requester_id: requester,
            supporter_id: Some(supporter),
            topic: Topic::Sleep,
            urgency: Urgency::Low,
            routing_target: RoutingTarget::PeerSupporter,
            state: SessionState::Active,
            minor_safe: true,
            created_at: OffsetDateTime::now_utc(),
            claimed_at: Some(OffsetDateTime::now_utc()),
            closed_at: None,
            close_reason: None,
            resolution_notes: None,
            last_message_preview: None,
            last_message_at: None,
            requester_archived: false,
            supporter_archived: false,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let channel = RealtimeChannel::new();
        let user_id = Uuid::new_v4();

        let (conn, _rx) = connect(&channel, user_id, Role::Requester).await;
        assert_eq!(channel.connection_count().await, 1);
        assert!(channel.is_user_online(user_id).await);

        channel.remove_connection(&conn.connection_id).await;
        assert_eq!(channel.connection_count().await, 0);
        assert!(!channel.is_user_online(user_id).await);
    }

    #[tokio::test]
    async fn test_queue_fan_out_follows_claimable_targets() {
        let channel = RealtimeChannel::new();
        let (_c, mut counselor_rx) = connect(&channel, Uuid::new_v4(), Role::Counselor).await;
        let (_p, mut peer_rx) = connect(&channel, Uuid::new_v4(), Role::PeerSupporter).await;
        let (_r, mut requester_rx) = connect(&channel, Uuid::new_v4(), Role::Requester).await;

        let event = ServerEvent::QueueItemRemoved {
            session_id: Uuid::new_v4(),
        };
        assert_eq!(
            channel.publish_to_queue(RoutingTarget::Counselor, event.clone()).await,
            1
        );
        assert_eq!(drain(&mut counselor_rx).len(), 1);
        assert!(drain(&mut peer_rx).is_empty());

        assert_eq!(channel.publish_to_queue(RoutingTarget::PeerSupporter, event).await, 2);
        assert_eq!(drain(&mut counselor_rx).len(), 1);
        assert_eq!(drain(&mut peer_rx).len(), 1);
        assert!(drain(&mut requester_rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_reports_presence_both_ways() {
        let channel = RealtimeChannel::new();
        let requester = Uuid::new_v4();
        let supporter = Uuid::new_v4();
        let session = active_session(requester, supporter);

        let (req_conn, mut req_rx) = connect(&channel, requester, Role::Requester).await;
        channel.join_session(&req_conn, &session).await;
        let events = drain(&mut req_rx);
        assert_eq!(events, vec![ServerEvent::Joined { session_id: session.id }]);

        let (sup_conn, mut sup_rx) = connect(&channel, supporter, Role::PeerSupporter).await;
        channel.join_session(&sup_conn, &session).await;

        let sup_events = drain(&mut sup_rx);
        assert!(sup_events.contains(&ServerEvent::PresenceUpdate {
            session_id: session.id,
            user_id: requester,
            online: true,
        }));
        assert_eq!(
            drain(&mut req_rx),
            vec![ServerEvent::PresenceUpdate {
                session_id: session.id,
                user_id: supporter,
                online: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_last_disconnect_broadcasts_offline() {
        let channel = RealtimeChannel::new();
        let requester = Uuid::new_v4();
        let supporter = Uuid::new_v4();
        let session = active_session(requester, supporter);

        let (req_conn, mut req_rx) = connect(&channel, requester, Role::Requester).await;
        let (sup_a, _rx_a) = connect(&channel, supporter, Role::PeerSupporter).await;
        let (sup_b, _rx_b) = connect(&channel, supporter, Role::PeerSupporter).await;
        channel.join_session(&req_conn, &session).await;
        channel.join_session(&sup_a, &session).await;
        channel.join_session(&sup_b, &session).await;
        drain(&mut req_rx);

        // Supporter still has another tab open
        channel.remove_connection(&sup_a.connection_id).await;
        assert!(drain(&mut req_rx).is_empty());

        channel.remove_connection(&sup_b.connection_id).await;
        assert_eq!(
            drain(&mut req_rx),
            vec![ServerEvent::PresenceUpdate {
                session_id: session.id,
                user_id: supporter,
                online: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_attach_user_joins_all_live_connections() {
        let channel = RealtimeChannel::new();
        let requester = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let session = active_session(requester, user_id);
        let (_a, mut rx_a) = connect(&channel, user_id, Role::Counselor).await;
        let (_b, mut rx_b) = connect(&channel, user_id, Role::Counselor).await;

        // Requester is offline, so no presence is reported
        assert_eq!(channel.attach_user(user_id, &session).await, 2);
        assert_eq!(
            channel.publish_to_session(session.id, ServerEvent::Pong, None).await,
            2
        );
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::Pong]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::Pong]);
    }

    #[tokio::test]
    async fn test_attach_user_reports_online_peer() {
        let channel = RealtimeChannel::new();
        let requester = Uuid::new_v4();
        let supporter = Uuid::new_v4();
        let session = active_session(requester, supporter);
        let (_r, _rx_r) = connect(&channel, requester, Role::Requester).await;
        let (_s, mut rx_s) = connect(&channel, supporter, Role::Counselor).await;

        assert_eq!(channel.attach_user(supporter, &session).await, 1);
        assert_eq!(
            drain(&mut rx_s),
            vec![ServerEvent::PresenceUpdate {
                session_id: session.id,
                user_id: requester,
                online: true,
            }]
        );
    }
}
