//! Realtime connection management
//!
//! Represents an authenticated socket connection with its session-group subscriptions.

use harbor_shared::{Role, ServerEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// An authenticated realtime connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this connection (one user may hold several)
    pub connection_id: Uuid,

    /// Authenticated user ID
    pub user_id: Uuid,

    /// Role claimed in the token; decides which role groups the connection joins
    pub role: Role,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Session groups this connection has joined
    pub subscriptions: Arc<RwLock<HashSet<Uuid>>>,
}

impl Connection {
    pub fn new(user_id: Uuid, role: Role, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user_id,
            role,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Err if the connection's writer task has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record a session-group subscription. Returns false if already subscribed.
    pub async fn subscribe(&self, session_id: Uuid) -> bool {
        let mut subs = self.subscriptions.write().await;
        let added = subs.insert(session_id);
        if added {
            tracing::debug!(
                connection_id = %self.connection_id,
                session_id = %session_id,
                "Subscribed to session"
            );
        }
        added
    }

    pub async fn unsubscribe(&self, session_id: Uuid) -> bool {
        let mut subs = self.subscriptions.write().await;
        subs.remove(&session_id)
    }

    pub async fn is_subscribed(&self, session_id: &Uuid) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(session_id)
    }

    pub async fn get_subscriptions(&self) -> HashSet<Uuid> {
        let subs = self.subscriptions.read().await;
        subs.clone()
    }
}
