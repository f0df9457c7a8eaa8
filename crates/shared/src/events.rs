//! Realtime event types and serialization
//!
//! Defines all client-to-server and server-to-client event types exchanged
//! over the realtime channel. Both directions derive `Serialize` and
//! `Deserialize` so the server and the client reconciler share one wire format.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{Message, Session};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a session group (participants only)
    JoinSession { session_id: Uuid },

    /// Leave a session group
    LeaveSession { session_id: Uuid },

    /// Start typing in a session
    TypingStart { session_id: Uuid },

    /// Stop typing in a session
    TypingStop { session_id: Uuid },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { connection_id: Uuid },

    /// Joined a session group
    Joined { session_id: Uuid },

    /// New session waiting in the queue (role groups)
    SessionQueued { session: Session },

    /// Session left the queue because it was claimed or closed (role groups)
    QueueItemRemoved { session_id: Uuid },

    SessionClaimed {
        session_id: Uuid,
        supporter_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        claimed_at: OffsetDateTime,
    },

    SessionResolved {
        session_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        resolved_at: OffsetDateTime,
    },

    SessionClosed {
        session_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        closed_at: OffsetDateTime,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },

    /// New message persisted in a session
    NewMessage { session_id: Uuid, message: Message },

    /// Message edited or tombstoned
    MessageUpdated { session_id: Uuid, message: Message },

    /// Read receipt; `None` means every message from the other participant
    MessagesRead {
        session_id: Uuid,
        reader_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message_ids: Option<Vec<Uuid>>,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },

    /// Participant presence changed
    PresenceUpdate {
        session_id: Uuid,
        user_id: Uuid,
        online: bool,
    },

    /// User started typing in session
    UserTypingStart { session_id: Uuid, user_id: Uuid },

    /// User stopped typing in session
    UserTypingStop { session_id: Uuid, user_id: Uuid },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Short event name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Joined { .. } => "joined",
            Self::SessionQueued { .. } => "session_queued",
            Self::QueueItemRemoved { .. } => "queue_item_removed",
            Self::SessionClaimed { .. } => "session_claimed",
            Self::SessionResolved { .. } => "session_resolved",
            Self::SessionClosed { .. } => "session_closed",
            Self::NewMessage { .. } => "new_message",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessagesRead { .. } => "messages_read",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::UserTypingStart { .. } => "user_typing_start",
            Self::UserTypingStop { .. } => "user_typing_stop",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}
