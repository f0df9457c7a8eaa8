//! In-memory session store
//!
//! Arena-style maps behind a single `RwLock`. Each conditional write checks its
//! guard and mutates under the same write guard, which gives the claim
//! compare-and-swap its atomicity. Used by tests and `STORAGE_BACKEND=memory`.

use async_trait::async_trait;
use harbor_shared::{
    preview_of, DeliveryStatus, Message, RoutingTarget, Session, SessionState, SupportResult,
    DELETED_MESSAGE_BODY,
};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    next_message_time, truncate_to_micros, DeleteMessage, EditMessage, NewMessage, NewSession,
    ParticipantSide, SessionStore,
};
use crate::support::lifecycle::{source_states, Transition};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    messages: HashMap<Uuid, Message>,
    /// session_id -> message ids in creation order
    timelines: HashMap<Uuid, Vec<Uuid>>,
}

impl Inner {
    fn session_open(&self, session_id: Uuid) -> bool {
        self.sessions
            .get(&session_id)
            .map(|s| !s.state.is_terminal())
            .unwrap_or(false)
    }

    /// Keep the list-view preview in step when the newest message changes
    fn refresh_preview(&mut self, message: &Message) {
        if let Some(session) = self.sessions.get_mut(&message.session_id) {
            if session.last_message_at == Some(message.created_at) {
                session.last_message_preview = Some(preview_of(&message.body));
            }
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn health_check(&self) -> bool {
        true
    }

    async fn insert_session(&self, new: NewSession) -> SupportResult<Session> {
        let session = Session {
            id: new.id,
            requester_id: new.requester_id,
            supporter_id: None,
            topic: new.topic,
            urgency: new.urgency,
            routing_target: new.routing_target,
            state: SessionState::Waiting,
            minor_safe: new.minor_safe,
            created_at: truncate_to_micros(new.created_at),
            claimed_at: None,
            closed_at: None,
            close_reason: None,
            resolution_notes: None,
            last_message_preview: None,
            last_message_at: None,
            requester_archived: false,
            supporter_archived: false,
        };

        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session.clone());
        inner.timelines.insert(session.id, Vec::new());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> SupportResult<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn list_waiting(&self, targets: &[RoutingTarget]) -> SupportResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut queue: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Waiting && targets.contains(&s.routing_target))
            .cloned()
            .collect();
        queue.sort_by(|a, b| {
            b.urgency
                .rank()
                .cmp(&a.urgency.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(queue)
    }

    async fn list_for_participant(&self, user_id: Uuid) -> SupportResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.is_participant(user_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at().cmp(&a.last_activity_at()));
        Ok(sessions)
    }

    async fn list_stale(
        &self,
        waiting_before: OffsetDateTime,
        active_idle_before: OffsetDateTime,
    ) -> SupportResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut stale: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| match s.state {
                SessionState::Waiting => s.created_at < waiting_before,
                SessionState::Active => s.last_activity_at() < active_idle_before,
                SessionState::Resolved | SessionState::Closed => false,
            })
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.created_at);
        Ok(stale)
    }

    async fn claim(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        claimed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !source_states(Transition::Claim).contains(&session.state)
            || session.supporter_id.is_some()
        {
            return Ok(None);
        }

        session.supporter_id = Some(supporter_id);
        session.state = SessionState::Active;
        session.claimed_at = Some(truncate_to_micros(claimed_at));
        Ok(Some(session.clone()))
    }

    async fn resolve(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        notes: Option<String>,
        resolved_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !source_states(Transition::Resolve).contains(&session.state)
            || session.supporter_id != Some(supporter_id)
        {
            return Ok(None);
        }

        session.state = SessionState::Resolved;
        session.closed_at = Some(truncate_to_micros(resolved_at));
        session.resolution_notes = notes;
        Ok(Some(session.clone()))
    }

    async fn close(
        &self,
        id: Uuid,
        reason: Option<String>,
        closed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !source_states(Transition::Close).contains(&session.state) {
            return Ok(None);
        }

        session.state = SessionState::Closed;
        session.closed_at = Some(truncate_to_micros(closed_at));
        session.close_reason = reason;
        Ok(Some(session.clone()))
    }

    async fn set_archived(
        &self,
        id: Uuid,
        side: ParticipantSide,
        archived: bool,
    ) -> SupportResult<Option<Session>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        match side {
            ParticipantSide::Requester => session.requester_archived = archived,
            ParticipantSide::Supporter => session.supporter_archived = archived,
        }
        Ok(Some(session.clone()))
    }

    async fn insert_message(&self, new: NewMessage) -> SupportResult<Option<Message>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&new.session_id) else {
            return Ok(None);
        };
        if session.state.is_terminal() {
            return Ok(None);
        }

        let created_at = next_message_time(new.created_at, session.last_message_at);
        session.last_message_at = Some(created_at);
        session.last_message_preview = Some(preview_of(&new.body));

        let message = Message {
            id: new.id,
            session_id: new.session_id,
            sender_id: new.sender_id,
            body: new.body,
            content_type: new.content_type,
            status: DeliveryStatus::Sent,
            created_at,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            flagged: new.flagged,
            flag_reasons: new.flag_reasons,
        };

        inner.messages.insert(message.id, message.clone());
        inner
            .timelines
            .entry(message.session_id)
            .or_default()
            .push(message.id);
        Ok(Some(message))
    }

    async fn get_message(&self, id: Uuid) -> SupportResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.messages.get(&id).cloned())
    }

    async fn list_messages(&self, session_id: Uuid) -> SupportResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let messages = inner
            .timelines
            .get(&session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(messages)
    }

    async fn mark_delivered(&self, message_id: Uuid) -> SupportResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.messages.get_mut(&message_id) {
            Some(message) if message.status == DeliveryStatus::Sent => {
                message.status = DeliveryStatus::Delivered;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        message_ids: Option<&[Uuid]>,
        _read_at: OffsetDateTime,
    ) -> SupportResult<u64> {
        let mut inner = self.inner.write().await;
        let ids = inner.timelines.get(&session_id).cloned().unwrap_or_default();

        let mut updated = 0;
        for id in ids {
            if let Some(filter) = message_ids {
                if !filter.contains(&id) {
                    continue;
                }
            }
            if let Some(message) = inner.messages.get_mut(&id) {
                if message.sender_id != reader_id && message.status != DeliveryStatus::Read {
                    message.status = DeliveryStatus::Read;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn edit_message(&self, edit: EditMessage) -> SupportResult<Option<Message>> {
        let mut inner = self.inner.write().await;
        let Some(session_id) = inner.messages.get(&edit.message_id).map(|m| m.session_id) else {
            return Ok(None);
        };
        if !inner.session_open(session_id) {
            return Ok(None);
        }

        let Some(message) = inner.messages.get_mut(&edit.message_id) else {
            return Ok(None);
        };
        if message.sender_id != edit.sender_id
            || message.is_deleted
            || message.created_at < edit.created_after
        {
            return Ok(None);
        }

        message.body = edit.body;
        message.is_edited = true;
        message.edited_at = Some(truncate_to_micros(edit.edited_at));
        message.flagged = edit.flagged;
        message.flag_reasons = edit.flag_reasons;
        let updated = message.clone();

        inner.refresh_preview(&updated);
        Ok(Some(updated))
    }

    async fn delete_message(&self, delete: DeleteMessage) -> SupportResult<Option<Message>> {
        let mut inner = self.inner.write().await;
        let Some(session_id) = inner.messages.get(&delete.message_id).map(|m| m.session_id) else {
            return Ok(None);
        };
        if !inner.session_open(session_id) {
            return Ok(None);
        }

        let Some(message) = inner.messages.get_mut(&delete.message_id) else {
            return Ok(None);
        };
        if message.sender_id != delete.sender_id
            || message.is_deleted
            || message.created_at < delete.created_after
        {
            return Ok(None);
        }

        message.body = DELETED_MESSAGE_BODY.to_string();
        message.is_deleted = true;
        message.deleted_at = Some(truncate_to_micros(delete.deleted_at));
        message.flagged = false;
        message.flag_reasons.clear();
        let updated = message.clone();

        inner.refresh_preview(&updated);
        Ok(Some(updated))
    }
}
