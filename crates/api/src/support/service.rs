//! Session service
//!
//! Orchestrates every support-session operation: validates input, consults the
//! access evaluator and routing engine, applies the state machine through the
//! store's conditional writes, then tells the realtime channel what to broadcast.
//! Realtime delivery is best-effort; the store write is the source of truth.

use harbor_shared::{
    ConflictKind, ContentType, DeliveryStatus, Message, RateLimiter, Role, RoutingTarget,
    ServerEvent, Session, SessionState, SupportError, SupportResult, Topic, Urgency,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Duration;
use uuid::Uuid;

use super::access::{evaluate, Actor};
use super::clock::Clock;
use super::lifecycle::{self, Transition};
use super::moderation::{screen, ContentFilter};
use super::routing::route;
use super::store::{
    DeleteMessage, EditMessage, NewMessage, NewSession, ParticipantSide, SessionStore,
};
use crate::websocket::RealtimeChannel;

/// Tunable limits applied by the service
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Maximum message body length in characters
    pub message_max_length: usize,
    pub edit_window: Duration,
    pub delete_window: Duration,
    /// Whether peer-routed sessions admit minors
    pub peer_sessions_minor_safe: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            message_max_length: 4000,
            edit_window: Duration::minutes(60),
            delete_window: Duration::minutes(1440),
            peer_sessions_minor_safe: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub topic: Topic,
    pub urgency: Urgency,
    /// Optional opening message posted on the requester's behalf
    #[serde(default)]
    pub message: Option<String>,
}

/// A session with its full ordered history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    realtime: RealtimeChannel,
    filter: Arc<dyn ContentFilter>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    policy: SessionPolicy,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        realtime: RealtimeChannel,
        filter: Arc<dyn ContentFilter>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            realtime,
            filter,
            clock,
            limiter,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn realtime(&self) -> &RealtimeChannel {
        &self.realtime
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(
        &self,
        actor: &Actor,
        req: CreateSessionRequest,
    ) -> SupportResult<Session> {
        if actor.role != Role::Requester {
            return Err(SupportError::AccessDenied(
                "Only requesters can start a support session".to_string(),
            ));
        }
        let opening = req
            .message
            .as_deref()
            .map(|body| self.validate_body(body))
            .transpose()?;

        let routing_target = route(req.urgency, req.topic);
        let minor_safe = routing_target == RoutingTarget::Counselor
            || self.policy.peer_sessions_minor_safe;
        evaluate(actor, minor_safe).require_write()?;

        let limit = self.limiter.check_session_creation(actor.user_id).await;
        if !limit.allowed {
            return Err(SupportError::RateLimited {
                retry_after_seconds: limit.retry_after_seconds.unwrap_or(60),
            });
        }

        let mut session = self
            .store
            .insert_session(NewSession {
                id: Uuid::new_v4(),
                requester_id: actor.user_id,
                topic: req.topic,
                urgency: req.urgency,
                routing_target,
                minor_safe,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            session_id = %session.id,
            requester_id = %actor.user_id,
            topic = %session.topic,
            urgency = %session.urgency,
            routing_target = %session.routing_target,
            "Support session created"
        );

        self.realtime.attach_user(actor.user_id, &session).await;

        if let Some(body) = opening {
            self.persist_message(actor.user_id, &session, body, ContentType::Text)
                .await?;
            session = self
                .store
                .get_session(session.id)
                .await?
                .ok_or(SupportError::NotFound("session"))?;
        }

        self.realtime
            .publish_to_queue(
                session.routing_target,
                ServerEvent::SessionQueued {
                    session: session.clone(),
                },
            )
            .await;

        Ok(session)
    }

    /// WAITING sessions the actor's role may claim, most urgent first
    pub async fn list_queue(&self, actor: &Actor) -> SupportResult<Vec<Session>> {
        if !actor.role.is_supporter() {
            return Err(SupportError::AccessDenied(
                "Only counselors and peer supporters can view the queue".to_string(),
            ));
        }

        let queue = self
            .store
            .list_waiting(actor.role.claimable_targets())
            .await?;
        Ok(queue
            .into_iter()
            .filter(|s| evaluate(actor, s.minor_safe).can_read())
            .collect())
    }

    pub async fn claim_session(&self, actor: &Actor, session_id: Uuid) -> SupportResult<Session> {
        let session = self.load_session(session_id).await?;
        evaluate(actor, session.minor_safe).require_write()?;
        lifecycle::authorize_claim(&session, actor.role)?;

        let Some(session) = self
            .store
            .claim(session_id, actor.user_id, self.clock.now())
            .await?
        else {
            tracing::info!(
                session_id = %session_id,
                supporter_id = %actor.user_id,
                "Claim lost to a concurrent transition"
            );
            return Err(self.transition_conflict(session_id, Transition::Claim).await);
        };

        tracing::info!(
            session_id = %session.id,
            supporter_id = %actor.user_id,
            "Support session claimed"
        );

        self.realtime.attach_user(actor.user_id, &session).await;
        self.realtime
            .publish_to_session(
                session.id,
                ServerEvent::SessionClaimed {
                    session_id: session.id,
                    supporter_id: actor.user_id,
                    claimed_at: session.claimed_at.unwrap_or_else(|| self.clock.now()),
                },
                None,
            )
            .await;
        if self.realtime.is_user_online(actor.user_id).await {
            self.realtime
                .publish_to_session(
                    session.id,
                    ServerEvent::PresenceUpdate {
                        session_id: session.id,
                        user_id: actor.user_id,
                        online: true,
                    },
                    Some(actor.user_id),
                )
                .await;
        }
        self.realtime
            .publish_to_queue(
                session.routing_target,
                ServerEvent::QueueItemRemoved {
                    session_id: session.id,
                },
            )
            .await;

        Ok(session)
    }

    /// Session plus its ordered history; the reconciliation read
    pub async fn get_session(&self, actor: &Actor, session_id: Uuid) -> SupportResult<SessionDetail> {
        let session = self.load_session(session_id).await?;
        self.require_visible(actor, &session)?;
        evaluate(actor, session.minor_safe).require_read()?;

        let messages = self.store.list_messages(session_id).await?;
        Ok(SessionDetail { session, messages })
    }

    pub async fn list_my_sessions(
        &self,
        actor: &Actor,
        include_archived: bool,
    ) -> SupportResult<Vec<Session>> {
        let sessions = self.store.list_for_participant(actor.user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| include_archived || !s.is_archived_for(actor.user_id))
            .filter(|s| evaluate(actor, s.minor_safe).can_read())
            .collect())
    }

    pub async fn resolve_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        notes: Option<String>,
    ) -> SupportResult<Session> {
        let session = self.load_session(session_id).await?;
        lifecycle::authorize_resolve(&session, actor)?;
        evaluate(actor, session.minor_safe).require_write()?;

        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let Some(session) = self
            .store
            .resolve(session_id, actor.user_id, notes, self.clock.now())
            .await?
        else {
            return Err(self.transition_conflict(session_id, Transition::Resolve).await);
        };

        tracing::info!(
            session_id = %session.id,
            supporter_id = %actor.user_id,
            "Support session resolved"
        );

        self.realtime
            .publish_to_session(
                session.id,
                ServerEvent::SessionResolved {
                    session_id: session.id,
                    resolved_at: session.closed_at.unwrap_or_else(|| self.clock.now()),
                },
                None,
            )
            .await;

        Ok(session)
    }

    pub async fn close_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        reason: Option<String>,
    ) -> SupportResult<Session> {
        let session = self.load_session(session_id).await?;
        lifecycle::authorize_close(&session, actor)?;
        let was_waiting = session.state == SessionState::Waiting;

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let Some(session) = self
            .store
            .close(session_id, reason, self.clock.now())
            .await?
        else {
            return Err(self.transition_conflict(session_id, Transition::Close).await);
        };

        tracing::info!(
            session_id = %session.id,
            closed_by = %actor.user_id,
            role = %actor.role,
            "Support session closed"
        );

        self.realtime
            .publish_to_session(
                session.id,
                ServerEvent::SessionClosed {
                    session_id: session.id,
                    closed_at: session.closed_at.unwrap_or_else(|| self.clock.now()),
                    reason: session.close_reason.clone(),
                },
                None,
            )
            .await;
        if was_waiting {
            self.realtime
                .publish_to_queue(
                    session.routing_target,
                    ServerEvent::QueueItemRemoved {
                        session_id: session.id,
                    },
                )
                .await;
        }

        Ok(session)
    }

    /// Toggle the caller's own archive flag; the other participant's view is untouched
    pub async fn archive_session(
        &self,
        actor: &Actor,
        session_id: Uuid,
        archived: bool,
    ) -> SupportResult<Session> {
        let session = self.load_session(session_id).await?;
        let side = if session.requester_id == actor.user_id {
            ParticipantSide::Requester
        } else if session.supporter_id == Some(actor.user_id) {
            ParticipantSide::Supporter
        } else {
            return Err(SupportError::AccessDenied(
                "Only participants can archive a session".to_string(),
            ));
        };
        evaluate(actor, session.minor_safe).require_read()?;

        self.store
            .set_archived(session_id, side, archived)
            .await?
            .ok_or(SupportError::NotFound("session"))
    }

    /// Check that the actor may join the session's realtime group
    pub async fn authorize_group_join(&self, actor: &Actor, session_id: Uuid) -> SupportResult<Session> {
        let session = self.load_session(session_id).await?;
        self.require_participant(actor, &session)?;
        evaluate(actor, session.minor_safe).require_read()?;
        Ok(session)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn send_message(
        &self,
        actor: &Actor,
        session_id: Uuid,
        body: &str,
        content_type: ContentType,
    ) -> SupportResult<Message> {
        if content_type == ContentType::System {
            return Err(SupportError::Validation(
                "System messages cannot be sent by clients".to_string(),
            ));
        }
        let body = self.validate_body(body)?;

        let session = self.load_session(session_id).await?;
        self.require_participant(actor, &session)?;
        evaluate(actor, session.minor_safe).require_write()?;
        lifecycle::ensure_accepts_messages(&session)?;

        let limit = self.limiter.check_message_send(actor.user_id).await;
        if !limit.allowed {
            return Err(SupportError::RateLimited {
                retry_after_seconds: limit.retry_after_seconds.unwrap_or(60),
            });
        }

        self.persist_message(actor.user_id, &session, body, content_type)
            .await
    }

    /// Persist, broadcast to the other participant, then record delivery
    async fn persist_message(
        &self,
        sender_id: Uuid,
        session: &Session,
        body: String,
        content_type: ContentType,
    ) -> SupportResult<Message> {
        let verdict = screen(self.filter.as_ref(), &body).await;

        let Some(mut message) = self
            .store
            .insert_message(NewMessage {
                id: Uuid::new_v4(),
                session_id: session.id,
                sender_id,
                body,
                content_type,
                created_at: self.clock.now(),
                flagged: verdict.flagged,
                flag_reasons: verdict.reasons,
            })
            .await?
        else {
            return Err(SupportError::Conflict(ConflictKind::AlreadyTerminal));
        };

        tracing::info!(
            session_id = %session.id,
            message_id = %message.id,
            sender_id = %sender_id,
            flagged = message.flagged,
            "Message persisted"
        );

        let recipients = self
            .realtime
            .publish_to_session(
                session.id,
                ServerEvent::NewMessage {
                    session_id: session.id,
                    message: message.clone(),
                },
                Some(sender_id),
            )
            .await;

        if recipients > 0 {
            match self.store.mark_delivered(message.id).await {
                Ok(true) => message.status = DeliveryStatus::Delivered,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "Failed to record delivery");
                }
            }
        }

        Ok(message)
    }

    pub async fn mark_read(
        &self,
        actor: &Actor,
        session_id: Uuid,
        message_ids: Option<Vec<Uuid>>,
    ) -> SupportResult<u64> {
        let session = self.load_session(session_id).await?;
        self.require_participant(actor, &session)?;
        evaluate(actor, session.minor_safe).require_read()?;

        let read_at = self.clock.now();
        let updated = self
            .store
            .mark_read(session_id, actor.user_id, message_ids.as_deref(), read_at)
            .await?;

        if updated > 0 {
            self.realtime
                .publish_to_session(
                    session_id,
                    ServerEvent::MessagesRead {
                        session_id,
                        reader_id: actor.user_id,
                        message_ids,
                        read_at,
                    },
                    Some(actor.user_id),
                )
                .await;
        }

        Ok(updated)
    }

    pub async fn edit_message(
        &self,
        actor: &Actor,
        message_id: Uuid,
        body: &str,
    ) -> SupportResult<Message> {
        let body = self.validate_body(body)?;
        let (message, session) = self.load_own_message(actor, message_id).await?;
        evaluate(actor, session.minor_safe).require_write()?;
        lifecycle::ensure_accepts_messages(&session)?;

        let now = self.clock.now();
        let created_after = now - self.policy.edit_window;
        if message.created_at < created_after {
            return Err(SupportError::Conflict(ConflictKind::EditWindowExpired));
        }

        let verdict = screen(self.filter.as_ref(), &body).await;
        let Some(updated) = self
            .store
            .edit_message(EditMessage {
                message_id,
                sender_id: actor.user_id,
                body,
                flagged: verdict.flagged,
                flag_reasons: verdict.reasons,
                created_after,
                edited_at: now,
            })
            .await?
        else {
            return Err(self
                .message_conflict(message_id, ConflictKind::EditWindowExpired)
                .await);
        };

        tracing::info!(
            session_id = %session.id,
            message_id = %message_id,
            "Message edited"
        );
        self.publish_update(&updated).await;
        Ok(updated)
    }

    /// Tombstone a message; it keeps its id and position
    pub async fn delete_message(&self, actor: &Actor, message_id: Uuid) -> SupportResult<Message> {
        let (message, session) = self.load_own_message(actor, message_id).await?;
        evaluate(actor, session.minor_safe).require_write()?;
        lifecycle::ensure_accepts_messages(&session)?;

        let now = self.clock.now();
        let created_after = now - self.policy.delete_window;
        if message.created_at < created_after {
            return Err(SupportError::Conflict(ConflictKind::DeleteWindowExpired));
        }

        let Some(updated) = self
            .store
            .delete_message(DeleteMessage {
                message_id,
                sender_id: actor.user_id,
                created_after,
                deleted_at: now,
            })
            .await?
        else {
            return Err(self
                .message_conflict(message_id, ConflictKind::DeleteWindowExpired)
                .await);
        };

        tracing::info!(
            session_id = %session.id,
            message_id = %message_id,
            "Message deleted"
        );
        self.publish_update(&updated).await;
        Ok(updated)
    }

    async fn publish_update(&self, message: &Message) {
        self.realtime
            .publish_to_session(
                message.session_id,
                ServerEvent::MessageUpdated {
                    session_id: message.session_id,
                    message: message.clone(),
                },
                None,
            )
            .await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn validate_body(&self, body: &str) -> SupportResult<String> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SupportError::Validation(
                "Message body cannot be empty".to_string(),
            ));
        }
        if body.chars().count() > self.policy.message_max_length {
            return Err(SupportError::Validation(format!(
                "Message body exceeds {} characters",
                self.policy.message_max_length
            )));
        }
        Ok(body.to_string())
    }

    async fn load_session(&self, session_id: Uuid) -> SupportResult<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(SupportError::NotFound("session"))
    }

    /// Load a message the actor sent, with its session
    async fn load_own_message(
        &self,
        actor: &Actor,
        message_id: Uuid,
    ) -> SupportResult<(Message, Session)> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(SupportError::NotFound("message"))?;
        if message.sender_id != actor.user_id {
            return Err(SupportError::AccessDenied(
                "Only the original sender can change this message".to_string(),
            ));
        }
        if message.is_deleted {
            return Err(SupportError::Conflict(ConflictKind::MessageDeleted));
        }
        let session = self.load_session(message.session_id).await?;
        Ok((message, session))
    }

    /// Participants, staff, and supporters who could claim a WAITING session may view it
    fn require_visible(&self, actor: &Actor, session: &Session) -> SupportResult<()> {
        let claimable =
            session.state == SessionState::Waiting && actor.role.can_claim(session.routing_target);
        if session.is_participant(actor.user_id) || actor.role.is_staff() || claimable {
            return Ok(());
        }
        Err(SupportError::AccessDenied(
            "You are not a participant in this session".to_string(),
        ))
    }

    fn require_participant(&self, actor: &Actor, session: &Session) -> SupportResult<()> {
        if session.is_participant(actor.user_id) {
            return Ok(());
        }
        Err(SupportError::AccessDenied(
            "You are not a participant in this session".to_string(),
        ))
    }

    /// Classify a failed conditional transition against the state that won
    async fn transition_conflict(&self, session_id: Uuid, transition: Transition) -> SupportError {
        match self.store.get_session(session_id).await {
            Ok(Some(current)) => match lifecycle::next_state(current.state, transition) {
                Err(kind) => SupportError::Conflict(kind),
                Ok(_) if transition == Transition::Claim && current.supporter_id.is_some() => {
                    SupportError::Conflict(ConflictKind::AlreadyClaimed)
                }
                Ok(_) => SupportError::Conflict(ConflictKind::NotActive),
            },
            Ok(None) => SupportError::NotFound("session"),
            Err(e) => e,
        }
    }

    /// Classify a failed message edit or delete
    async fn message_conflict(&self, message_id: Uuid, window: ConflictKind) -> SupportError {
        let message = match self.store.get_message(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => return SupportError::NotFound("message"),
            Err(e) => return e,
        };
        if message.is_deleted {
            return SupportError::Conflict(ConflictKind::MessageDeleted);
        }
        match self.store.get_session(message.session_id).await {
            Ok(Some(session)) if session.state.is_terminal() => {
                SupportError::Conflict(ConflictKind::AlreadyTerminal)
            }
            Ok(_) => SupportError::Conflict(window),
            Err(e) => e,
        }
    }
}
