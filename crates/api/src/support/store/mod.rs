//! Session store
//!
//! Durable record of sessions and messages. Sessions and messages are keyed by
//! id and related only through `session_id`; neither side holds the other.
//!
//! Every state-changing method is a conditional write: it returns `Ok(None)`
//! (or `false`/`0`) when its guard no longer holds, and the service reports
//! that as a conflict. Storage never reads the wall clock; callers pass times in.

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use harbor_shared::{ContentType, Message, RoutingTarget, Session, SupportResult, Topic, Urgency};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub topic: Topic,
    pub urgency: Urgency,
    pub routing_target: RoutingTarget,
    pub minor_safe: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub content_type: ContentType,
    /// Proposed creation time; the store may move it forward to keep per-session order strict
    pub created_at: OffsetDateTime,
    pub flagged: bool,
    pub flag_reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EditMessage {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub flagged: bool,
    pub flag_reasons: Vec<String>,
    /// Messages created before this instant are outside the edit window
    pub created_after: OffsetDateTime,
    pub edited_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct DeleteMessage {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    /// Messages created before this instant are outside the delete window
    pub created_after: OffsetDateTime,
    pub deleted_at: OffsetDateTime,
}

/// Which participant's archive flag to toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantSide {
    Requester,
    Supporter,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether the backing storage is reachable
    async fn health_check(&self) -> bool;

    async fn insert_session(&self, new: NewSession) -> SupportResult<Session>;

    async fn get_session(&self, id: Uuid) -> SupportResult<Option<Session>>;

    /// WAITING sessions routed to any of `targets`, urgency descending then oldest first
    async fn list_waiting(&self, targets: &[RoutingTarget]) -> SupportResult<Vec<Session>>;

    /// Sessions where the user is requester or supporter, most recent activity first
    async fn list_for_participant(&self, user_id: Uuid) -> SupportResult<Vec<Session>>;

    /// WAITING sessions created before `waiting_before`, and ACTIVE sessions idle since `active_idle_before`
    async fn list_stale(
        &self,
        waiting_before: OffsetDateTime,
        active_idle_before: OffsetDateTime,
    ) -> SupportResult<Vec<Session>>;

    /// Compare-and-swap WAITING/unclaimed -> ACTIVE with `supporter_id`
    async fn claim(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        claimed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>>;

    /// ACTIVE -> RESOLVED, only for the assigned supporter
    async fn resolve(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        notes: Option<String>,
        resolved_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>>;

    /// WAITING/ACTIVE -> CLOSED
    async fn close(
        &self,
        id: Uuid,
        reason: Option<String>,
        closed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>>;

    async fn set_archived(
        &self,
        id: Uuid,
        side: ParticipantSide,
        archived: bool,
    ) -> SupportResult<Option<Session>>;

    /// Persist a message and refresh the session preview in one unit.
    /// Returns `None` if the session is missing or terminal.
    async fn insert_message(&self, new: NewMessage) -> SupportResult<Option<Message>>;

    async fn get_message(&self, id: Uuid) -> SupportResult<Option<Message>>;

    /// All messages of a session in creation order, tombstones included
    async fn list_messages(&self, session_id: Uuid) -> SupportResult<Vec<Message>>;

    /// SENT -> DELIVERED; never downgrades READ
    async fn mark_delivered(&self, message_id: Uuid) -> SupportResult<bool>;

    /// Mark messages from the other participant as READ. `None` marks all of them.
    async fn mark_read(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        message_ids: Option<&[Uuid]>,
        read_at: OffsetDateTime,
    ) -> SupportResult<u64>;

    /// Returns `None` if the sender, window, tombstone or session-state guard fails
    async fn edit_message(&self, edit: EditMessage) -> SupportResult<Option<Message>>;

    /// Tombstone a message. Same guards as `edit_message`.
    async fn delete_message(&self, delete: DeleteMessage) -> SupportResult<Option<Message>>;
}

/// Postgres stores microseconds; keep in-memory times at the same precision
pub(crate) fn truncate_to_micros(t: OffsetDateTime) -> OffsetDateTime {
    let micros = t.microsecond();
    t.replace_microsecond(micros).unwrap_or(t)
}

/// Creation time for a new message: the proposed time, bumped past the
/// session's latest message when clocks tie or step backwards
pub(crate) fn next_message_time(
    proposed: OffsetDateTime,
    last_message_at: Option<OffsetDateTime>,
) -> OffsetDateTime {
    let proposed = truncate_to_micros(proposed);
    match last_message_at {
        Some(last) if proposed <= last => last + Duration::microseconds(1),
        _ => proposed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_next_message_time_is_strictly_increasing() {
        let last = datetime!(2026-01-01 12:00:00 UTC);
        assert_eq!(
            next_message_time(last, Some(last)),
            last + Duration::microseconds(1)
        );
        assert_eq!(
            next_message_time(last - Duration::seconds(5), Some(last)),
            last + Duration::microseconds(1)
        );
        let later = last + Duration::seconds(1);
        assert_eq!(next_message_time(later, Some(last)), later);
        assert_eq!(next_message_time(later, None), later);
    }

    #[test]
    fn test_truncate_drops_nanoseconds() {
        let t = datetime!(2026-01-01 12:00:00.123456789 UTC);
        assert_eq!(truncate_to_micros(t), datetime!(2026-01-01 12:00:00.123456 UTC));
    }
}
