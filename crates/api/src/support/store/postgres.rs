//! PostgreSQL session store
//!
//! Guards are expressed in the `WHERE` clause of a single `UPDATE ... RETURNING`
//! so the database arbitrates concurrent writers; zero affected rows maps to `None`.

use async_trait::async_trait;
use harbor_shared::{
    preview_of, Message, RoutingTarget, Session, SessionState, SupportResult,
    DELETED_MESSAGE_BODY,
};
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    next_message_time, DeleteMessage, EditMessage, NewMessage, NewSession, ParticipantSide,
    SessionStore,
};
use crate::support::lifecycle::{source_states, Transition};

const SESSION_COLUMNS: &str = r#"
    id, requester_id, supporter_id, topic, urgency, routing_target, state, minor_safe,
    created_at, claimed_at, closed_at, close_reason, resolution_notes,
    last_message_preview, last_message_at, requester_archived, supporter_archived
"#;

const MESSAGE_COLUMNS: &str = r#"
    id, session_id, sender_id, body, content_type, status, created_at,
    is_edited, edited_at, is_deleted, deleted_at, flagged, flag_reasons
"#;

const OPEN_STATES: &[&str] = &["waiting", "active"];

fn state_names(transition: Transition) -> Vec<&'static str> {
    source_states(transition).iter().map(SessionState::as_str).collect()
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Refresh the list-view preview if `message` is the newest in its session
async fn refresh_preview(conn: &mut PgConnection, message: &Message) -> SupportResult<()> {
    sqlx::query(
        r#"
        UPDATE support_sessions
        SET last_message_preview = $1
        WHERE id = $2 AND last_message_at = $3
        "#,
    )
    .bind(preview_of(&message.body))
    .bind(message.session_id)
    .bind(message.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn insert_session(&self, new: NewSession) -> SupportResult<Session> {
        let session: Session = sqlx::query_as(&format!(
            r#"
            INSERT INTO support_sessions
                (id, requester_id, topic, urgency, routing_target, state, minor_safe, created_at)
            VALUES ($1, $2, $3, $4, $5, 'waiting', $6, $7)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new.id)
        .bind(new.requester_id)
        .bind(new.topic)
        .bind(new.urgency)
        .bind(new.routing_target)
        .bind(new.minor_safe)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> SupportResult<Option<Session>> {
        let session = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM support_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn list_waiting(&self, targets: &[RoutingTarget]) -> SupportResult<Vec<Session>> {
        let targets: Vec<&str> = targets.iter().map(RoutingTarget::as_str).collect();
        let sessions = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM support_sessions
            WHERE state = 'waiting' AND routing_target = ANY($1)
            ORDER BY
                CASE urgency
                    WHEN 'crisis' THEN 3
                    WHEN 'high' THEN 2
                    WHEN 'medium' THEN 1
                    ELSE 0
                END DESC,
                created_at ASC
            "#
        ))
        .bind(&targets)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn list_for_participant(&self, user_id: Uuid) -> SupportResult<Vec<Session>> {
        let sessions = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM support_sessions
            WHERE requester_id = $1 OR supporter_id = $1
            ORDER BY COALESCE(last_message_at, claimed_at, created_at) DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn list_stale(
        &self,
        waiting_before: OffsetDateTime,
        active_idle_before: OffsetDateTime,
    ) -> SupportResult<Vec<Session>> {
        let sessions = sqlx::query_as(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM support_sessions
            WHERE (state = 'waiting' AND created_at < $1)
               OR (state = 'active'
                   AND COALESCE(last_message_at, claimed_at, created_at) < $2)
            ORDER BY created_at ASC
            "#
        ))
        .bind(waiting_before)
        .bind(active_idle_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn claim(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        claimed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let session = sqlx::query_as(&format!(
            r#"
            UPDATE support_sessions
            SET supporter_id = $2, state = 'active', claimed_at = $3
            WHERE id = $1 AND state = ANY($4) AND supporter_id IS NULL
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(supporter_id)
        .bind(claimed_at)
        .bind(state_names(Transition::Claim))
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn resolve(
        &self,
        id: Uuid,
        supporter_id: Uuid,
        notes: Option<String>,
        resolved_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let session = sqlx::query_as(&format!(
            r#"
            UPDATE support_sessions
            SET state = 'resolved', closed_at = $3, resolution_notes = $4
            WHERE id = $1 AND supporter_id = $2 AND state = ANY($5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(supporter_id)
        .bind(resolved_at)
        .bind(notes)
        .bind(state_names(Transition::Resolve))
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn close(
        &self,
        id: Uuid,
        reason: Option<String>,
        closed_at: OffsetDateTime,
    ) -> SupportResult<Option<Session>> {
        let session = sqlx::query_as(&format!(
            r#"
            UPDATE support_sessions
            SET state = 'closed', closed_at = $2, close_reason = $3
            WHERE id = $1 AND state = ANY($4)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(closed_at)
        .bind(reason)
        .bind(state_names(Transition::Close))
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn set_archived(
        &self,
        id: Uuid,
        side: ParticipantSide,
        archived: bool,
    ) -> SupportResult<Option<Session>> {
        let column = match side {
            ParticipantSide::Requester => "requester_archived",
            ParticipantSide::Supporter => "supporter_archived",
        };
        let session = sqlx::query_as(&format!(
            r#"
            UPDATE support_sessions
            SET {column} = $2
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(archived)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn insert_message(&self, new: NewMessage) -> SupportResult<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes senders within a session and pins the open-state check
        let row: Option<(Option<OffsetDateTime>,)> = sqlx::query_as(
            r#"
            SELECT last_message_at
            FROM support_sessions
            WHERE id = $1 AND state = ANY($2)
            FOR UPDATE
            "#,
        )
        .bind(new.session_id)
        .bind(OPEN_STATES)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((last_message_at,)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let created_at = next_message_time(new.created_at, last_message_at);

        let message: Message = sqlx::query_as(&format!(
            r#"
            INSERT INTO support_messages
                (id, session_id, sender_id, body, content_type, status, created_at,
                 flagged, flag_reasons)
            VALUES ($1, $2, $3, $4, $5, 'sent', $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(new.id)
        .bind(new.session_id)
        .bind(new.sender_id)
        .bind(&new.body)
        .bind(new.content_type)
        .bind(created_at)
        .bind(new.flagged)
        .bind(&new.flag_reasons)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE support_sessions
            SET last_message_preview = $1, last_message_at = $2
            WHERE id = $3
            "#,
        )
        .bind(preview_of(&new.body))
        .bind(created_at)
        .bind(new.session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(message))
    }

    async fn get_message(&self, id: Uuid) -> SupportResult<Option<Message>> {
        let message = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM support_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_messages(&self, session_id: Uuid) -> SupportResult<Vec<Message>> {
        let messages = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM support_messages
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn mark_delivered(&self, message_id: Uuid) -> SupportResult<bool> {
        let result = sqlx::query(
            "UPDATE support_messages SET status = 'delivered' WHERE id = $1 AND status = 'sent'",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        message_ids: Option<&[Uuid]>,
        _read_at: OffsetDateTime,
    ) -> SupportResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE support_messages
            SET status = 'read'
            WHERE session_id = $1
              AND sender_id <> $2
              AND status <> 'read'
              AND ($3::uuid[] IS NULL OR id = ANY($3))
            "#,
        )
        .bind(session_id)
        .bind(reader_id)
        .bind(message_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn edit_message(&self, edit: EditMessage) -> SupportResult<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        let message: Option<Message> = sqlx::query_as(&format!(
            r#"
            UPDATE support_messages m
            SET body = $3, is_edited = TRUE, edited_at = $4, flagged = $5, flag_reasons = $6
            WHERE m.id = $1
              AND m.sender_id = $2
              AND m.is_deleted = FALSE
              AND m.created_at >= $7
              AND EXISTS (
                  SELECT 1 FROM support_sessions s
                  WHERE s.id = m.session_id AND s.state = ANY($8)
              )
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(edit.message_id)
        .bind(edit.sender_id)
        .bind(&edit.body)
        .bind(edit.edited_at)
        .bind(edit.flagged)
        .bind(&edit.flag_reasons)
        .bind(edit.created_after)
        .bind(OPEN_STATES)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(message) = &message {
            refresh_preview(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(message)
    }

    async fn delete_message(&self, delete: DeleteMessage) -> SupportResult<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        let message: Option<Message> = sqlx::query_as(&format!(
            r#"
            UPDATE support_messages m
            SET body = $3, is_deleted = TRUE, deleted_at = $4, flagged = FALSE, flag_reasons = '{{}}'
            WHERE m.id = $1
              AND m.sender_id = $2
              AND m.is_deleted = FALSE
              AND m.created_at >= $5
              AND EXISTS (
                  SELECT 1 FROM support_sessions s
                  WHERE s.id = m.session_id AND s.state = ANY($6)
              )
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(delete.message_id)
        .bind(delete.sender_id)
        .bind(DELETED_MESSAGE_BODY)
        .bind(delete.deleted_at)
        .bind(delete.created_after)
        .bind(OPEN_STATES)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(message) = &message {
            refresh_preview(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(message)
    }
}
