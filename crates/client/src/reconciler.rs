//! Client reconciler
//!
//! Keeps one ordered, de-duplicated view of a session's messages while they
//! arrive by two paths: the synchronous send response and realtime events.
//! Messages are keyed by id; a message is rendered at most once no matter
//! how many times it is observed. Order is always by persisted creation time,
//! never by arrival.

use std::collections::{HashMap, HashSet};

use harbor_shared::{DeliveryStatus, Message, ServerEvent};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::api::{SessionApi, SessionHistory};
use crate::error::{ClientError, ClientResult};

/// One rendered row
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Optimistic placeholder for a send still in flight
    Sending {
        local_id: Uuid,
        sender_id: Uuid,
        body: String,
        created_at: OffsetDateTime,
    },
    Message(Message),
}

impl Entry {
    pub fn created_at(&self) -> OffsetDateTime {
        match self {
            Entry::Sending { created_at, .. } => *created_at,
            Entry::Message(message) => message.created_at,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(self, Entry::Sending { .. })
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Entry::Message(message) => Some(message),
            Entry::Sending { .. } => None,
        }
    }

    fn is_local(&self, id: Uuid) -> bool {
        matches!(self, Entry::Sending { local_id, .. } if *local_id == id)
    }

    fn is_message(&self, id: Uuid) -> bool {
        matches!(self, Entry::Message(message) if message.id == id)
    }
}

/// Handle for a send started with [`Reconciler::begin_send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub local_id: Uuid,
    pub body: String,
}

pub struct Reconciler {
    session_id: Uuid,
    viewer_id: Uuid,
    entries: Vec<Entry>,
    seen: HashSet<Uuid>,
}

impl Reconciler {
    pub fn new(session_id: Uuid, viewer_id: Uuid) -> Self {
        Self {
            session_id,
            viewer_id,
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Rendered rows in creation-time order
    pub fn messages(&self) -> &[Entry] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_sending()).count()
    }

    pub fn has_seen(&self, message_id: Uuid) -> bool {
        self.seen.contains(&message_id)
    }

    /// Merge an authoritative history read.
    ///
    /// Fetched records replace local copies, messages observed live but not
    /// yet in the snapshot are kept, and in-flight placeholders survive.
    pub fn load(&mut self, history: SessionHistory) {
        if history.session.id != self.session_id {
            tracing::warn!(
                expected = %self.session_id,
                received = %history.session.id,
                "Ignoring history for another session"
            );
            return;
        }

        let mut by_id: HashMap<Uuid, Message> = HashMap::new();
        let mut pending = Vec::new();
        for entry in self.entries.drain(..) {
            match entry {
                Entry::Message(message) => {
                    by_id.insert(message.id, message);
                }
                sending @ Entry::Sending { .. } => pending.push(sending),
            }
        }
        for message in history.messages {
            self.seen.insert(message.id);
            by_id.insert(message.id, message);
        }

        self.entries = by_id.into_values().map(Entry::Message).collect();
        self.entries.extend(pending);
        self.entries.sort_by_key(Entry::created_at);
    }

    /// Re-fetch history and merge it
    pub async fn reconcile(&mut self, api: &dyn SessionApi) -> ClientResult<()> {
        let history = api.fetch_history(self.session_id).await?;
        self.load(history);
        Ok(())
    }

    /// Insert a "sending" placeholder and return its handle
    pub fn begin_send(&mut self, body: impl Into<String>, now: OffsetDateTime) -> PendingSend {
        let pending = PendingSend {
            local_id: Uuid::new_v4(),
            body: body.into(),
        };
        self.insert_sorted(Entry::Sending {
            local_id: pending.local_id,
            sender_id: self.viewer_id,
            body: pending.body.clone(),
            created_at: now,
        });
        pending
    }

    /// Settle a send.
    ///
    /// On success the placeholder is replaced by the canonical record (or
    /// simply dropped if that record is already present). On failure the
    /// placeholder is removed and the error is returned to the caller.
    pub fn complete_send(
        &mut self,
        pending: &PendingSend,
        result: ClientResult<Message>,
    ) -> ClientResult<Message> {
        let Some(index) = self.entries.iter().position(|e| e.is_local(pending.local_id)) else {
            return Err(ClientError::UnknownPending(pending.local_id));
        };
        self.entries.remove(index);

        let message = result?;
        if self.seen.insert(message.id) {
            self.insert_sorted(Entry::Message(message.clone()));
        } else {
            self.replace(message.clone());
        }
        Ok(message)
    }

    /// Optimistic send: placeholder, persist, settle
    pub async fn send(&mut self, api: &dyn SessionApi, body: &str) -> ClientResult<Message> {
        let pending = self.begin_send(body, OffsetDateTime::now_utc());
        let result = api.send_message(self.session_id, body).await;
        if let Err(e) = &result {
            tracing::warn!(session_id = %self.session_id, error = %e, "Message send failed");
        }
        self.complete_send(&pending, result)
    }

    /// Apply a realtime event. Returns true if the view changed.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::NewMessage {
                session_id,
                message,
            } if *session_id == self.session_id => {
                // The sender already holds the canonical copy from its own request
                if message.sender_id == self.viewer_id {
                    return false;
                }
                if !self.seen.insert(message.id) {
                    return false;
                }
                self.insert_sorted(Entry::Message(message.clone()));
                true
            }

            ServerEvent::MessageUpdated {
                session_id,
                message,
            } if *session_id == self.session_id => {
                if self.seen.insert(message.id) {
                    self.insert_sorted(Entry::Message(message.clone()));
                    true
                } else {
                    self.replace(message.clone())
                }
            }

            ServerEvent::MessagesRead {
                session_id,
                reader_id,
                message_ids,
                ..
            } if *session_id == self.session_id && *reader_id != self.viewer_id => {
                let mut changed = false;
                for entry in &mut self.entries {
                    let Entry::Message(message) = entry else {
                        continue;
                    };
                    let targeted = message_ids
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&message.id));
                    if message.sender_id == self.viewer_id
                        && targeted
                        && message.status != DeliveryStatus::Read
                    {
                        message.status = DeliveryStatus::Read;
                        changed = true;
                    }
                }
                changed
            }

            _ => false,
        }
    }

    fn insert_sorted(&mut self, entry: Entry) {
        let at = entry.created_at();
        let index = self.entries.partition_point(|e| e.created_at() <= at);
        self.entries.insert(index, entry);
    }

    fn replace(&mut self, message: Message) -> bool {
        match self.entries.iter_mut().find(|e| e.is_message(message.id)) {
            Some(entry) => {
                let changed = entry.as_message() != Some(&message);
                *entry = Entry::Message(message);
                changed
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harbor_shared::{ContentType, RoutingTarget, Session, SessionState, Topic, Urgency};
    use std::sync::Mutex;
    use time::macros::datetime;
    use time::Duration;

    const T0: OffsetDateTime = datetime!(2026-05-04 10:00 UTC);

    fn session(id: Uuid, requester: Uuid, supporter: Uuid) -> Session {
        Session {
            id,
            requester_id: requester,
            supporter_id: Some(supporter),
            topic: Topic::Stress,
            urgency: Urgency::Medium,
            routing_target: RoutingTarget::PeerSupporter,
            state: SessionState::Active,
            minor_safe: true,
            created_at: T0,
            claimed_at: Some(T0),
            closed_at: None,
            close_reason: None,
            resolution_notes: None,
            last_message_preview: None,
            last_message_at: None,
            requester_archived: false,
            supporter_archived: false,
        }
    }

    fn message(session_id: Uuid, sender_id: Uuid, body: &str, at: OffsetDateTime) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id,
            sender_id,
            body: body.to_string(),
            content_type: ContentType::Text,
            status: DeliveryStatus::Sent,
            created_at: at,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            flagged: false,
            flag_reasons: Vec::new(),
        }
    }

    fn bodies(reconciler: &Reconciler) -> Vec<String> {
        reconciler
            .messages()
            .iter()
            .map(|e| match e {
                Entry::Sending { body, .. } => format!("sending:{}", body),
                Entry::Message(m) => m.body.clone(),
            })
            .collect()
    }

    /// Scripted API: returns the queued history and persists sends at fixed times
    struct FakeApi {
        history: Mutex<SessionHistory>,
        sender_id: Uuid,
        fail_sends: bool,
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn fetch_history(&self, _session_id: Uuid) -> ClientResult<SessionHistory> {
            Ok(self.history.lock().unwrap().clone())
        }

        async fn send_message(&self, session_id: Uuid, body: &str) -> ClientResult<Message> {
            if self.fail_sends {
                return Err(ClientError::Api {
                    status: 503,
                    code: "STORAGE_UNAVAILABLE".to_string(),
                    message: "down".to_string(),
                    retryable: true,
                });
            }
            let mut history = self.history.lock().unwrap();
            let at = T0 + Duration::minutes(history.messages.len() as i64 + 1);
            let persisted = message(session_id, self.sender_id, body, at);
            history.messages.push(persisted.clone());
            Ok(persisted)
        }
    }

    struct Fixture {
        session_id: Uuid,
        requester: Uuid,
        supporter: Uuid,
    }

    fn fixture() -> Fixture {
        Fixture {
            session_id: Uuid::new_v4(),
            requester: Uuid::new_v4(),
            supporter: Uuid::new_v4(),
        }
    }

    impl Fixture {
        fn api(&self, messages: Vec<Message>, fail_sends: bool) -> FakeApi {
            FakeApi {
                history: Mutex::new(SessionHistory {
                    session: session(self.session_id, self.requester, self.supporter),
                    messages,
                }),
                sender_id: self.requester,
                fail_sends,
            }
        }
    }

    #[tokio::test]
    async fn test_own_echo_is_never_rendered_twice() {
        let f = fixture();
        let api = f.api(Vec::new(), false);
        let mut reconciler = Reconciler::new(f.session_id, f.requester);

        let sent = reconciler.send(&api, "hello").await.unwrap();
        assert_eq!(bodies(&reconciler), vec!["hello"]);

        let echoed = reconciler.apply_event(&ServerEvent::NewMessage {
            session_id: f.session_id,
            message: sent.clone(),
        });
        assert!(!echoed);

        reconciler.reconcile(&api).await.unwrap();
        assert_eq!(bodies(&reconciler), vec!["hello"]);
        assert_eq!(reconciler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_removes_placeholder() {
        let f = fixture();
        let api = f.api(Vec::new(), true);
        let mut reconciler = Reconciler::new(f.session_id, f.requester);

        let err = reconciler.send(&api, "hello").await.unwrap_err();
        assert!(err.is_transient());
        assert!(reconciler.messages().is_empty());
    }

    #[test]
    fn test_placeholder_replaced_in_place() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);

        let pending = reconciler.begin_send("on my way", T0);
        assert_eq!(bodies(&reconciler), vec!["sending:on my way"]);

        let canonical = message(f.session_id, f.requester, "on my way", T0 + Duration::seconds(1));
        reconciler
            .complete_send(&pending, Ok(canonical.clone()))
            .unwrap();

        assert_eq!(reconciler.messages(), &[Entry::Message(canonical.clone())]);
        assert!(reconciler.has_seen(canonical.id));
    }

    #[test]
    fn test_reconcile_during_send_keeps_single_copy() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let pending = reconciler.begin_send("hi", T0);

        // A history read lands before the send response and already has the message
        let canonical = message(f.session_id, f.requester, "hi", T0 + Duration::seconds(1));
        reconciler.load(SessionHistory {
            session: session(f.session_id, f.requester, f.supporter),
            messages: vec![canonical.clone()],
        });
        assert_eq!(reconciler.pending_count(), 1);

        reconciler.complete_send(&pending, Ok(canonical)).unwrap();
        assert_eq!(bodies(&reconciler), vec!["hi"]);
    }

    #[test]
    fn test_broadcast_from_other_participant_deduplicated() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let reply = message(f.session_id, f.supporter, "I'm here", T0);
        let event = ServerEvent::NewMessage {
            session_id: f.session_id,
            message: reply.clone(),
        };

        assert!(reconciler.apply_event(&event));
        assert!(!reconciler.apply_event(&event));

        reconciler.load(SessionHistory {
            session: session(f.session_id, f.requester, f.supporter),
            messages: vec![reply],
        });
        assert_eq!(bodies(&reconciler), vec!["I'm here"]);
    }

    #[test]
    fn test_sorted_by_creation_time_not_arrival() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let later = message(f.session_id, f.supporter, "second", T0 + Duration::seconds(5));
        let earlier = message(f.session_id, f.supporter, "first", T0 + Duration::seconds(1));

        for m in [later, earlier] {
            reconciler.apply_event(&ServerEvent::NewMessage {
                session_id: f.session_id,
                message: m,
            });
        }

        assert_eq!(bodies(&reconciler), vec!["first", "second"]);
    }

    #[test]
    fn test_events_for_other_sessions_ignored() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let other_session = Uuid::new_v4();

        let changed = reconciler.apply_event(&ServerEvent::NewMessage {
            session_id: other_session,
            message: message(other_session, f.supporter, "wrong room", T0),
        });

        assert!(!changed);
        assert!(reconciler.messages().is_empty());
    }

    #[test]
    fn test_update_and_read_receipt_apply_in_place() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let mine = message(f.session_id, f.requester, "can we talk", T0);
        let theirs = message(f.session_id, f.supporter, "of course", T0 + Duration::seconds(2));
        reconciler.load(SessionHistory {
            session: session(f.session_id, f.requester, f.supporter),
            messages: vec![mine.clone(), theirs.clone()],
        });

        let mut edited = theirs.clone();
        edited.body = "of course, go ahead".to_string();
        edited.is_edited = true;
        assert!(reconciler.apply_event(&ServerEvent::MessageUpdated {
            session_id: f.session_id,
            message: edited,
        }));
        assert_eq!(bodies(&reconciler), vec!["can we talk", "of course, go ahead"]);

        assert!(reconciler.apply_event(&ServerEvent::MessagesRead {
            session_id: f.session_id,
            reader_id: f.supporter,
            message_ids: None,
            read_at: T0 + Duration::seconds(3),
        }));
        let statuses: Vec<DeliveryStatus> = reconciler
            .messages()
            .iter()
            .filter_map(Entry::as_message)
            .map(|m| m.status)
            .collect();
        assert_eq!(statuses, vec![DeliveryStatus::Read, DeliveryStatus::Sent]);

        // The viewer's own receipts do not change anything
        assert!(!reconciler.apply_event(&ServerEvent::MessagesRead {
            session_id: f.session_id,
            reader_id: f.requester,
            message_ids: None,
            read_at: T0 + Duration::seconds(4),
        }));
    }

    #[test]
    fn test_unknown_pending_is_an_error() {
        let f = fixture();
        let mut reconciler = Reconciler::new(f.session_id, f.requester);
        let stray = PendingSend {
            local_id: Uuid::new_v4(),
            body: "x".to_string(),
        };

        let result = reconciler.complete_send(
            &stray,
            Ok(message(f.session_id, f.requester, "x", T0)),
        );
        assert!(matches!(result, Err(ClientError::UnknownPending(_))));
        assert!(reconciler.messages().is_empty());
    }
}
