//! Stale Session Sweeper
//!
//! Closes WAITING sessions nobody claimed in time and ACTIVE sessions that
//! went quiet. Uses the store's guarded close, so a session that was claimed
//! or resolved between the scan and the write is left alone. No realtime
//! events are published from this process; clients see the closure on their
//! next fetch.

use std::sync::Arc;

use harbor_api::support::{Clock, SessionStore};
use harbor_shared::{SessionState, SupportResult};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

pub const WAITING_CLOSE_REASON: &str = "No supporter became available in time";
pub const IDLE_CLOSE_REASON: &str = "Closed after a period of inactivity";

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub closed_waiting: usize,
    pub closed_idle: usize,
    /// Sessions whose guarded close lost to a concurrent transition
    pub skipped: usize,
}

pub struct StaleSessionSweeper {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    waiting_max_age: Duration,
    active_max_idle: Duration,
}

impl StaleSessionSweeper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        waiting_max_age: Duration,
        active_max_idle: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            waiting_max_age,
            active_max_idle,
        }
    }

    /// Close every session past its threshold
    pub async fn sweep(&self) -> SupportResult<SweepReport> {
        let now = self.clock.now();
        let stale = self
            .store
            .list_stale(
                cutoff(now, self.waiting_max_age),
                cutoff(now, self.active_max_idle),
            )
            .await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for session in stale {
            let reason = match session.state {
                SessionState::Waiting => WAITING_CLOSE_REASON,
                SessionState::Active => IDLE_CLOSE_REASON,
                SessionState::Resolved | SessionState::Closed => continue,
            };

            match self
                .store
                .close(session.id, Some(reason.to_string()), now)
                .await
            {
                Ok(Some(_)) => {
                    info!(
                        session_id = %session.id,
                        previous_state = %session.state,
                        "Closed stale session"
                    );
                    if session.state == SessionState::Waiting {
                        report.closed_waiting += 1;
                    } else {
                        report.closed_idle += 1;
                    }
                }
                Ok(None) => {
                    warn!(session_id = %session.id, "Stale session changed state before close, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "Failed to close stale session");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}

/// `now - age`, saturating at the epoch when the threshold reaches past it
fn cutoff(now: OffsetDateTime, age: Duration) -> OffsetDateTime {
    now.checked_sub(age).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_api::support::store::{NewMessage, NewSession};
    use harbor_api::support::{ManualClock, MemorySessionStore};
    use harbor_shared::{ContentType, RoutingTarget, Topic, Urgency};
    use time::macros::datetime;
    use uuid::Uuid;

    const T0: OffsetDateTime = datetime!(2026-05-04 10:00 UTC);

    struct Harness {
        store: Arc<MemorySessionStore>,
        clock: Arc<ManualClock>,
        sweeper: StaleSessionSweeper,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemorySessionStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let sweeper = StaleSessionSweeper::new(
            store.clone(),
            clock.clone(),
            Duration::hours(24),
            Duration::days(14),
        );
        Harness {
            store,
            clock,
            sweeper,
        }
    }

    async fn waiting_session(store: &MemorySessionStore, created_at: OffsetDateTime) -> Uuid {
        store
            .insert_session(NewSession {
                id: Uuid::new_v4(),
                requester_id: Uuid::new_v4(),
                topic: Topic::Loneliness,
                urgency: Urgency::Low,
                routing_target: RoutingTarget::PeerSupporter,
                minor_safe: true,
                created_at,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_closes_unclaimed_session_after_threshold() {
        let h = harness();
        let old = waiting_session(&h.store, T0).await;
        h.clock.advance(Duration::hours(23));
        let fresh = waiting_session(&h.store, h.clock.now()).await;

        h.clock.advance(Duration::hours(2));
        let report = h.sweeper.sweep().await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.closed_waiting, 1);

        let closed = h.store.get_session(old).await.unwrap().unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some(WAITING_CLOSE_REASON));
        assert!(closed.supporter_id.is_none());

        let still_waiting = h.store.get_session(fresh).await.unwrap().unwrap();
        assert_eq!(still_waiting.state, SessionState::Waiting);
    }

    #[tokio::test]
    async fn test_recent_message_keeps_active_session_open() {
        let h = harness();
        let session_id = waiting_session(&h.store, T0).await;
        let supporter = Uuid::new_v4();
        h.store.claim(session_id, supporter, T0).await.unwrap().unwrap();

        h.clock.advance(Duration::days(10));
        h.store
            .insert_message(NewMessage {
                id: Uuid::new_v4(),
                session_id,
                sender_id: supporter,
                body: "Checking in".to_string(),
                content_type: ContentType::Text,
                created_at: h.clock.now(),
                flagged: false,
                flag_reasons: Vec::new(),
            })
            .await
            .unwrap()
            .unwrap();

        h.clock.advance(Duration::days(10));
        let report = h.sweeper.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());

        h.clock.advance(Duration::days(5));
        let report = h.sweeper.sweep().await.unwrap();
        assert_eq!(report.closed_idle, 1);

        let closed = h.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some(IDLE_CLOSE_REASON));
        assert_eq!(closed.supporter_id, Some(supporter));
    }

    #[tokio::test]
    async fn test_terminal_sessions_are_ignored() {
        let h = harness();
        let session_id = waiting_session(&h.store, T0).await;
        let supporter = Uuid::new_v4();
        h.store.claim(session_id, supporter, T0).await.unwrap().unwrap();
        h.store
            .resolve(session_id, supporter, None, T0 + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();

        h.clock.advance(Duration::days(30));
        let report = h.sweeper.sweep().await.unwrap();
        assert_eq!(report.scanned, 0);

        let resolved = h.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(resolved.state, SessionState::Resolved);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let h = harness();
        waiting_session(&h.store, T0).await;
        h.clock.advance(Duration::days(2));

        assert_eq!(h.sweeper.sweep().await.unwrap().closed_waiting, 1);
        assert_eq!(h.sweeper.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_oversized_threshold_closes_nothing() {
        let store = Arc::new(MemorySessionStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let sweeper =
            StaleSessionSweeper::new(store.clone(), clock.clone(), Duration::MAX, Duration::MAX);
        waiting_session(&store, T0).await;
        clock.advance(Duration::days(365));

        assert_eq!(sweeper.sweep().await.unwrap(), SweepReport::default());
        assert_eq!(cutoff(T0, Duration::MAX), OffsetDateTime::UNIX_EPOCH);
    }
}
