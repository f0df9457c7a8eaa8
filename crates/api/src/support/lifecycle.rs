//! Session state machine
//!
//! ```text
//! WAITING --claim--> ACTIVE --resolve--> RESOLVED
//!    |                  |
//!    +------close-------+-----> CLOSED
//! ```
//!
//! RESOLVED and CLOSED are terminal. Guards here are pure; the store repeats
//! the state guard inside its conditional update so a concurrent transition
//! cannot slip between check and write.

use harbor_shared::{ConflictKind, Role, Session, SessionState, SupportError, SupportResult};

use super::access::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Resolve,
    Close,
}

/// Target state of `transition` from `current`, or the conflict that forbids it
pub fn next_state(current: SessionState, transition: Transition) -> Result<SessionState, ConflictKind> {
    use SessionState::*;

    match (current, transition) {
        (Resolved | Closed, _) => Err(ConflictKind::AlreadyTerminal),
        (Waiting, Transition::Claim) => Ok(Active),
        (Active, Transition::Claim) => Err(ConflictKind::AlreadyClaimed),
        (Active, Transition::Resolve) => Ok(Resolved),
        (Waiting, Transition::Resolve) => Err(ConflictKind::NotActive),
        (Waiting | Active, Transition::Close) => Ok(Closed),
    }
}

/// States from which `transition` is legal; used as the store's update guard
pub fn source_states(transition: Transition) -> &'static [SessionState] {
    match transition {
        Transition::Claim => &[SessionState::Waiting],
        Transition::Resolve => &[SessionState::Active],
        Transition::Close => &[SessionState::Waiting, SessionState::Active],
    }
}

/// Messages may be written while the session is WAITING or ACTIVE
pub fn ensure_accepts_messages(session: &Session) -> SupportResult<()> {
    if session.state.is_terminal() {
        return Err(SupportError::Conflict(ConflictKind::AlreadyTerminal));
    }
    Ok(())
}

/// Claim guard: session must be unclaimed WAITING and routed to a class the role may serve
pub fn authorize_claim(session: &Session, role: Role) -> SupportResult<()> {
    if !role.is_supporter() {
        return Err(SupportError::AccessDenied(
            "Only counselors and peer supporters can claim sessions".to_string(),
        ));
    }
    if !role.can_claim(session.routing_target) {
        return Err(SupportError::AccessDenied(format!(
            "A {} cannot claim a session routed to {}",
            role, session.routing_target
        )));
    }
    if session.supporter_id.is_some() {
        return Err(SupportError::Conflict(match session.state {
            SessionState::Active => ConflictKind::AlreadyClaimed,
            _ => ConflictKind::AlreadyTerminal,
        }));
    }
    next_state(session.state, Transition::Claim)
        .map(|_| ())
        .map_err(SupportError::Conflict)
}

/// Resolve guard: only the assigned supporter, only while ACTIVE
pub fn authorize_resolve(session: &Session, actor: &Actor) -> SupportResult<()> {
    next_state(session.state, Transition::Resolve).map_err(SupportError::Conflict)?;
    if session.supporter_id != Some(actor.user_id) {
        return Err(SupportError::AccessDenied(
            "Only the assigned supporter can resolve this session".to_string(),
        ));
    }
    Ok(())
}

/// Close guard: staff may close any open session; a requester may withdraw
/// their own session while it is still WAITING. Supporters resolve instead.
pub fn authorize_close(session: &Session, actor: &Actor) -> SupportResult<()> {
    next_state(session.state, Transition::Close).map_err(SupportError::Conflict)?;

    if actor.role.is_staff() {
        return Ok(());
    }
    if actor.role == Role::Requester && session.requester_id == actor.user_id {
        return match session.state {
            SessionState::Waiting => Ok(()),
            _ => Err(SupportError::AccessDenied(
                "A session can only be withdrawn before it is claimed".to_string(),
            )),
        };
    }
    Err(SupportError::AccessDenied(
        "Only moderators and administrators can close sessions".to_string(),
    ))
}

/// Supporter presence matches state: none while WAITING, always once ACTIVE or
/// RESOLVED. A CLOSED session keeps whatever it had when closed.
pub fn supporter_invariant_holds(session: &Session) -> bool {
    match session.state {
        SessionState::Waiting => session.supporter_id.is_none(),
        SessionState::Active | SessionState::Resolved => session.supporter_id.is_some(),
        SessionState::Closed => session.claimed_at.is_some() == session.supporter_id.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_shared::{AgeBracket, RoutingTarget, Topic, Urgency};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn waiting(target: RoutingTarget) -> Session {
        Session {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            supporter_id: None,
            topic: Topic::Sleep,
            urgency: Urgency::Low,
            routing_target: target,
            state: SessionState::Waiting,
            minor_safe: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
            claimed_at: None,
            closed_at: None,
            close_reason: None,
            resolution_notes: None,
            last_message_preview: None,
            last_message_at: None,
            requester_archived: false,
            supporter_archived: false,
        }
    }

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
            age_bracket: AgeBracket::Adult,
            has_consent: true,
        }
    }

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert_eq!(next_state(Waiting, Transition::Claim), Ok(Active));
        assert_eq!(next_state(Active, Transition::Claim), Err(ConflictKind::AlreadyClaimed));
        assert_eq!(next_state(Active, Transition::Resolve), Ok(Resolved));
        assert_eq!(next_state(Waiting, Transition::Resolve), Err(ConflictKind::NotActive));
        assert_eq!(next_state(Waiting, Transition::Close), Ok(Closed));
        assert_eq!(next_state(Active, Transition::Close), Ok(Closed));
        for t in [Transition::Claim, Transition::Resolve, Transition::Close] {
            assert_eq!(next_state(Resolved, t), Err(ConflictKind::AlreadyTerminal));
            assert_eq!(next_state(Closed, t), Err(ConflictKind::AlreadyTerminal));
        }
    }

    #[test]
    fn test_source_states_agree_with_table() {
        use SessionState::*;
        for t in [Transition::Claim, Transition::Resolve, Transition::Close] {
            for s in [Waiting, Active, Resolved, Closed] {
                assert_eq!(source_states(t).contains(&s), next_state(s, t).is_ok());
            }
        }
    }

    #[test]
    fn test_peer_cannot_claim_counselor_session() {
        let session = waiting(RoutingTarget::Counselor);
        let result = authorize_claim(&session, Role::PeerSupporter);
        assert!(matches!(result, Err(SupportError::AccessDenied(_))));
        assert!(authorize_claim(&session, Role::Counselor).is_ok());
    }

    #[test]
    fn test_claim_of_active_session_conflicts() {
        let mut session = waiting(RoutingTarget::PeerSupporter);
        session.state = SessionState::Active;
        session.supporter_id = Some(Uuid::new_v4());
        assert!(matches!(
            authorize_claim(&session, Role::PeerSupporter),
            Err(SupportError::Conflict(ConflictKind::AlreadyClaimed))
        ));
    }

    #[test]
    fn test_resolve_requires_assigned_supporter() {
        let supporter = actor(Role::Counselor);
        let mut session = waiting(RoutingTarget::Counselor);
        session.state = SessionState::Active;
        session.supporter_id = Some(supporter.user_id);

        assert!(authorize_resolve(&session, &supporter).is_ok());
        assert!(matches!(
            authorize_resolve(&session, &actor(Role::Counselor)),
            Err(SupportError::AccessDenied(_))
        ));

        session.state = SessionState::Resolved;
        assert!(matches!(
            authorize_resolve(&session, &supporter),
            Err(SupportError::Conflict(ConflictKind::AlreadyTerminal))
        ));
    }

    #[test]
    fn test_close_permissions() {
        let mut session = waiting(RoutingTarget::PeerSupporter);
        let mut requester = actor(Role::Requester);
        requester.user_id = session.requester_id;

        assert!(authorize_close(&session, &actor(Role::Moderator)).is_ok());
        assert!(authorize_close(&session, &requester).is_ok());
        assert!(authorize_close(&session, &actor(Role::PeerSupporter)).is_err());

        session.state = SessionState::Active;
        session.supporter_id = Some(Uuid::new_v4());
        assert!(matches!(
            authorize_close(&session, &requester),
            Err(SupportError::AccessDenied(_))
        ));
        assert!(authorize_close(&session, &actor(Role::Admin)).is_ok());
    }

    #[test]
    fn test_messages_rejected_once_terminal() {
        let mut session = waiting(RoutingTarget::PeerSupporter);
        assert!(ensure_accepts_messages(&session).is_ok());
        session.state = SessionState::Closed;
        assert!(matches!(
            ensure_accepts_messages(&session),
            Err(SupportError::Conflict(ConflictKind::AlreadyTerminal))
        ));
    }

    #[test]
    fn test_supporter_invariant() {
        let mut session = waiting(RoutingTarget::PeerSupporter);
        assert!(supporter_invariant_holds(&session));
        session.supporter_id = Some(Uuid::new_v4());
        assert!(!supporter_invariant_holds(&session));
        session.state = SessionState::Active;
        session.claimed_at = Some(OffsetDateTime::UNIX_EPOCH);
        assert!(supporter_invariant_holds(&session));
    }
}
