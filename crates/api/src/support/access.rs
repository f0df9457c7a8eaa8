//! Access evaluator
//!
//! Pure decision over identity claims and the session's minor-safe flag. The
//! service consults it on every read and write; decisions are never cached
//! because consent can change between requests.

use harbor_shared::{AgeBracket, Role, SupportError, SupportResult};
use uuid::Uuid;

/// Verified identity of the caller, taken from the signed token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub age_bracket: AgeBracket,
    pub has_consent: bool,
}

impl Actor {
    pub fn is_minor(&self) -> bool {
        self.age_bracket == AgeBracket::Minor
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// May view but not write
    ReadOnly { reason: String },
    Deny { reason: String },
}

impl AccessDecision {
    pub fn can_read(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }

    pub fn require_read(&self) -> SupportResult<()> {
        match self {
            Self::Deny { reason } => Err(SupportError::AccessDenied(reason.clone())),
            Self::Allow | Self::ReadOnly { .. } => Ok(()),
        }
    }

    pub fn require_write(&self) -> SupportResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::ReadOnly { reason } | Self::Deny { reason } => {
                Err(SupportError::AccessDenied(reason.clone()))
            }
        }
    }
}

/// Decide what `actor` may do in a room flagged `minor_safe`.
pub fn evaluate(actor: &Actor, minor_safe: bool) -> AccessDecision {
    if actor.role != Role::Requester {
        return AccessDecision::Allow;
    }

    if actor.is_minor() && !minor_safe {
        return AccessDecision::Deny {
            reason: "This conversation is not available to users under 18".to_string(),
        };
    }

    if actor.is_minor() && !actor.has_consent {
        return AccessDecision::ReadOnly {
            reason: "Parental or guardian consent is required before sending messages".to_string(),
        };
    }

    AccessDecision::Allow
}
