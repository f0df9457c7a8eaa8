//! Common types used across Harbor

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Body shown in place of a soft-deleted message
pub const DELETED_MESSAGE_BODY: &str = "This message was deleted";

/// Maximum characters kept in a session's last-message preview
pub const PREVIEW_MAX_CHARS: usize = 120;

// =============================================================================
// Intake Enums
// =============================================================================

/// Urgency reported at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Crisis,
}

impl Urgency {
    /// Queue ordering rank (higher is served first)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Crisis => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Crisis => "crisis",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "crisis" => Ok(Self::Crisis),
            _ => Err(format!("Invalid urgency: {}", s)),
        }
    }
}

/// Topic category chosen at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Anxiety,
    Depression,
    Stress,
    Loneliness,
    Relationships,
    Family,
    Health,
    Grief,
    Academic,
    Work,
    Sleep,
    Identity,
    Other,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anxiety => "anxiety",
            Self::Depression => "depression",
            Self::Stress => "stress",
            Self::Loneliness => "loneliness",
            Self::Relationships => "relationships",
            Self::Family => "family",
            Self::Health => "health",
            Self::Grief => "grief",
            Self::Academic => "academic",
            Self::Work => "work",
            Self::Sleep => "sleep",
            Self::Identity => "identity",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anxiety" => Ok(Self::Anxiety),
            "depression" => Ok(Self::Depression),
            "stress" => Ok(Self::Stress),
            "loneliness" => Ok(Self::Loneliness),
            "relationships" => Ok(Self::Relationships),
            "family" => Ok(Self::Family),
            "health" => Ok(Self::Health),
            "grief" => Ok(Self::Grief),
            "academic" => Ok(Self::Academic),
            "work" => Ok(Self::Work),
            "sleep" => Ok(Self::Sleep),
            "identity" => Ok(Self::Identity),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid topic: {}", s)),
        }
    }
}

/// Class of supporter a session is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoutingTarget {
    Counselor,
    PeerSupporter,
}

impl RoutingTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counselor => "counselor",
            Self::PeerSupporter => "peer_supporter",
        }
    }
}

impl std::fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Identity Enums
// =============================================================================

/// Platform role carried in the identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Requester,
    PeerSupporter,
    Counselor,
    Moderator,
    Admin,
}

impl Role {
    /// Counselors and peer supporters
    pub fn is_supporter(&self) -> bool {
        matches!(self, Self::PeerSupporter | Self::Counselor)
    }

    /// Moderators and admins
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }

    /// Routing targets this role may claim.
    /// Counselors may take peer-routed sessions; peers never take counselor-routed ones.
    pub fn claimable_targets(&self) -> &'static [RoutingTarget] {
        match self {
            Self::Counselor => &[RoutingTarget::Counselor, RoutingTarget::PeerSupporter],
            Self::PeerSupporter => &[RoutingTarget::PeerSupporter],
            Self::Requester | Self::Moderator | Self::Admin => &[],
        }
    }

    pub fn can_claim(&self, target: RoutingTarget) -> bool {
        self.claimable_targets().contains(&target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::PeerSupporter => "peer_supporter",
            Self::Counselor => "counselor",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requester" => Ok(Self::Requester),
            "peer_supporter" => Ok(Self::PeerSupporter),
            "counselor" => Ok(Self::Counselor),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Age bracket carried in the identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeBracket {
    Minor,
    Adult,
}

// =============================================================================
// Lifecycle Enums
// =============================================================================

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Waiting,
    Active,
    Resolved,
    Closed,
}

impl SessionState {
    /// Resolved and closed sessions accept no further messages or claims
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Emoji,
    System,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

// =============================================================================
// Database Models
// =============================================================================

/// One private conversation between a requester and at most one supporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub supporter_id: Option<Uuid>,
    pub topic: Topic,
    pub urgency: Urgency,
    pub routing_target: RoutingTarget,
    pub state: SessionState,
    pub minor_safe: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub close_reason: Option<String>,
    pub resolution_notes: Option<String>,
    pub last_message_preview: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub requester_archived: bool,
    pub supporter_archived: bool,
}

impl Session {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.supporter_id == Some(user_id)
    }

    /// The participant on the other side of the conversation, if any
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.requester_id == user_id {
            self.supporter_id
        } else if self.supporter_id == Some(user_id) {
            Some(self.requester_id)
        } else {
            None
        }
    }

    /// Archive flags are per viewer; non-participants never see a session as archived
    pub fn is_archived_for(&self, user_id: Uuid) -> bool {
        if self.requester_id == user_id {
            self.requester_archived
        } else if self.supporter_id == Some(user_id) {
            self.supporter_archived
        } else {
            false
        }
    }

    /// Time of the most recent activity, used by the stale-session sweep
    pub fn last_activity_at(&self) -> OffsetDateTime {
        self.last_message_at
            .or(self.claimed_at)
            .unwrap_or(self.created_at)
    }
}

/// A persisted chat message. Deleted messages stay in place as tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub content_type: ContentType,
    pub status: DeliveryStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_edited: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    pub flagged: bool,
    #[serde(default)]
    pub flag_reasons: Vec<String>,
}

/// Truncate a message body for list views
pub fn preview_of(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= PREVIEW_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_MAX_CHARS - 1).collect();
    preview.push('…');
    preview
}
