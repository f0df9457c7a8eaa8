//! Support session subsystem
//!
//! - **routing**: urgency/topic to counselor or peer
//! - **access**: minor/consent gate on reads and writes
//! - **lifecycle**: WAITING/ACTIVE/RESOLVED/CLOSED transitions
//! - **store**: durable sessions and messages (Postgres or in-memory)
//! - **moderation**: advisory content filter collaborator
//! - **service**: orchestration of all of the above plus realtime fan-out

pub mod access;
pub mod clock;
pub mod lifecycle;
pub mod moderation;
pub mod routing;
pub mod service;
pub mod store;

pub use access::{AccessDecision, Actor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use moderation::{ContentFilter, HttpContentFilter, NoopFilter};
pub use service::{CreateSessionRequest, SessionDetail, SessionPolicy, SessionService};
pub use store::{MemorySessionStore, PgSessionStore, SessionStore};
