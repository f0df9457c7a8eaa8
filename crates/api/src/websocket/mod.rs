//! Realtime channel over WebSockets
//!
//! Multiplexes socket connections into broadcast groups for live session updates:
//! - Message delivery to the other participant
//! - Presence (online/offline) per session
//! - Typing indicators (relayed, never persisted)
//! - Queue updates for connected supporters
//!
//! # Architecture
//!
//! - **Connection**: an authenticated socket with its session subscriptions
//! - **Room**: session groups and role groups for broadcasting
//! - **State**: the process-wide `RealtimeChannel`
//! - **Handler**: Axum upgrade route and client event dispatch
//!
//! Wire events live in `harbor_shared::events` so clients share the format.

pub mod connection;
pub mod handler;
pub mod room;
pub mod state;

pub use handler::ws_handler;
pub use room::Group;
pub use state::RealtimeChannel;
