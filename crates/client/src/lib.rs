//! Harbor Client
//!
//! Client-side half of a support conversation: an HTTP binding for the
//! session API and the reconciler that merges history fetches, optimistic
//! sends, and realtime events into one de-duplicated view.

pub mod api;
pub mod error;
pub mod reconciler;

pub use api::{HttpSessionApi, SessionApi, SessionHistory};
pub use error::{ClientError, ClientResult};
pub use reconciler::{Entry, PendingSend, Reconciler};
