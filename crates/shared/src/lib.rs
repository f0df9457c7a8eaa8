//! Harbor Shared Types and Utilities
//!
//! This crate contains types, errors, realtime wire events and utilities shared
//! across the Harbor support-session platform.

pub mod db;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod types;

pub use db::*;
pub use error::*;
pub use events::{ClientEvent, ServerEvent};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use types::*;
