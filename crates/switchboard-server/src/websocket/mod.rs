//! Browser sessions.
//!
//! Each accepted socket runs three tasks: the browser read loop
//! ([`reader`]), the browser write loop, and the upstream supervisor
//! ([`upstream_session`]) that dials the engine, replays subscriptions and
//! pumps frames both ways until the browser leaves.

pub mod auth;
pub mod reader;
pub mod session;
pub mod upstream_session;

pub use auth::{ClaimHeaderResolver, SessionInfo, SessionResolver};
pub use session::run_browser_session;
