//! Live cursor presence.
//!
//! The relay answers the cursor coordinates stream itself: cursor moves
//! arrive on the bus, are fanned out to every subscribed browser in the
//! meeting, and the last position per user is kept so a new subscriber can
//! be seeded.

pub mod broadcast;
pub mod cache;

pub use broadcast::{BroadcastReport, broadcast_cursor, cursor_row, seed_cursor_stream};
pub use cache::PresenceCache;
