//! Protocol-level errors.
//!
//! Everything here is recoverable: a frame that fails to decode is logged and
//! dropped by the caller, the connection stays up.

use thiserror::Error;

/// Failure to interpret a graphql-ws frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes are not a JSON object shaped like a frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A frame type that needs an `id` arrived without one.
    #[error("frame `{frame_type}` is missing its id")]
    MissingId {
        /// Wire `type` value.
        frame_type: String,
    },

    /// A subscribe frame without a usable payload.
    #[error("subscribe frame `{id}` has no payload")]
    MissingPayload {
        /// Client query id.
        id: String,
    },

    /// The stored start frame could not be patched for cursor resume.
    #[error("cannot patch cursor variable `{variable}`: {reason}")]
    CursorPatch {
        /// Variable that was being rewritten.
        variable: String,
        /// What was wrong with the frame.
        reason: &'static str,
    },
}
