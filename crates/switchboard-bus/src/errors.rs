//! Bus error types.

use thiserror::Error;

/// Errors raised by bus implementations and message decoding.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the bus.
    #[error("bus connection failed: {0}")]
    Connect(String),

    /// Subscription could not be established.
    #[error("subscribe to `{topic}` failed: {reason}")]
    Subscribe {
        /// Topic name.
        topic: String,
        /// Underlying failure.
        reason: String,
    },

    /// Publish was not accepted.
    #[error("publish to `{topic}` failed: {reason}")]
    Publish {
        /// Topic name.
        topic: String,
        /// Underlying failure.
        reason: String,
    },

    /// A live subscription lost messages or its connection.
    #[error("bus receive failed: {0}")]
    Receive(String),

    /// Payload is not a valid message of its declared kind.
    #[error("malformed bus message: {0}")]
    Decode(#[from] serde_json::Error),

    /// A field the relay needs is absent.
    #[error("bus message `{message}` is missing `{field}`")]
    MissingField {
        /// Envelope name.
        message: String,
        /// Dotted path of the field.
        field: &'static str,
    },
}
