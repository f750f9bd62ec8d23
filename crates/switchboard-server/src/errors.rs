//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failure on a frame transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the upstream failed.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// Dialed URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },
    /// Dialing the upstream took too long.
    #[error("connect to {url} timed out")]
    ConnectTimeout {
        /// Dialed URL.
        url: String,
    },
    /// Protocol or I/O error on an open socket.
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// Peer is gone.
    #[error("connection closed")]
    Closed,
}

/// Reasons a browser upgrade is refused.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A claim header the relay needs is absent or empty.
    #[error("missing session claim `{0}`")]
    MissingClaim(&'static str),
    /// The connection limit is reached.
    #[error("connection limit of {0} reached")]
    TooManyConnections(usize),
    /// The relay is draining.
    #[error("relay is shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// HTTP status returned for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingClaim(_) => StatusCode::UNAUTHORIZED,
            Self::TooManyConnections(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_status_codes() {
        assert_eq!(
            SessionError::MissingClaim("x-session-token").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SessionError::TooManyConnections(5).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            SessionError::ShuttingDown.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::ConnectTimeout {
            url: "ws://engine".into(),
        };
        assert_eq!(err.to_string(), "connect to ws://engine timed out");
    }
}
