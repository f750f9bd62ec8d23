//! Upstream transport over tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::{FrameReader, FrameWriter, UpstreamConnector, UpstreamTransport};
use crate::errors::TransportError;
use crate::websocket::auth::{
    CLIENT_IS_MOBILE_HEADER, CLIENT_SESSION_UUID_HEADER, CLIENT_TYPE_HEADER, SESSION_TOKEN_HEADER,
    SessionInfo,
};

/// Read half of a tungstenite socket.
pub struct TungsteniteReader<S> {
    inner: S,
}

impl<S> TungsteniteReader<S> {
    /// Wrap a message stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

/// Write half of a tungstenite socket.
pub struct TungsteniteWriter<S> {
    inner: S,
}

impl<S> TungsteniteWriter<S> {
    /// Wrap a message sink.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameReader for TungsteniteReader<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    async fn read(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Message::Binary(data) => return Some(Ok(data)),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => return None,
            }
        }
    }
}

#[async_trait]
impl<S> FrameWriter for TungsteniteWriter<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

/// Dials the engine's WebSocket endpoint.
///
/// Client identity headers are forwarded so the engine can authorize the
/// session.
#[derive(Clone, Debug)]
pub struct WsUpstreamConnector {
    url: String,
    subprotocol: String,
    connect_timeout: Duration,
}

impl WsUpstreamConnector {
    /// Create a connector.
    pub fn new(url: impl Into<String>, subprotocol: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            subprotocol: subprotocol.into(),
            connect_timeout,
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connect {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl UpstreamConnector for WsUpstreamConnector {
    async fn connect(&self, session: &SessionInfo) -> Result<UpstreamTransport, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_error(e))?;

        let headers = request.headers_mut();
        let protocol = HeaderValue::from_str(&self.subprotocol).map_err(|e| self.connect_error(e))?;
        let _ = headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
        let forwarded = [
            (SESSION_TOKEN_HEADER, session.session_token.as_str()),
            (CLIENT_SESSION_UUID_HEADER, session.client_session_uuid.as_str()),
            (CLIENT_TYPE_HEADER, session.client_type.as_str()),
            (CLIENT_IS_MOBILE_HEADER, if session.client_is_mobile { "true" } else { "false" }),
        ];
        for (name, value) in forwarded {
            if let Ok(value) = HeaderValue::from_str(value) {
                let _ = headers.insert(name, value);
            }
        }

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                url: self.url.clone(),
            })?
            .map_err(|e| self.connect_error(e))?;
        debug!(url = %self.url, "upstream connected");

        let (sink, stream) = socket.split();
        Ok(UpstreamTransport {
            reader: Box::new(TungsteniteReader::new(stream)),
            writer: Box::new(TungsteniteWriter::new(sink)),
        })
    }
}
