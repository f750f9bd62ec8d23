//! Browser-side transport over axum WebSockets.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{FrameReader, FrameWriter};
use crate::errors::TransportError;

/// Read half of an upgraded browser socket.
pub struct AxumReader {
    inner: SplitStream<WebSocket>,
}

/// Write half of an upgraded browser socket.
pub struct AxumWriter {
    inner: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into frame halves.
pub fn split(socket: WebSocket) -> (AxumReader, AxumWriter) {
    let (sink, stream) = socket.split();
    (AxumReader { inner: stream }, AxumWriter { inner: sink })
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn read(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Message::Binary(data) => return Some(Ok(data)),
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return None,
            }
        }
    }
}

#[async_trait]
impl FrameWriter for AxumWriter {
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
            code,
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
