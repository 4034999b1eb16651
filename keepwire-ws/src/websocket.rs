// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! [MessageTransport] over an established websocket

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use keepwire_error::{Error, ErrorType::*, OrErr, Result};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::transport::{MessageKind, MessageTransport, Received, TransportState};

// RFC 6455 "no status received"
const CLOSE_NO_STATUS: u16 = 1005;

// a message that did not fit in the caller's buffer yet
struct Pending {
    kind: MessageKind,
    data: Vec<u8>,
    offset: usize,
}

/// A websocket as a [MessageTransport]
///
/// Ping and pong control frames are answered by the websocket library and never surface.
pub struct WsTransport<S> {
    ws: WebSocketStream<S>,
    state: TransportState,
    close_status: Option<u16>,
    pending: Option<Pending>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a websocket that already completed its opening handshake.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        WsTransport {
            ws,
            state: TransportState::Open,
            close_status: None,
            pending: None,
        }
    }

    /// Treat `stream` as a websocket whose opening handshake already happened.
    pub async fn from_raw_socket(stream: S, role: Role) -> Self {
        Self::new(WebSocketStream::from_raw_socket(stream, role, None).await)
    }

    pub fn get_ref(&self) -> &WebSocketStream<S> {
        &self.ws
    }

    fn fill(&mut self, mut pending: Pending, buf: &mut [u8]) -> Received {
        let left = &pending.data[pending.offset..];
        let len = left.len().min(buf.len());
        buf[..len].copy_from_slice(&left[..len]);
        pending.offset += len;
        let end_of_message = pending.offset == pending.data.len();
        let received = Received {
            len,
            kind: pending.kind,
            end_of_message,
        };
        if !end_of_message {
            self.pending = Some(pending);
        }
        received
    }

    fn on_close(&mut self, code: Option<u16>) -> Received {
        self.close_status = Some(code.unwrap_or(CLOSE_NO_STATUS));
        self.state = match self.state {
            TransportState::CloseSent => TransportState::Closed,
            _ => TransportState::CloseReceived,
        };
        debug!("peer closed the websocket, status {:?}", self.close_status);
        Received::close()
    }
}

#[async_trait]
impl<S> MessageTransport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self, buf: &mut [u8]) -> Result<Received> {
        if let Some(pending) = self.pending.take() {
            return Ok(self.fill(pending, buf));
        }
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.state = TransportState::Closed;
                    return Err(Error::because(ReadError, "receiving websocket message", e));
                }
                None => {
                    self.state = TransportState::Closed;
                    return Err(
                        Error::explain(ConnectionClosed, "websocket ended without close")
                            .into_remote(),
                    );
                }
            };
            let (kind, data) = match msg {
                Message::Text(text) => (MessageKind::Text, text.into_bytes()),
                Message::Binary(data) => (MessageKind::Binary, data),
                Message::Close(frame) => {
                    return Ok(self.on_close(frame.map(|f| u16::from(f.code))));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("skip websocket control frame");
                    continue;
                }
            };
            let pending = Pending {
                kind,
                data,
                offset: 0,
            };
            return Ok(self.fill(pending, buf));
        }
    }

    async fn send(&mut self, kind: MessageKind, data: &[u8]) -> Result<()> {
        let msg = match kind {
            MessageKind::Text => Message::Text(
                String::from_utf8(data.to_vec()).or_err(WriteError, "text message is not UTF-8")?,
            ),
            MessageKind::Binary => Message::Binary(data.to_vec()),
            MessageKind::Close => return self.close().await,
        };
        self.ws
            .send(msg)
            .await
            .or_err(WriteError, "sending websocket message")
    }

    async fn close(&mut self) -> Result<()> {
        match self.ws.close(None).await {
            // after the peer's close the reply is already queued by tungstenite
            Ok(())
            | Err(WsError::ConnectionClosed)
            | Err(WsError::AlreadyClosed)
            | Err(WsError::Protocol(ProtocolError::SendAfterClosing)) => {}
            Err(e) => {
                self.state = TransportState::Closed;
                return Err(Error::because(WriteError, "sending websocket close", e));
            }
        }
        self.state = match self.state {
            TransportState::Open => TransportState::CloseSent,
            _ => TransportState::Closed,
        };
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn close_status(&self) -> Option<u16> {
        self.close_status
    }
}
