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

//! Duplex message-framed transports

use async_trait::async_trait;
use keepwire_error::Result;

/// The framing type of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    /// The peer started the close handshake
    Close,
}

/// What a single receive produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// bytes written into the caller's buffer
    pub len: usize,
    pub kind: MessageKind,
    /// whether this fragment completes the message
    pub end_of_message: bool,
}

impl Received {
    pub fn close() -> Self {
        Received {
            len: 0,
            kind: MessageKind::Close,
            end_of_message: true,
        }
    }
}

/// The open/closed state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    /// we sent a close frame and wait for the peer's
    CloseSent,
    /// the peer sent a close frame
    CloseReceived,
    Closed,
}

/// A full-duplex channel carrying discrete messages, such as an established websocket.
///
/// Establishing the channel, including any handshake, happens before it is handed to
/// [crate::MessageStream].
#[async_trait]
pub trait MessageTransport: Send {
    /// Receive the next fragment into `buf`.
    ///
    /// A message larger than `buf` is delivered over several calls, only the last of which
    /// has `end_of_message` set.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<Received>;

    /// Send one complete message.
    async fn send(&mut self, kind: MessageKind, data: &[u8]) -> Result<()>;

    /// Send a close frame to start or finish the close handshake.
    async fn close(&mut self) -> Result<()>;

    fn state(&self) -> TransportState;

    /// The close code the peer sent, if it did.
    fn close_status(&self) -> Option<u16>;
}
