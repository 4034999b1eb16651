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

//! Message transports as streams, and poolable connections built on them
//!
//! [MessageStream] turns a duplex, message-framed transport such as a websocket into a
//! sequential stream with explicit text and binary framing and a graceful close.
//! [WsConnection] wraps one so it can be cached in a [keepwire_pool::ConnectionPool].

#![warn(clippy::all)]

mod conf;
mod connection;
mod stream;
mod transport;
mod websocket;

pub use conf::WsConnectionConf;
pub use connection::WsConnection;
pub use stream::{MessageStream, ReadCanceller};
pub use transport::{MessageKind, MessageTransport, Received, TransportState};
pub use websocket::WsTransport;

// re-export so that callers can name the role of a raw websocket
pub use tokio_tungstenite::tungstenite::protocol::Role;
