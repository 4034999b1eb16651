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

//! A sequential byte stream over a [MessageTransport]

use keepwire_error::{Error, ErrorType::*, OkOrErr, OrErr, Result};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::conf::WsConnectionConf;
use crate::transport::{MessageKind, MessageTransport, Received, TransportState};

const DISPOSED: &str = "Can not read or write a disposed stream";

/// Cancels the in-flight and all future reads of a [MessageStream].
///
/// A read holds the stream mutably, so whoever wants to tear the stream down while a read is
/// stuck on a stalled peer cancels it through this handle first.
#[derive(Clone)]
pub struct ReadCanceller(Arc<watch::Sender<bool>>);

impl ReadCanceller {
    pub fn cancel(&self) {
        // the stream itself holds a receiver, so this only fails once it is gone
        let _ = self.0.send(true);
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // no canceller left, never fires
            std::future::pending::<()>().await;
        }
    }
}

/// A [MessageTransport] read and written as a stream.
///
/// Binary reads and writes map one to one onto receives and sends of the transport. Text
/// messages are read and written whole.
///
/// Once [Self::shutdown()] ran, every read and write fails with [StreamDisposed]. After the
/// peer closed the transport they fail with [ConnectionClosed].
pub struct MessageStream<T> {
    transport: Option<T>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    close_timeout: Duration,
    receive_buffer_size: usize,
}

impl<T: MessageTransport> MessageStream<T> {
    pub fn new(transport: T) -> Self {
        Self::with_conf(transport, &WsConnectionConf::default())
    }

    pub fn with_conf(transport: T, conf: &WsConnectionConf) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        MessageStream {
            transport: Some(transport),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            close_timeout: conf.close_timeout(),
            // an empty buffer would never make progress through a message
            receive_buffer_size: conf.receive_buffer_size.max(1),
        }
    }

    /// A handle to cancel reads from another task.
    pub fn canceller(&self) -> ReadCanceller {
        ReadCanceller(self.cancel_tx.clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.transport.is_none()
    }

    /// Whether reads were cancelled through a [ReadCanceller]. Cancellation is permanent.
    pub fn is_read_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    fn is_open(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.state() == TransportState::Open)
    }

    pub fn can_read(&self) -> bool {
        self.is_open()
    }

    pub fn can_write(&self) -> bool {
        self.is_open()
    }

    fn usable(&mut self) -> Result<&mut T> {
        let transport = self
            .transport
            .as_mut()
            .or_err(StreamDisposed, DISPOSED)
            .map_err(|e| e.into_local())?;
        if transport.close_status().is_some() {
            return Err(
                Error::explain(ConnectionClosed, "Remote endpoint closed the stream").into_remote(),
            );
        }
        Ok(transport)
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<Received> {
        let cancel = self.cancel_rx.clone();
        let transport = self.usable()?;
        if *cancel.borrow() {
            return Error::e_explain(ReadCancelled, "read cancelled");
        }
        tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                debug!("pending read cancelled");
                Error::e_explain(ReadCancelled, "read cancelled")
            }
            received = transport.receive(buf) => received,
        }
    }

    /// Read whatever the next receive of the transport delivers, up to `buf.len()` bytes.
    ///
    /// Returns `0` when the peer starts the close handshake.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let received = self.receive(buf).await?;
        match received.kind {
            MessageKind::Close => Ok(0),
            _ => Ok(received.len),
        }
    }

    /// Send `buf` as one binary message.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.usable()?.send(MessageKind::Binary, buf).await
    }

    /// Read one complete text message, however many fragments it arrives in.
    pub async fn read_text_message(&mut self) -> Result<String> {
        let mut message = vec![];
        let mut buf = vec![0u8; self.receive_buffer_size];
        loop {
            let received = self.receive(&mut buf).await?;
            match received.kind {
                MessageKind::Text => {}
                MessageKind::Close => {
                    return Err(Error::explain(
                        ConnectionClosed,
                        "Remote endpoint closed the stream while reading a text message",
                    )
                    .into_remote());
                }
                kind => {
                    return Err(Error::explain(
                        UnexpectedMessage,
                        format!("Encountered an unexpected message type {kind:?}"),
                    )
                    .into_remote());
                }
            }
            message.extend_from_slice(&buf[..received.len]);
            if received.end_of_message {
                return String::from_utf8(message)
                    .or_err(ReadError, "text message is not valid UTF-8");
            }
        }
    }

    /// Send `message` as one complete text message.
    pub async fn write_text_message(&mut self, message: &str) -> Result<()> {
        self.usable()?
            .send(MessageKind::Text, message.as_bytes())
            .await
    }

    /// Close the stream.
    ///
    /// Pending reads are cancelled and, if the transport is still open, a close frame is sent,
    /// waiting at most the configured close timeout for it. The transport is released whatever
    /// the outcome. Calling this again does nothing.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        let _ = self.cancel_tx.send(true);

        let res = if transport.state() == TransportState::Open {
            match timeout(self.close_timeout, transport.close()).await {
                Ok(res) => res,
                Err(_) => Error::e_explain(
                    CloseTimedout,
                    format!("close not sent within {:?}", self.close_timeout),
                ),
            }
        } else {
            Ok(())
        };
        if let Err(e) = res.as_ref() {
            debug!("graceful close failed: {e}");
        }
        res
        // transport dropped here
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// A transport replaying a fixed script of incoming fragments
    #[derive(Default)]
    struct Scripted {
        incoming: VecDeque<(MessageKind, Vec<u8>, bool)>,
        sent: Arc<Mutex<Vec<(MessageKind, Vec<u8>)>>>,
        closes: Arc<Mutex<usize>>,
        state: Option<TransportState>,
        close_status: Option<u16>,
        // block forever once the script runs out, or on close
        stall_receive: bool,
        stall_close: bool,
    }

    impl Scripted {
        fn fragment(mut self, kind: MessageKind, data: &[u8], end: bool) -> Self {
            self.incoming.push_back((kind, data.to_vec(), end));
            self
        }
    }

    #[async_trait]
    impl MessageTransport for Scripted {
        async fn receive(&mut self, buf: &mut [u8]) -> Result<Received> {
            match self.incoming.pop_front() {
                Some((MessageKind::Close, _, _)) => {
                    self.close_status = Some(1000);
                    self.state = Some(TransportState::CloseReceived);
                    Ok(Received::close())
                }
                Some((kind, data, end_of_message)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(Received {
                        len: data.len(),
                        kind,
                        end_of_message,
                    })
                }
                None if self.stall_receive => std::future::pending().await,
                None => Error::e_explain(ConnectionClosed, "script ended"),
            }
        }

        async fn send(&mut self, kind: MessageKind, data: &[u8]) -> Result<()> {
            self.sent.lock().push((kind, data.to_vec()));
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if self.stall_close {
                std::future::pending::<()>().await;
            }
            *self.closes.lock() += 1;
            self.state = Some(TransportState::CloseSent);
            Ok(())
        }

        fn state(&self) -> TransportState {
            self.state.unwrap_or(TransportState::Open)
        }

        fn close_status(&self) -> Option<u16> {
            self.close_status
        }
    }

    #[tokio::test]
    async fn test_text_message_across_fragments() {
        // split inside the two byte 'é'
        let bytes = "héllo".as_bytes();
        let transport = Scripted::default()
            .fragment(MessageKind::Text, &bytes[..2], false)
            .fragment(MessageKind::Text, &bytes[2..4], false)
            .fragment(MessageKind::Text, &bytes[4..], true)
            .fragment(MessageKind::Text, b"next", true);
        let mut stream = MessageStream::new(transport);
        assert_eq!(stream.read_text_message().await.unwrap(), "héllo");
        assert_eq!(stream.read_text_message().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_text_message_wrong_type() {
        let transport = Scripted::default()
            .fragment(MessageKind::Text, b"par", false)
            .fragment(MessageKind::Binary, b"t", true);
        let mut stream = MessageStream::new(transport);
        let e = stream.read_text_message().await.unwrap_err();
        assert_eq!(e.etype(), &UnexpectedMessage);
        assert!(e.etype().is_capability_violation());
    }

    #[tokio::test]
    async fn test_text_message_invalid_utf8() {
        let transport = Scripted::default().fragment(MessageKind::Text, &[0xff, 0xfe], true);
        let mut stream = MessageStream::new(transport);
        let e = stream.read_text_message().await.unwrap_err();
        assert_eq!(e.etype(), &ReadError);
    }

    #[tokio::test]
    async fn test_binary_read_is_one_receive() {
        let transport = Scripted::default()
            .fragment(MessageKind::Binary, b"abc", false)
            .fragment(MessageKind::Binary, b"de", true);
        let mut stream = MessageStream::new(transport);
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(stream.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
    }

    #[tokio::test]
    async fn test_writes() {
        let transport = Scripted::default();
        let sent = transport.sent.clone();
        let mut stream = MessageStream::new(transport);
        stream.write(b"\x00\x01").await.unwrap();
        stream.write_text_message("hello").await.unwrap();
        assert_eq!(
            *sent.lock(),
            vec![
                (MessageKind::Binary, b"\x00\x01".to_vec()),
                (MessageKind::Text, b"hello".to_vec())
            ]
        );
    }

    #[tokio::test]
    async fn test_peer_close() {
        let transport = Scripted::default().fragment(MessageKind::Close, b"", true);
        let mut stream = MessageStream::new(transport);
        assert!(stream.can_read());
        let e = stream.read_text_message().await.unwrap_err();
        assert_eq!(e.etype(), &ConnectionClosed);
        assert_eq!(e.esource(), &keepwire_error::ErrorSource::Remote);
        assert!(!stream.can_write());

        let e = stream.write(b"x").await.unwrap_err();
        assert_eq!(e.etype(), &ConnectionClosed);

        // no close frame to send back when the transport is no longer open
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_returns_zero_on_close() {
        let transport = Scripted::default().fragment(MessageKind::Close, b"", true);
        let mut stream = MessageStream::new(transport);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let transport = Scripted::default().fragment(MessageKind::Text, b"left over", true);
        let closes = transport.closes.clone();
        let mut stream = MessageStream::new(transport);
        stream.shutdown().await.unwrap();
        assert!(stream.is_disposed());
        assert!(!stream.can_read());
        assert!(!stream.can_write());
        assert_eq!(*closes.lock(), 1);

        let e = stream.read_text_message().await.unwrap_err();
        assert_eq!(e.etype(), &StreamDisposed);
        assert!(e.etype().is_capability_violation());
        let e = stream.write_text_message("late").await.unwrap_err();
        assert_eq!(e.etype(), &StreamDisposed);
        assert_eq!(e.esource(), &keepwire_error::ErrorSource::Local);

        // idempotent
        stream.shutdown().await.unwrap();
        assert_eq!(*closes.lock(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_bounded_by_close_timeout() {
        let transport = Scripted {
            stall_close: true,
            ..Default::default()
        };
        let conf = WsConnectionConf {
            close_timeout_ms: 20,
            ..Default::default()
        };
        let mut stream = MessageStream::with_conf(transport, &conf);
        let e = stream.shutdown().await.unwrap_err();
        assert_eq!(e.etype(), &CloseTimedout);
        // released anyway
        assert!(stream.is_disposed());
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_read() {
        let transport = Scripted {
            stall_receive: true,
            ..Default::default()
        };
        let mut stream = MessageStream::new(transport);
        let canceller = stream.canceller();
        let mut buf = [0u8; 8];
        let (read, _) = tokio::join!(stream.read(&mut buf), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        assert_eq!(read.unwrap_err().etype(), &ReadCancelled);
        assert!(stream.is_read_cancelled());

        // the stream can still be torn down
        stream.shutdown().await.unwrap();
        assert!(stream.is_disposed());
    }
}
