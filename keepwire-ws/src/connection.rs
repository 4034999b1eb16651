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

//! A poolable connection built on [MessageStream]

use keepwire_error::{ErrorType::*, OkOrErr, Result};
use keepwire_pool::{IdleClock, PooledResource};
use log::debug;
use tokio::runtime::Handle;

use crate::conf::WsConnectionConf;
use crate::stream::MessageStream;
use crate::transport::MessageTransport;

/// An established connection that can be cached in a [keepwire_pool::ConnectionPool].
///
/// It expires once it sat idle for longer than the configured idle timeout, once its
/// transport is no longer open, or once its reads were cancelled.
pub struct WsConnection<T> {
    stream: Option<MessageStream<T>>,
    clock: IdleClock,
}

impl<T: MessageTransport> WsConnection<T> {
    pub fn new(transport: T, conf: &WsConnectionConf) -> Self {
        WsConnection {
            stream: Some(MessageStream::with_conf(transport, conf)),
            clock: IdleClock::new(conf.idle_timeout()),
        }
    }

    /// The stream of this connection, as long as it was not disposed.
    pub fn stream(&mut self) -> Result<&mut MessageStream<T>> {
        self.stream
            .as_mut()
            .or_err(StreamDisposed, "connection already disposed")
    }

    pub fn is_disposed(&self) -> bool {
        self.stream.is_none()
    }

    /// Gracefully close the connection, waiting for the close handshake.
    ///
    /// Prefer this over dropping when the caller owns the connection in an async context.
    pub async fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }
}

impl<T> PooledResource for WsConnection<T>
where
    T: MessageTransport + 'static,
{
    fn has_expired(&self) -> bool {
        match self.stream.as_ref() {
            Some(stream) => {
                self.clock.is_expired() || !stream.can_write() || stream.is_read_cancelled()
            }
            None => true,
        }
    }

    fn notify_used(&mut self) {
        self.clock.touch();
    }

    // Disposal must not block: the close handshake runs in the background when a runtime is
    // around, otherwise the transport is just dropped.
    fn dispose(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = stream.shutdown().await {
                        debug!("closing pooled connection: {e}");
                    }
                });
            }
            Err(_) => {
                debug!("no runtime to close the connection gracefully, dropping it");
                drop(stream);
            }
        }
        Ok(())
    }
}
