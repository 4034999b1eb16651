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

use keepwire_error::Result;
use std::time::{Duration, Instant};

/// The capability a value needs in order to be cached by a [crate::ConnectionPool].
///
/// The pool never creates resources. Callers build them (connect, handshake, authenticate)
/// and hand them in with [crate::ConnectionPool::put].
pub trait PooledResource {
    /// Whether this resource is too stale to be handed out again.
    ///
    /// Called every time the pool considers returning this resource from
    /// [crate::ConnectionPool::take], so it should be cheap and free of side effects.
    fn has_expired(&self) -> bool;

    /// Called exactly once per [crate::ConnectionPool::put], to reset the idle clock.
    fn notify_used(&mut self);

    /// Release the underlying sockets and handles.
    ///
    /// Must be idempotent: disposing an already disposed resource returns `Ok(())`.
    fn dispose(&mut self) -> Result<()>;
}

impl<R: PooledResource + ?Sized> PooledResource for Box<R> {
    fn has_expired(&self) -> bool {
        (**self).has_expired()
    }

    fn notify_used(&mut self) {
        (**self).notify_used()
    }

    fn dispose(&mut self) -> Result<()> {
        (**self).dispose()
    }
}

/// Tracks how long a resource has been sitting idle.
///
/// A building block for [PooledResource] implementations: call [IdleClock::touch] from
/// `notify_used()` and [IdleClock::is_expired] from `has_expired()`.
#[derive(Debug, Clone, Copy)]
pub struct IdleClock {
    last_used: Instant,
    idle_timeout: Duration,
}

impl IdleClock {
    /// Create a new [IdleClock] that starts counting now.
    pub fn new(idle_timeout: Duration) -> Self {
        IdleClock {
            last_used: Instant::now(),
            idle_timeout,
        }
    }

    /// Reset the clock.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// How long since the last [IdleClock::touch].
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Whether the idle time has reached the timeout.
    pub fn is_expired(&self) -> bool {
        self.idle_for() >= self.idle_timeout
    }
}
