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

//! Keyed connection pooling
//!
//! A [ConnectionPool] caches established, reusable connections per endpoint key so that
//! repeated calls to the same remote endpoint skip the cost of setting up a new transport
//! session. Anything implementing [PooledResource] can be pooled.
//!
//! The pool never creates connections and never blocks: an empty bucket is the caller's signal
//! to connect on its own, outside the pool.

#![warn(clippy::all)]

mod conf;
mod connection;
mod dispose;
mod resource;

pub use conf::{PoolConf, DEFAULT_CAPACITY_PER_KEY};
pub use connection::ConnectionPool;
pub use dispose::{DiagnosticSink, DisposeReport, LogSink};
pub use resource::{IdleClock, PooledResource};
