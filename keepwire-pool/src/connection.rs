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

use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::conf::{PoolConf, DEFAULT_CAPACITY_PER_KEY};
use crate::dispose::{destroy_all, DiagnosticSink, DisposeReport};
use crate::PooledResource;

/// The idle connections of one endpoint key.
///
/// Connections are appended when released and the most recently released one is handed out
/// first. Overflow evicts from the other end, so the connections that sat idle the longest go
/// first.
struct Bucket<R> {
    idle: VecDeque<R>,
}

impl<R> Bucket<R> {
    fn new() -> Self {
        Bucket {
            idle: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.idle.len()
    }

    fn pop_hot(&mut self) -> Option<R> {
        self.idle.pop_back()
    }

    fn push(&mut self, conn: R) {
        self.idle.push_back(conn);
    }

    // detach the oldest connections until at most `capacity` are left
    fn evict_over(&mut self, capacity: usize, evicted: &mut Vec<R>) {
        while self.idle.len() > capacity {
            if let Some(conn) = self.idle.pop_front() {
                evicted.push(conn);
            }
        }
    }

    fn detach_all(&mut self, out: &mut Vec<R>) {
        out.extend(self.idle.drain(..));
    }
}

impl<R: PooledResource> Bucket<R> {
    fn detach_expired(&mut self, expired: &mut Vec<R>) {
        let mut kept = VecDeque::with_capacity(self.idle.len());
        for conn in self.idle.drain(..) {
            if conn.has_expired() {
                expired.push(conn);
            } else {
                kept.push_back(conn);
            }
        }
        self.idle = kept;
    }
}

/// Connection pool
///
/// [ConnectionPool] holds idle, reusable connections grouped by an endpoint key `K`. A caller
/// asks the pool for a connection with [Self::take()]; when the pool has none, creating one is
/// up to the caller. Once done, the caller hands the connection back with [Self::put()].
///
/// All operations serialize on one lock per pool. The lock is only held to move connections
/// in and out of their buckets: expiration checks run under it, disposal never does.
///
/// Connections are moved into and out of the pool by value, so the same connection can never
/// sit in the pool twice and the pool never touches a connection it handed out.
pub struct ConnectionPool<K, R: PooledResource> {
    buckets: Mutex<HashMap<K, Bucket<R>>>,
    capacity: usize,
    reap_interval: Option<Duration>,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl<K, R> ConnectionPool<K, R>
where
    K: Hash + Eq + Clone,
    R: PooledResource,
{
    /// Create a new [ConnectionPool] keeping at most `capacity` idle connections per key.
    pub fn new(capacity: usize) -> Self {
        ConnectionPool {
            buckets: Mutex::new(HashMap::new()),
            capacity,
            reap_interval: None,
            sink: None,
        }
    }

    /// Create a new [ConnectionPool] from its configuration.
    ///
    /// The configured reap interval is what [Self::run_idle_reaper()] sweeps with.
    pub fn with_conf(conf: &PoolConf) -> Self {
        let mut pool = Self::new(conf.capacity_per_key);
        pool.reap_interval = conf.reap_interval();
        pool
    }

    /// Report disposal failures of `take()`, `put()` and the batch operations to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval
    }

    fn sink(&self) -> Option<&dyn DiagnosticSink> {
        self.sink.as_deref()
    }

    /// Get an idle connection for `key`.
    ///
    /// Expired connections found on the way are removed and destroyed. `None` means the caller
    /// should create a new connection itself.
    pub fn take(&self, key: &K) -> Option<R> {
        let mut expired = vec![];
        let found = {
            let mut buckets = self.buckets.lock();
            let bucket = buckets.entry(key.clone()).or_insert_with(Bucket::new);
            loop {
                match bucket.pop_hot() {
                    Some(conn) if conn.has_expired() => expired.push(conn),
                    other => break other,
                }
            }
        }; // lock released here

        if !expired.is_empty() {
            debug!("purge {} expired idle connections", expired.len());
            destroy_all(expired, self.sink());
        }
        found
    }

    /// Release a connection to this pool for reuse.
    ///
    /// The idle clock of the connection is reset. If the bucket of `key` grows over the
    /// capacity, the oldest idle connections are destroyed.
    pub fn put(&self, key: K, mut conn: R) {
        conn.notify_used();
        let mut evicted = vec![];
        {
            let mut buckets = self.buckets.lock();
            let bucket = buckets.entry(key).or_insert_with(Bucket::new);
            bucket.push(conn);
            bucket.evict_over(self.capacity, &mut evicted);
        } // lock released here

        if !evicted.is_empty() {
            debug!("evict {} idle connections over capacity", evicted.len());
            destroy_all(evicted, self.sink());
        }
    }

    /// Destroy every idle connection of `key`.
    ///
    /// The failures are reported to `sink`, or to the pool's own sink when `None` is given.
    /// Connections currently taken out of the pool are not affected.
    pub fn clear(&self, key: &K, sink: Option<&dyn DiagnosticSink>) -> DisposeReport {
        let mut victims = vec![];
        {
            let mut buckets = self.buckets.lock();
            match buckets.get_mut(key) {
                Some(bucket) => bucket.detach_all(&mut victims),
                None => return DisposeReport::default(),
            }
        } // lock released here

        debug!("clear {} idle connections", victims.len());
        destroy_all(victims, sink.or(self.sink()))
    }

    /// Destroy every expired idle connection, across all keys.
    pub fn evict_expired(&self) -> DisposeReport {
        let mut expired = vec![];
        {
            let mut buckets = self.buckets.lock();
            for bucket in buckets.values_mut() {
                bucket.detach_expired(&mut expired);
            }
        } // lock released here

        if expired.is_empty() {
            return DisposeReport::default();
        }
        debug!("evict {} expired idle connections", expired.len());
        destroy_all(expired, self.sink())
    }

    /// The number of idle connections stored under `key`.
    pub fn idle_connections(&self, key: &K) -> usize {
        self.buckets.lock().get(key).map_or(0, |b| b.len())
    }

    /// Periodically destroy expired idle connections until `shutdown` turns `true`.
    ///
    /// Without the reaper, expired connections are only purged when `take()` runs into them.
    pub async fn idle_reaper(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                debug!("idle reaper is shutting down");
                return;
            }
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() {
                        debug!("idle reaper shutdown sender dropped");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.evict_expired();
                    if report.disposed > 0 {
                        debug!("idle reaper evicted {} connections", report.disposed);
                    }
                }
            }
        }
    }

    /// [Self::idle_reaper()] at the interval this pool was configured with.
    ///
    /// Returns right away when no reap interval is configured.
    pub async fn run_idle_reaper(&self, shutdown: watch::Receiver<bool>) {
        match self.reap_interval {
            Some(period) => self.idle_reaper(period, shutdown).await,
            None => debug!("no reap interval configured, idle reaper not started"),
        }
    }
}

impl<K, R: PooledResource> ConnectionPool<K, R> {
    /// Total idle connections across all keys, at the time of the call.
    pub fn total_connections(&self) -> usize {
        self.buckets.lock().values().map(|b| b.len()).sum()
    }

    /// Destroy every idle connection and empty the pool.
    ///
    /// The pool stays usable afterwards. It is also drained when dropped.
    pub fn drain(&self) -> DisposeReport {
        let buckets = std::mem::take(&mut *self.buckets.lock());
        let mut victims = vec![];
        for mut bucket in buckets.into_values() {
            bucket.detach_all(&mut victims);
        }
        if victims.is_empty() {
            return DisposeReport::default();
        }
        debug!("drain {} idle connections", victims.len());
        destroy_all(victims, self.sink.as_deref())
    }
}

impl<K, R> Default for ConnectionPool<K, R>
where
    K: Hash + Eq + Clone,
    R: PooledResource,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_PER_KEY)
    }
}

impl<K, R: PooledResource> Drop for ConnectionPool<K, R> {
    fn drop(&mut self) {
        self.drain();
    }
}
