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

use keepwire_error::{Error, ErrorType, Result};
use keepwire_pool::{ConnectionPool, IdleClock, PoolConf, PooledResource};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Slot {
    in_use: AtomicBool,
    disposals: AtomicUsize,
}

// A connection that panics the test if two callers ever hold it at once
struct Conn {
    slot: Arc<Slot>,
    clock: IdleClock,
    fail_dispose: bool,
}

impl Conn {
    fn new(slot: Arc<Slot>, idle_timeout: Duration) -> Self {
        Conn {
            slot,
            clock: IdleClock::new(idle_timeout),
            fail_dispose: false,
        }
    }

    fn acquire(&self) {
        assert!(
            !self.slot.in_use.swap(true, Ordering::SeqCst),
            "connection handed out twice"
        );
    }

    fn release(&self) {
        self.slot.in_use.store(false, Ordering::SeqCst);
    }
}

impl PooledResource for Conn {
    fn has_expired(&self) -> bool {
        self.clock.is_expired()
    }

    fn notify_used(&mut self) {
        self.clock.touch();
    }

    fn dispose(&mut self) -> Result<()> {
        self.slot.disposals.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            return Error::e_explain(ErrorType::DisposeError, "socket close failed");
        }
        Ok(())
    }
}

#[test]
fn test_no_connection_shared_between_threads() {
    let pool: Arc<ConnectionPool<u8, Conn>> = Arc::new(ConnectionPool::new(3));
    let slots: Vec<Arc<Slot>> = (0..6).map(|_| Arc::new(Slot::default())).collect();
    for (i, slot) in slots.iter().enumerate() {
        pool.put((i % 2) as u8, Conn::new(slot.clone(), Duration::from_secs(60)));
    }
    assert_eq!(pool.total_connections(), 6);

    let created = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            let created = created.clone();
            thread::spawn(move || {
                for i in 0..2000usize {
                    let key = ((t + i) % 2) as u8;
                    let conn = match pool.take(&key) {
                        Some(conn) => conn,
                        None => {
                            // the caller creates its own connection on a miss
                            created.fetch_add(1, Ordering::SeqCst);
                            Conn::new(Arc::new(Slot::default()), Duration::from_secs(60))
                        }
                    };
                    conn.acquire();
                    thread::yield_now();
                    conn.release();
                    pool.put(key, conn);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // each bucket holds at most its capacity
    assert!(pool.idle_connections(&0) <= 3);
    assert!(pool.idle_connections(&1) <= 3);
    // nothing is ever destroyed twice
    for slot in &slots {
        assert!(slot.disposals.load(Ordering::SeqCst) <= 1);
    }

    let report = pool.drain();
    assert!(report.is_clean());
    assert_eq!(pool.total_connections(), 0);
    for slot in &slots {
        assert_eq!(slot.disposals.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_idle_clock_expiry_purges_on_take() {
    let conf = PoolConf::from_yaml("capacity_per_key: 5").unwrap();
    let pool: ConnectionPool<&str, Conn> = ConnectionPool::with_conf(&conf);
    let stale = Arc::new(Slot::default());
    let fresh = Arc::new(Slot::default());

    pool.put("rpc://a", Conn::new(stale.clone(), Duration::from_millis(10)));
    thread::sleep(Duration::from_millis(20));
    pool.put("rpc://a", Conn::new(fresh.clone(), Duration::from_secs(60)));

    let conn = pool.take(&"rpc://a").unwrap();
    assert!(Arc::ptr_eq(&conn.slot, &fresh));
    assert!(pool.take(&"rpc://a").is_none());
    assert_eq!(stale.disposals.load(Ordering::SeqCst), 1);
    assert_eq!(fresh.disposals.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_dispose_does_not_stop_teardown() {
    let pool: ConnectionPool<u32, Conn> = ConnectionPool::default();
    let slots: Vec<Arc<Slot>> = (0..4).map(|_| Arc::new(Slot::default())).collect();
    for (i, slot) in slots.iter().enumerate() {
        let mut conn = Conn::new(slot.clone(), Duration::from_secs(60));
        conn.fail_dispose = i % 2 == 0;
        pool.put(i as u32, conn);
    }

    let report = pool.drain();
    assert_eq!(report.disposed, 4);
    assert_eq!(report.failed(), 2);
    for slot in &slots {
        assert_eq!(slot.disposals.load(Ordering::SeqCst), 1);
    }
    let e = report.into_result().unwrap_err();
    assert_eq!(e.root_etype(), &ErrorType::DisposeError);

    // tearing down an empty pool again is fine
    assert!(pool.drain().into_result().is_ok());
}
