// SPDX-License-Identifier: MPL-2.0

//! Bounded set of reusable read connections.
//!
//! A checked-out connection is lent as a [`PooledConnection`] guard; dropping
//! the guard, on any path, returns the connection. `close` waits until every
//! lent connection has come back.

use crate::config::POOL_CLOSE_POLL;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool is not open")]
    NotOpen,
    #[error("every pooled connection is in use")]
    Exhausted,
}

struct PoolState {
    open: bool,
    idle: Vec<Connection>,
    lent: usize,
    capacity: usize,
}

impl PoolState {
    fn size(&self) -> usize {
        self.idle.len() + self.lent
    }
}

struct Shared {
    state: Mutex<PoolState>,
    returned: Condvar,
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// A pool holding at most `capacity` connections, idle and lent together
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    open: false,
                    idle: Vec::new(),
                    lent: 0,
                    capacity: capacity.max(1),
                }),
                returned: Condvar::new(),
            }),
        }
    }

    /// Mark the pool ready for `add` and `checkout`
    pub fn open(&self) {
        self.shared.state.lock().open = true;
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Whether `add` would accept another connection
    pub fn has_room(&self) -> bool {
        let state = self.shared.state.lock();
        state.size() < state.capacity
    }

    /// Register a new connection as idle; fails with `Exhausted` at capacity
    pub fn add(&self, conn: Connection) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(PoolError::NotOpen);
        }
        if state.size() >= state.capacity {
            return Err(PoolError::Exhausted);
        }
        state.idle.push(conn);
        drop(state);
        self.shared.returned.notify_one();
        Ok(())
    }

    /// Lend an idle connection, or `None` when all are lent
    pub fn checkout(&self) -> Result<Option<PooledConnection>, PoolError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(PoolError::NotOpen);
        }
        Ok(self.lend(&mut state))
    }

    /// Like `checkout`, but waits up to `timeout` for a connection to come
    /// back before failing with `Exhausted`.
    pub fn checkout_wait(&self, timeout: Duration) -> Result<PooledConnection, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        let mut timed_out = false;
        loop {
            if !state.open {
                return Err(PoolError::NotOpen);
            }
            if let Some(conn) = self.lend(&mut state) {
                return Ok(conn);
            }
            if timed_out {
                return Err(PoolError::Exhausted);
            }
            timed_out = self
                .shared
                .returned
                .wait_until(&mut state, deadline)
                .timed_out();
        }
    }

    fn lend(&self, state: &mut PoolState) -> Option<PooledConnection> {
        let conn = state.idle.pop()?;
        state.lent += 1;
        Some(PooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
        })
    }

    /// (idle, lent)
    pub fn counts(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.idle.len(), state.lent)
    }

    /// Stop lending, wait for every lent connection to return, then drop them all.
    pub async fn close(&self) {
        self.shared.state.lock().open = false;
        self.shared.returned.notify_all();

        loop {
            let lent = self.shared.state.lock().lent;
            if lent == 0 {
                break;
            }
            tokio::time::sleep(POOL_CLOSE_POLL).await;
        }

        let idle = std::mem::take(&mut self.shared.state.lock().idle);
        tracing::debug!(closed = idle.len(), "connection pool closed");
    }
}

/// A lent connection; returns to its pool when dropped.
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<Shared>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in Drop
        self.conn.as_ref().expect("pooled connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.lent = state.lent.saturating_sub(1);
        if let Some(conn) = self.conn.take() {
            // A closing pool lets returned connections drop here
            if state.open {
                state.idle.push(conn);
            }
        }
        drop(state);
        self.shared.returned.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().expect("open")
    }

    #[test]
    fn test_not_open() {
        let pool = ConnectionPool::new(4);
        assert_eq!(pool.add(memory_conn()).err(), Some(PoolError::NotOpen));
        assert!(matches!(pool.checkout(), Err(PoolError::NotOpen)));
    }

    #[test]
    fn test_checkout_returns_none_when_exhausted() {
        let pool = ConnectionPool::new(4);
        pool.open();
        pool.add(memory_conn()).expect("add");

        let first = pool.checkout().expect("checkout");
        assert!(first.is_some());
        assert!(pool.checkout().expect("checkout").is_none());

        drop(first);
        assert_eq!(pool.counts(), (1, 0));
        assert!(pool.checkout().expect("checkout").is_some());
    }

    #[test]
    fn test_guard_returns_on_error_path() {
        let pool = ConnectionPool::new(4);
        pool.open();
        pool.add(memory_conn()).expect("add");

        let result: Result<i64, rusqlite::Error> = (|| {
            let conn = pool.checkout().expect("checkout").expect("idle");
            conn.query_row("SELECT * FROM missing_table", [], |row| row.get(0))
        })();

        assert!(result.is_err());
        assert_eq!(pool.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_close_waits_for_lent_connections() {
        let pool = ConnectionPool::new(4);
        pool.open();
        pool.add(memory_conn()).expect("add");
        let lent = pool.checkout().expect("checkout").expect("idle");

        let closer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.close().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!closer.is_finished());

        drop(lent);
        closer.await.expect("close");
        assert_eq!(pool.counts(), (0, 0));
        assert!(!pool.is_open());
    }

    #[test]
    fn test_capacity_bounds_idle_and_lent() {
        let pool = ConnectionPool::new(2);
        pool.open();
        pool.add(memory_conn()).expect("add");
        let lent = pool.checkout().expect("checkout").expect("idle");
        pool.add(memory_conn()).expect("add");
        assert!(!pool.has_room());
        assert_eq!(pool.add(memory_conn()).err(), Some(PoolError::Exhausted));

        let _second = pool.checkout().expect("checkout").expect("idle");
        assert!(matches!(
            pool.checkout_wait(Duration::from_millis(20)),
            Err(PoolError::Exhausted)
        ));

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.checkout_wait(Duration::from_secs(5)).is_ok())
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(lent);
        assert!(waiter.join().expect("thread"));
        assert_eq!(pool.counts(), (1, 1));
    }

    #[test]
    fn test_concurrent_checkout_never_double_lends() {
        let pool = ConnectionPool::new(4);
        pool.open();
        for _ in 0..3 {
            pool.add(memory_conn()).expect("add");
        }

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(conn) = pool.checkout().expect("checkout") {
                            let (_, lent) = pool.counts();
                            assert!(lent <= 3);
                            let one: i64 = conn
                                .query_row("SELECT 1", [], |row| row.get(0))
                                .expect("query");
                            assert_eq!(one, 1);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("thread");
        }
        assert_eq!(pool.counts(), (3, 0));
    }
}
