// SPDX-License-Identifier: MPL-2.0

//! Shared async runtime and the worker lanes operations are scheduled on.
//!
//! Store work is blocking SQLite I/O, so every lane runs its closure on the
//! blocking pool. Lanes only differ in how many closures may run at once:
//! - `User`: operations a caller is actively waiting on (publish, explicit fetch)
//! - `Utility`: background sync and prefetch, one at a time
//! - `Serial`: statistics, strictly one at a time

use crate::config::USER_LANE_WIDTH;
use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;

/// Shared multi-threaded Tokio runtime for the command-line driver.
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("hearth-async")
        .build()
        .expect("failed to create async runtime")
});

/// Execute a future on the shared runtime, blocking until completion.
pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

/// Get a handle to the shared runtime.
pub fn handle() -> tokio::runtime::Handle {
    RUNTIME.handle().clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    User,
    Utility,
    Serial,
}

#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    #[error("lane closed")]
    Closed,
    #[error("lane task failed: {0}")]
    Join(String),
}

/// Permits for the three lanes.
#[derive(Clone)]
pub struct Lanes {
    user: Arc<Semaphore>,
    utility: Arc<Semaphore>,
    serial: Arc<Semaphore>,
}

impl Lanes {
    pub fn new() -> Self {
        Self {
            user: Arc::new(Semaphore::new(USER_LANE_WIDTH)),
            utility: Arc::new(Semaphore::new(1)),
            serial: Arc::new(Semaphore::new(1)),
        }
    }

    fn semaphore(&self, lane: Lane) -> Arc<Semaphore> {
        match lane {
            Lane::User => self.user.clone(),
            Lane::Utility => self.utility.clone(),
            Lane::Serial => self.serial.clone(),
        }
    }

    /// Run a blocking closure on the given lane.
    ///
    /// The permit travels with the closure, so dropping the returned future
    /// (a timeout, for instance) neither cancels the work nor frees the lane
    /// before the work is done.
    pub async fn run<F, T>(&self, lane: Lane, f: F) -> Result<T, LaneError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore(lane)
            .acquire_owned()
            .await
            .map_err(|_| LaneError::Closed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| LaneError::Join(e.to_string()))
    }
}

impl Default for Lanes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_serial_lane_runs_one_at_a_time() {
        let lanes = Lanes::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lanes = lanes.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                lanes
                    .run(Lane::Serial, move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("lane");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_user_lane_returns_value() {
        let lanes = Lanes::new();
        let value = lanes.run(Lane::User, || 40 + 2).await.expect("lane");
        assert_eq!(value, 42);
    }
}
