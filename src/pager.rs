// SPDX-License-Identifier: MPL-2.0

//! Index-addressed cache in front of a paged source.
//!
//! Callers ask for rows by position. Cached rows come back at once; missing
//! ones are queued by index and delivered to a completion when a background
//! retrieve brings them in. Retrieves are coalesced, run one at a time on
//! the utility lane, and always extend the cache from its current end.

use crate::config::{MIN_PREFETCH_BATCH, PREFETCH_COALESCE};
use crate::runtime::{Lane, Lanes};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Anything with a known size that can hand out a window of rows
pub trait PageSource: Send + Sync + 'static {
    type Item: Clone + Send + 'static;

    fn total(&self) -> usize;

    fn retrieve(&self, limit: usize, offset: usize) -> Result<Vec<Self::Item>, String>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PagerError {
    #[error("page source failed: {0}")]
    Source(String),
    #[error("page source ended before index {index}")]
    Truncated { index: usize },
    #[error("pager stopped before the row arrived")]
    Cancelled,
}

type Completion<T> = Box<dyn FnOnce(Result<T, PagerError>) + Send>;

struct State<T> {
    rows: Vec<T>,
    /// Highest index a caller has asked to have covered
    wanted: Option<usize>,
    in_flight: bool,
    waiters: HashMap<usize, Vec<Completion<T>>>,
}

struct Inner<S: PageSource> {
    source: S,
    total: usize,
    handle: Handle,
    lanes: Lanes,
    state: Mutex<State<S::Item>>,
}

/// Cheap to clone; clones share the cache.
pub struct Pager<S: PageSource> {
    inner: Arc<Inner<S>>,
}

impl<S: PageSource> Clone for Pager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: PageSource> Pager<S> {
    /// Wrap `source`; background retrieves are spawned on `handle` and run
    /// on the utility lane of `lanes`.
    pub fn new(source: S, handle: Handle, lanes: Lanes) -> Self {
        let total = source.total();
        Self {
            inner: Arc::new(Inner {
                source,
                total,
                handle,
                lanes,
                state: Mutex::new(State {
                    rows: Vec::new(),
                    wanted: None,
                    in_flight: false,
                    waiters: HashMap::new(),
                }),
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    pub fn cached_len(&self) -> usize {
        self.inner.state.lock().rows.len()
    }

    /// The row at `index` if cached. Otherwise `None`, and `completion` runs
    /// once the row arrives or its retrieve fails.
    ///
    /// # Panics
    ///
    /// If `index >= total()`.
    pub fn get<F>(&self, index: usize, completion: F) -> Option<S::Item>
    where
        F: FnOnce(Result<S::Item, PagerError>) + Send + 'static,
    {
        self.check(index);
        {
            let mut state = self.inner.state.lock();
            if let Some(row) = state.rows.get(index) {
                return Some(row.clone());
            }
            state
                .waiters
                .entry(index)
                .or_default()
                .push(Box::new(completion));
        }
        self.prefetch_up_to(index);
        None
    }

    /// Make sure a retrieve covering `index` is scheduled.
    ///
    /// # Panics
    ///
    /// If `index >= total()`.
    pub fn prefetch_up_to(&self, index: usize) {
        self.check(index);
        let mut state = self.inner.state.lock();
        if index < state.rows.len() {
            return;
        }
        state.wanted = Some(state.wanted.map_or(index, |w| w.max(index)));
        if state.in_flight {
            // The running retrieve chains another one when it lands short
            return;
        }
        state.in_flight = true;
        drop(state);
        schedule(self.inner.clone());
    }

    /// Wait for the row at `index`
    pub async fn fetch(&self, index: usize) -> Result<S::Item, PagerError> {
        let (tx, rx) = oneshot::channel();
        if let Some(row) = self.get(index, move |result| {
            let _ = tx.send(result);
        }) {
            return Ok(row);
        }
        rx.await.map_err(|_| PagerError::Cancelled)?
    }

    fn check(&self, index: usize) {
        assert!(
            index < self.inner.total,
            "pager index {index} out of range for {} rows",
            self.inner.total
        );
    }
}

fn schedule<S: PageSource>(inner: Arc<Inner<S>>) {
    let handle = inner.handle.clone();
    handle.spawn(async move {
        tokio::time::sleep(PREFETCH_COALESCE).await;

        let (offset, limit) = {
            let state = inner.state.lock();
            let offset = state.rows.len();
            let needed = state
                .wanted
                .map_or(0, |w| (w + 1).saturating_sub(offset));
            let limit = needed
                .max(MIN_PREFETCH_BATCH)
                .min(inner.total.saturating_sub(offset));
            (offset, limit)
        };

        let worker = inner.clone();
        let result = inner
            .lanes
            .run(Lane::Utility, move || worker.source.retrieve(limit, offset))
            .await
            .unwrap_or_else(|e| Err(e.to_string()));
        complete(&inner, limit, result);
    });
}

fn complete<S: PageSource>(
    inner: &Arc<Inner<S>>,
    limit: usize,
    result: Result<Vec<S::Item>, String>,
) {
    let mut ready: Vec<(Completion<S::Item>, Result<S::Item, PagerError>)> = Vec::new();
    let again = {
        let mut state = inner.state.lock();
        state.in_flight = false;

        match result {
            Ok(rows) => {
                let short = rows.len() < limit;
                state.rows.extend(rows);
                let cached = state.rows.len();
                debug!(cached, total = inner.total, "pager extended");

                let arrived: Vec<usize> = state
                    .waiters
                    .keys()
                    .copied()
                    .filter(|&i| i < cached)
                    .collect();
                for index in arrived {
                    let row = state.rows[index].clone();
                    for waiter in state.waiters.remove(&index).unwrap_or_default() {
                        ready.push((waiter, Ok(row.clone())));
                    }
                }

                if short {
                    warn!(cached, total = inner.total, "page source ended early");
                    for (index, waiters) in state.waiters.drain() {
                        for waiter in waiters {
                            ready.push((waiter, Err(PagerError::Truncated { index })));
                        }
                    }
                }

                let again = !short && state.wanted.is_some_and(|w| w >= cached);
                if again {
                    state.in_flight = true;
                } else {
                    state.wanted = None;
                }
                again
            }
            Err(e) => {
                warn!(error = %e, "page retrieve failed");
                for (_, waiters) in state.waiters.drain() {
                    for waiter in waiters {
                        ready.push((waiter, Err(PagerError::Source(e.clone()))));
                    }
                }
                state.wanted = None;
                false
            }
        }
    };

    for (waiter, result) in ready {
        waiter(result);
    }
    if again {
        schedule(inner.clone());
    }
}
