// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

pub const APP_ID: &str = "io.github.sethcottle.Hearth";
pub const APP_NAME: &str = "Hearth";

#[cfg(feature = "devel")]
pub const IS_DEVEL: bool = true;
#[cfg(not(feature = "devel"))]
pub const IS_DEVEL: bool = false;

/// Messages older than this are dropped at ingestion unless they are follows,
/// abouts, or the viewer's own.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(180 * 24 * 60 * 60);

/// Read-only connections opened alongside the writer
pub const DEFAULT_READERS: usize = 4;

/// Ceiling on read-only connections when every one is busy
pub const DEFAULT_MAX_READERS: usize = 16;

/// How long a read waits for a connection once the pool is at its ceiling
pub const READER_WAIT: Duration = Duration::from_secs(5);

/// Smallest number of rows the pager asks for at once
pub const MIN_PREFETCH_BATCH: usize = 25;

/// Prefetch requests arriving within this window collapse into one retrieve
pub const PREFETCH_COALESCE: Duration = Duration::from_millis(50);

/// A statistics call taking longer than this is reported as stuck
pub const STATS_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between checks while closing the connection pool
pub const POOL_CLOSE_POLL: Duration = Duration::from_millis(10);

/// Concurrent user-initiated operations
pub const USER_LANE_WIDTH: usize = 4;

/// Receive-log rows pulled per refresh, by load
pub const REFRESH_BATCH_SHORT: usize = 100;
pub const REFRESH_BATCH_MEDIUM: usize = 1_000;
pub const REFRESH_BATCH_LONG: usize = 10_000;
