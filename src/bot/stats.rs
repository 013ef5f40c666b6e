// SPDX-License-Identifier: MPL-2.0

use crate::store::{FillReport, StoreStatistics};
use std::fmt;
use std::time::Duration;

/// Snapshot taken on the serial lane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotStatistics {
    pub store: StoreStatistics,
    /// Messages published since login
    pub published: u64,
    pub receive_cursor: i64,
    pub private_cursor: i64,
}

impl fmt::Display for BotStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "messages:       {}", self.store.messages)?;
        writeln!(f, "authors:        {}", self.store.authors)?;
        writeln!(f, "posts:          {}", self.store.posts)?;
        writeln!(f, "reports:        {}", self.store.reports)?;
        writeln!(f, "forks:          {}", self.store.forks)?;
        writeln!(f, "hidden:         {}", self.store.hidden)?;
        writeln!(f, "published:      {}", self.published)?;
        writeln!(f, "receive cursor: {}", self.receive_cursor)?;
        write!(f, "private cursor: {}", self.private_cursor)
    }
}

/// How much of the log one refresh pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshLoad {
    Short,
    #[default]
    Medium,
    Long,
}

impl RefreshLoad {
    pub fn batch_size(self) -> usize {
        use crate::config::{REFRESH_BATCH_LONG, REFRESH_BATCH_MEDIUM, REFRESH_BATCH_SHORT};
        match self {
            RefreshLoad::Short => REFRESH_BATCH_SHORT,
            RefreshLoad::Medium => REFRESH_BATCH_MEDIUM,
            RefreshLoad::Long => REFRESH_BATCH_LONG,
        }
    }
}

/// Outcome of one refresh
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub received: FillReport,
    pub private: FillReport,
    /// Rows the receive log handed over
    pub received_rows: usize,
    /// Rows the private log handed over
    pub private_rows: usize,
    pub batch_size: usize,
    pub elapsed: Duration,
}

impl RefreshReport {
    /// Neither log had a full batch left, so another refresh would find
    /// nothing new right now.
    pub fn caught_up(&self) -> bool {
        self.received_rows < self.batch_size && self.private_rows < self.batch_size
    }
}
