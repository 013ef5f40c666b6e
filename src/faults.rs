// SPDX-License-Identifier: MPL-2.0

//! Seam for reporting non-fatal failures to an external collector.

use std::error::Error;

/// Receives failures that must not abort the operation that hit them.
pub trait FaultCollector: Send + Sync {
    fn report(&self, context: &str, error: &dyn Error);
}

/// Default collector: records the fault in the log and moves on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaults;

impl FaultCollector for LogFaults {
    fn report(&self, context: &str, error: &dyn Error) {
        tracing::warn!(context, error = %error, "non-fatal fault");
    }
}
