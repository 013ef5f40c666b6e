// SPDX-License-Identifier: MPL-2.0

use crate::log::types::{MessageId, RawMessage};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("log source unavailable: {0}")]
    Unavailable(String),
    #[error("log source is read-only")]
    ReadOnly,
    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The replicated log the view is projected from.
///
/// Implementations hand out messages already verified upstream. Sequence
/// arguments are positions in the respective local log, not author sequences,
/// except for `published_log` whose `after` is the local author's sequence.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Messages from every replicated feed, in local receive order
    async fn receive_log(
        &self,
        start_seq: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError>;

    /// The local author's own messages with sequence greater than `after`
    async fn published_log(&self, after: u64) -> Result<Vec<RawMessage>, SourceError>;

    /// Decrypted private messages, in local receive order
    async fn private_log(
        &self,
        start_seq: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError>;

    /// Sign and append content to the local author's feed
    async fn publish(&self, content: serde_json::Value) -> Result<MessageId, SourceError>;
}
