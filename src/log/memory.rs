// SPDX-License-Identifier: MPL-2.0

//! In-process log source.
//!
//! Holds the receive, private and published logs in memory. Publishing
//! appends to the local author's feed and to the receive log, the way a
//! replication engine echoes its own writes.

use crate::log::source::{LogSource, SourceError};
use crate::log::types::{Identity, MessageId, RawMessage};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Build a message with a key derived from its fields.
///
/// No signature is produced; verification happens upstream of the view.
pub fn compose(
    author: &Identity,
    sequence: u64,
    previous: Option<MessageId>,
    content: serde_json::Value,
    timestamp_ms: i64,
) -> RawMessage {
    let mut hasher = Sha256::new();
    hasher.update(author.as_str().as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(content.to_string().as_bytes());
    hasher.update(timestamp_ms.to_be_bytes());
    let key = MessageId(format!("%{}.sha256", STANDARD.encode(hasher.finalize())));

    RawMessage {
        key,
        author: author.clone(),
        sequence,
        content,
        hash: "sha256".to_string(),
        previous,
        signature: String::new(),
        claimed_timestamp: timestamp_ms as f64,
        received_timestamp: Some(timestamp_ms as f64),
        receive_seq: None,
    }
}

#[derive(Default)]
struct Logs {
    received: Vec<RawMessage>,
    private: Vec<RawMessage>,
    published: Vec<RawMessage>,
}

pub struct MemoryLog {
    local: Identity,
    logs: Mutex<Logs>,
}

impl MemoryLog {
    pub fn new(local: Identity) -> Self {
        Self {
            local,
            logs: Mutex::new(Logs::default()),
        }
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// Append a replicated message to the receive log, stamping its position
    pub fn push(&self, mut message: RawMessage) -> i64 {
        let mut logs = self.logs.lock();
        let seq = logs.received.len() as i64;
        message.receive_seq = Some(seq);
        logs.received.push(message);
        seq
    }

    /// Append a decrypted message to the private log
    pub fn push_private(&self, mut message: RawMessage) -> i64 {
        let mut logs = self.logs.lock();
        let seq = logs.private.len() as i64;
        message.receive_seq = Some(seq);
        logs.private.push(message);
        seq
    }

    pub fn received_len(&self) -> usize {
        self.logs.lock().received.len()
    }
}

fn window(log: &[RawMessage], start_seq: i64, limit: usize) -> Vec<RawMessage> {
    let start = start_seq.max(0) as usize;
    log.iter().skip(start).take(limit).cloned().collect()
}

#[async_trait]
impl LogSource for MemoryLog {
    async fn receive_log(
        &self,
        start_seq: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        Ok(window(&self.logs.lock().received, start_seq, limit))
    }

    async fn published_log(&self, after: u64) -> Result<Vec<RawMessage>, SourceError> {
        Ok(self
            .logs
            .lock()
            .published
            .iter()
            .filter(|m| m.sequence > after)
            .cloned()
            .collect())
    }

    async fn private_log(
        &self,
        start_seq: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        Ok(window(&self.logs.lock().private, start_seq, limit))
    }

    async fn publish(&self, content: serde_json::Value) -> Result<MessageId, SourceError> {
        let mut logs = self.logs.lock();
        let previous = logs.published.last().map(|m| m.key.clone());
        let sequence = logs.published.len() as u64 + 1;
        let now = chrono::Utc::now().timestamp_millis();

        let message = compose(&self.local, sequence, previous, content, now);
        let key = message.key.clone();

        let mut received = message.clone();
        received.receive_seq = Some(logs.received.len() as i64);
        logs.received.push(received);
        logs.published.push(message);

        Ok(key)
    }
}
