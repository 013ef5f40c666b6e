// SPDX-License-Identifier: MPL-2.0

//! Read-only log source backed by a newline-delimited JSON export.

use crate::log::memory::MemoryLog;
use crate::log::source::{LogSource, SourceError};
use crate::log::types::{Identity, MessageId, RawMessage};
use async_trait::async_trait;
use std::io::BufRead;
use std::path::Path;
use tracing::{info, warn};

pub struct JsonlLog {
    inner: MemoryLog,
}

impl JsonlLog {
    /// Load every decodable line of `path` into the receive log.
    ///
    /// Lines that do not decode as a message are skipped and counted.
    pub fn open(path: &Path, local: Identity) -> Result<Self, SourceError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file), local)
    }

    pub fn from_reader<R: BufRead>(reader: R, local: Identity) -> Result<Self, SourceError> {
        let inner = MemoryLog::new(local);
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawMessage>(&line) {
                Ok(message) => {
                    inner.push(message);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "skipping undecodable log line");
                }
            }
        }

        info!(loaded = inner.received_len(), skipped, "loaded jsonl log");
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.received_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogSource for JsonlLog {
    async fn receive_log(
        &self,
        start_seq: i64,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        self.inner.receive_log(start_seq, limit).await
    }

    async fn published_log(&self, after: u64) -> Result<Vec<RawMessage>, SourceError> {
        let local = self.inner.local().clone();
        let mut own = Vec::new();
        let mut start = 0;
        loop {
            let page = self.inner.receive_log(start, 500).await?;
            if page.is_empty() {
                break;
            }
            start += page.len() as i64;
            own.extend(
                page.into_iter()
                    .filter(|m| m.author == local && m.sequence > after),
            );
        }
        Ok(own)
    }

    async fn private_log(
        &self,
        _start_seq: i64,
        _limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        Ok(Vec::new())
    }

    async fn publish(&self, _content: serde_json::Value) -> Result<MessageId, SourceError> {
        Err(SourceError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loads_lines_and_skips_garbage() {
        let data = concat!(
            r#"{"key":"%a.sha256","author":"@x.ed25519","sequence":1,"content":{"type":"post","text":"hi"},"timestamp":1}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"key":"%b.sha256","author":"@me.ed25519","sequence":1,"content":{"type":"post","text":"mine"},"timestamp":2}"#,
            "\n",
        );
        let log = JsonlLog::from_reader(data.as_bytes(), Identity::new("@me.ed25519"))
            .expect("load");
        assert_eq!(log.len(), 2);

        let own = log.published_log(0).await.expect("published");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].key.as_str(), "%b.sha256");

        let err = log.publish(serde_json::json!({})).await;
        assert!(matches!(err, Err(SourceError::ReadOnly)));
    }
}
