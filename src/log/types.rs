// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 of an identifier, the form ban lists use.
pub fn hash_identifier(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Globally unique key of a log message (`%...sha256`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.starts_with('%') && self.0.len() > 1
    }

    pub fn hashed(&self) -> String {
        hash_identifier(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Public key of a feed author (`@...ed25519`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.starts_with('@') && self.0.len() > 1
    }

    pub fn hashed(&self) -> String {
        hash_identifier(&self.0)
    }

    /// Filesystem-safe form, used for per-identity data directories
    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message as the log source hands it over: signed, verified upstream,
/// content still untyped JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: MessageId,
    pub author: Identity,
    pub sequence: u64,
    pub content: serde_json::Value,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub previous: Option<MessageId>,
    #[serde(default)]
    pub signature: String,
    /// Author-claimed creation time, milliseconds since the epoch
    #[serde(rename = "timestamp")]
    pub claimed_timestamp: f64,
    /// Local receive time, milliseconds since the epoch
    #[serde(default)]
    pub received_timestamp: Option<f64>,
    /// Position in the local receive log, if it came from there
    #[serde(default)]
    pub receive_seq: Option<i64>,
}

/// A stored message as the view store returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub key: MessageId,
    pub author: Identity,
    pub sequence: u64,
    pub content_type: String,
    pub content: serde_json::Value,
    /// Milliseconds since the epoch, never later than `received_at`
    pub claimed_at: i64,
    pub received_at: i64,
    pub hidden: bool,
    pub decrypted: bool,
    /// Self-declared display name of the author, if any
    pub author_name: Option<String>,
    /// Self-declared avatar blob of the author, if any
    pub author_image: Option<String>,
}

impl Message {
    pub fn claimed_time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.claimed_at).unwrap_or_default()
    }

    /// Text of a post, if this is one
    pub fn text(&self) -> Option<&str> {
        if self.content_type != "post" {
            return None;
        }
        self.content.get("text").and_then(|t| t.as_str())
    }
}

/// Reply thread: messages addressed by position, root at index 0.
///
/// `branches[i]` lists the positions message `i` replies to directly. A
/// branch that points outside the thread (not ingested, hidden) is dropped.
#[derive(Debug, Clone)]
pub struct Thread {
    pub messages: Vec<Message>,
    pub branches: Vec<Vec<usize>>,
}

impl Thread {
    pub fn root(&self) -> &Message {
        &self.messages[0]
    }

    pub fn replies(&self) -> &[Message] {
        &self.messages[1..]
    }

    /// Positions of messages that reply directly to `index`. Messages with
    /// no resolvable branch count as direct replies to the root.
    pub fn children(&self, index: usize) -> Vec<usize> {
        (1..self.messages.len())
            .filter(|&i| {
                let parents = &self.branches[i];
                parents.contains(&index) || (index == 0 && parents.is_empty())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_identifier_is_hex_sha256() {
        let hashed = hash_identifier("abc");
        assert_eq!(
            hashed,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sanitized_identity() {
        let id = Identity::new("@abc+/=.ed25519");
        assert_eq!(id.sanitized(), "_abc____ed25519");
    }

    #[test]
    fn test_raw_message_decodes_timestamp_field() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "key": "%k.sha256",
            "author": "@a.ed25519",
            "sequence": 3,
            "content": { "type": "post", "text": "hi" },
            "timestamp": 1700000000000.5
        }))
        .expect("decode");
        assert_eq!(raw.sequence, 3);
        assert_eq!(raw.claimed_timestamp as i64, 1700000000000);
        assert!(raw.receive_seq.is_none());
    }
}
