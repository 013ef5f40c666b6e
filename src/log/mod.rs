// SPDX-License-Identifier: MPL-2.0

pub mod content;
pub mod facets;
mod jsonl;
mod memory;
mod source;
mod types;

pub use content::{
    About, Address, Contact, ContactState, Content, ContentType, Decoded, DropContentRequest,
    Mention, MentionKind, Post, Pub, PubAddress, Vote, VoteBody,
};
pub use jsonl::JsonlLog;
pub use memory::{MemoryLog, compose};
pub use source::{LogSource, SourceError};
pub use types::{Identity, Message, MessageId, RawMessage, Thread, hash_identifier};
