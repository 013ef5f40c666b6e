// SPDX-License-Identifier: MPL-2.0

//! Hearth: a queryable relational view over a replicated, signed message
//! log, with pluggable feed ranking and an index-addressed pager.

pub mod bot;
pub mod config;
pub mod faults;
pub mod feed;
pub mod log;
pub mod pager;
pub mod runtime;
pub mod state;
pub mod store;

pub use bot::{Bot, BotError};
pub use feed::{FeedAlgorithm, FeedStrategy};
pub use log::{Identity, LogSource, Message, MessageId, RawMessage};
pub use pager::{PageSource, Pager};
pub use store::{StoreConfig, StoreError, ViewStore};
