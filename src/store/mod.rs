// SPDX-License-Identifier: MPL-2.0

mod bans;
mod db;
mod graph;
mod ingest;
mod messages;
pub mod migrations;
pub mod pool;
mod reports;
pub mod schema;

pub use bans::BanOutcome;
pub use db::{StoreConfig, StoreStatistics, ViewStore};
pub use graph::{AboutInfo, ForkRecord, PubInfo};
pub use ingest::FillReport;
pub(crate) use messages::{MESSAGE_COLUMNS, MESSAGE_JOINS, row_to_message};
pub use migrations::Migration;
pub use pool::{ConnectionPool, PoolError, PooledConnection};
pub use reports::{Report, ReportKind};

use crate::log::{Identity, MessageId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("view store is not open")]
    NotOpen,
    #[error("view store is already open")]
    AlreadyOpen,
    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),
    #[error("unknown author: {0}")]
    UnknownAuthor(Identity),
    #[error("unknown reference id: {0}")]
    UnknownReferenceId(i64),
    #[error("unknown hashtag: {0}")]
    UnknownHashtag(String),
    #[error("unexpected content type: expected {expected}, found {found}")]
    UnexpectedContentType { expected: String, found: String },
    #[error("unhandled content type: {0}")]
    UnhandledContentType(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("message constraint violation: {author} already has sequence {sequence}")]
    MessageConstraintViolation { author: Identity, sequence: u64 },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("database path error: {0}")]
    Path(String),
    #[error("migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// True for SQLite UNIQUE/PRIMARY KEY violations
pub(crate) fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
