// SPDX-License-Identifier: MPL-2.0

use crate::config::{APP_NAME, DEFAULT_MAX_READERS, DEFAULT_READERS, DEFAULT_RETENTION, READER_WAIT};
use crate::faults::{FaultCollector, LogFaults};
use crate::log::{Identity, MessageId};
use crate::store::migrations::{self, Migration};
use crate::store::pool::{ConnectionPool, PoolError, PooledConnection};
use crate::store::schema::TABLES;
use crate::store::{Result, StoreError};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const RECEIVE_CURSOR: &str = "receive_log";
const PRIVATE_CURSOR: &str = "private_log";

#[derive(Clone)]
pub struct StoreConfig {
    /// Age past which non-exempt messages are not ingested; `None` keeps everything
    pub retention: Option<Duration>,
    /// Read-only connections opened up front
    pub readers: usize,
    /// Most read-only connections the pool may grow to
    pub max_readers: usize,
    /// Receives non-fatal ingestion faults
    pub faults: Arc<dyn FaultCollector>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Some(DEFAULT_RETENTION),
            readers: DEFAULT_READERS,
            max_readers: DEFAULT_MAX_READERS,
            faults: Arc::new(LogFaults),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    path: PathBuf,
    viewer: Identity,
    viewer_id: i64,
    migration: Migration,
}

/// Aggregate counts over the view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub messages: i64,
    pub authors: i64,
    pub posts: i64,
    pub reports: i64,
    pub forks: i64,
    pub hidden: i64,
    pub last_received_seq: i64,
}

/// The relational view of the log for one viewer identity.
///
/// One writer connection serializes ingestion and mutation; reads go through
/// a pool of read-only connections.
pub struct ViewStore {
    config: StoreConfig,
    session: RwLock<Option<Session>>,
    writer: Mutex<Option<Connection>>,
    readers: ConnectionPool,
}

impl ViewStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            session: RwLock::new(None),
            writer: Mutex::new(None),
            readers: ConnectionPool::new(config.max_readers.max(config.readers)),
            config,
        }
    }

    /// Open or create the view database at `path` for `viewer`
    pub fn open(&self, path: &Path, viewer: &Identity) -> Result<Migration> {
        let mut writer = self.writer.lock();
        if writer.is_some() {
            return Err(StoreError::AlreadyOpen);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Path(format!("failed to create view dir: {}", e)))?;
        }

        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        let migration = migrations::run(&mut conn)?;
        let viewer_id = intern_author(&conn, viewer)?;

        self.readers.open();
        for _ in 0..self.config.readers {
            self.readers.add(open_reader(path)?)?;
        }

        info!(path = %path.display(), viewer = %viewer, ?migration, "view store opened");

        *writer = Some(conn);
        *self.session.write() = Some(Session {
            path: path.to_path_buf(),
            viewer: viewer.clone(),
            viewer_id,
            migration,
        });
        Ok(migration)
    }

    /// Close the writer and wait for every lent reader to come back
    pub async fn close(&self) -> Result<()> {
        let conn = self.writer.lock().take();
        if conn.is_none() {
            return Err(StoreError::NotOpen);
        }
        self.session.write().take();
        drop(conn);
        self.readers.close().await;
        info!("view store closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Default location: ~/.local/share/hearth/{identity}/view.sqlite
    pub fn default_path(viewer: &Identity) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Path("could not find data directory".to_string()))?;
        Ok(data_dir
            .join(APP_NAME.to_lowercase())
            .join(viewer.sanitized())
            .join("view.sqlite"))
    }

    pub fn viewer(&self) -> Result<Identity> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.viewer.clone())
            .ok_or(StoreError::NotOpen)
    }

    pub(crate) fn viewer_id(&self) -> Result<i64> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.viewer_id)
            .ok_or(StoreError::NotOpen)
    }

    /// Whether opening lost the log cursors (fresh or rebuilt schema)
    pub fn needs_resync(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.migration.needs_resync())
    }

    /// The writer connection; holding it blocks every other writer
    pub(crate) fn writer(&self) -> Result<MappedMutexGuard<'_, Connection>> {
        MutexGuard::try_map(self.writer.lock(), |c| c.as_mut()).map_err(|_| StoreError::NotOpen)
    }

    /// A read-only connection from the pool. The pool grows while below its
    /// ceiling; at the ceiling the caller waits for a connection to return.
    pub(crate) fn reader(&self) -> Result<PooledConnection> {
        loop {
            if let Some(conn) = self.readers.checkout().map_err(pool_error)? {
                return Ok(conn);
            }
            if !self.readers.has_room() {
                return self.readers.checkout_wait(READER_WAIT).map_err(pool_error);
            }
            let path = self
                .session
                .read()
                .as_ref()
                .map(|s| s.path.clone())
                .ok_or(StoreError::NotOpen)?;
            match self.readers.add(open_reader(&path)?) {
                // Another caller filled the last slot first
                Ok(()) | Err(PoolError::Exhausted) => {}
                Err(e) => return Err(pool_error(e)),
            }
        }
    }

    /// Current unix time in milliseconds
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Last ingested receive-log position, -1 before the first batch
    pub fn receive_cursor(&self) -> Result<i64> {
        self.cursor(RECEIVE_CURSOR)
    }

    pub fn set_receive_cursor(&self, value: i64) -> Result<()> {
        self.set_cursor(RECEIVE_CURSOR, value)
    }

    /// Last ingested private-log position, -1 before the first batch
    pub fn private_cursor(&self) -> Result<i64> {
        self.cursor(PRIVATE_CURSOR)
    }

    pub fn set_private_cursor(&self, value: i64) -> Result<()> {
        self.set_cursor(PRIVATE_CURSOR, value)
    }

    fn cursor(&self, name: &str) -> Result<i64> {
        let conn = self.writer()?;
        let value = conn
            .query_row(
                "SELECT value FROM sync_state WHERE name = ?",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(-1))
    }

    fn set_cursor(&self, name: &str, value: i64) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            r#"
            INSERT INTO sync_state (name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = MAX(sync_state.value, excluded.value)
            "#,
            params![name, value],
        )?;
        Ok(())
    }

    /// Highest sequence of `author` in the view, 0 if none
    pub fn latest_sequence(&self, author: &Identity) -> Result<u64> {
        let conn = self.reader()?;
        let seq: Option<i64> = conn.query_row(
            r#"
            SELECT MAX(m.sequence) FROM messages m
            JOIN authors a ON a.id = m.author_id
            WHERE a.author = ?
            "#,
            [author.as_str()],
            |row| row.get(0),
        )?;
        Ok(seq.unwrap_or(0) as u64)
    }

    /// Row count of one schema table
    pub fn row_count(&self, table: &str) -> Result<i64> {
        if !TABLES.contains(&table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        let conn = self.reader()?;
        // Name checked against the schema's own table list above
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let conn = self.reader()?;
        let stats = conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM messages),
                (SELECT COUNT(*) FROM authors),
                (SELECT COUNT(*) FROM posts),
                (SELECT COUNT(*) FROM reports),
                (SELECT COUNT(*) FROM forks),
                (SELECT COUNT(*) FROM messages WHERE hidden = 1),
                COALESCE((SELECT MAX(rx_seq) FROM messages), -1)
            "#,
            [],
            |row| {
                Ok(StoreStatistics {
                    messages: row.get(0)?,
                    authors: row.get(1)?,
                    posts: row.get(2)?,
                    reports: row.get(3)?,
                    forks: row.get(4)?,
                    hidden: row.get(5)?,
                    last_received_seq: row.get(6)?,
                })
            },
        )?;
        Ok(stats)
    }
}

/// Configure SQLite pragmas on the writer.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn pool_error(e: PoolError) -> StoreError {
    match e {
        PoolError::NotOpen => StoreError::NotOpen,
        e => StoreError::Pool(e),
    }
}

/// Interned id of `author`, creating the row on first reference
pub(crate) fn intern_author(conn: &Connection, author: &Identity) -> Result<i64> {
    conn.execute(
        "INSERT INTO authors (author, hashed) VALUES (?1, ?2) ON CONFLICT(author) DO NOTHING",
        params![author.as_str(), author.hashed()],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM authors WHERE author = ?",
        [author.as_str()],
        |row| row.get(0),
    )?)
}

/// Interned id of `key`, creating the row on first reference
pub(crate) fn intern_key(conn: &Connection, key: &MessageId) -> Result<i64> {
    conn.execute(
        "INSERT INTO msgkeys (key, hashed) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
        params![key.as_str(), key.hashed()],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM msgkeys WHERE key = ?",
        [key.as_str()],
        |row| row.get(0),
    )?)
}

pub(crate) fn author_id(conn: &Connection, author: &Identity) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM authors WHERE author = ?",
            [author.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Interned id of an author the view has seen
pub(crate) fn require_author(conn: &Connection, author: &Identity) -> Result<i64> {
    author_id(conn, author)?.ok_or_else(|| StoreError::UnknownAuthor(author.clone()))
}

pub(crate) fn key_id(conn: &Connection, key: &MessageId) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM msgkeys WHERE key = ?",
            [key.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}
