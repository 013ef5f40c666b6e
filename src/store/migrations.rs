// SPDX-License-Identifier: MPL-2.0

//! Schema versioning.
//!
//! The version lives in `PRAGMA user_version`. A view is a cache of the log,
//! so versions too old to migrate are dropped and rebuilt, and the caller
//! resyncs from the start of the log.

use crate::store::schema::{MIN_MIGRATABLE_VERSION, SCHEMA, SCHEMA_VERSION};
use crate::store::{Result, StoreError};
use rusqlite::Connection;
use tracing::info;

/// What opening the database did to the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    Current,
    Created,
    Migrated { from: u32 },
    Rebuilt { from: u32 },
}

impl Migration {
    /// Whether log cursors were lost and the view must be refilled from scratch
    pub fn needs_resync(self) -> bool {
        matches!(self, Migration::Created | Migration::Rebuilt { .. })
    }
}

pub fn version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema to `SCHEMA_VERSION`.
pub fn run(conn: &mut Connection) -> Result<Migration> {
    let current = version(conn)?;

    if current == SCHEMA_VERSION {
        return Ok(Migration::Current);
    }

    if current > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    if current == 0 {
        info!("initializing view schema v{SCHEMA_VERSION}");
        create(conn)?;
        return Ok(Migration::Created);
    }

    if current < MIN_MIGRATABLE_VERSION {
        info!(from = current, "view schema too old to migrate, rebuilding");
        drop_all(conn)?;
        create(conn)?;
        return Ok(Migration::Rebuilt { from: current });
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        info!("running view migration to v{version}");
        let tx = conn.transaction()?;
        run_migration(&tx, version)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(Migration::Migrated { from: current })
}

fn create(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        // v3: messagekeys renamed to msgkeys, fork tracking added
        3 => {
            if table_exists(conn, "messagekeys")? {
                conn.execute_batch("ALTER TABLE messagekeys RENAME TO msgkeys;")?;
            }
            conn.execute_batch(SCHEMA)?;
            Ok(())
        }
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Drop every table, virtual tables first so their shadow tables go with them.
fn drop_all(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        ORDER BY CASE WHEN sql LIKE 'CREATE VIRTUAL TABLE%' THEN 0 ELSE 1 END
        "#,
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    for name in &names {
        let quoted = name.replace('"', "\"\"");
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{quoted}\";"))?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}
