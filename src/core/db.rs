use crate::core::error;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

/// Busy timeout for both read and write connections.
const BUSY_TIMEOUT_SECS: u64 = 10;

/// Opens a fresh connection. Connections are not pooled: WAL lets readers run
/// concurrently and SQLite serializes writers with the busy timeout.
pub fn db_connect(db_path: &Path) -> Result<Connection, error::LrsError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS))
        .map_err(error::LrsError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::LrsError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::LrsError::RusqliteError)?;
    Ok(conn)
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction, committing on `Ok`.
///
/// Immediate mode takes the write lock up front so read-then-write sequences
/// (version checks, duplicate checks) cannot interleave with another writer.
pub fn with_immediate_tx<F, R>(conn: &mut Connection, f: F) -> Result<R, error::LrsError>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R, error::LrsError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

pub fn ensure_meta(conn: &Connection) -> Result<(), error::LrsError> {
    conn.execute(schemas::META_SCHEMA, [])?;
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match current {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                [schemas::SCHEMA_VERSION],
            )?;
        }
        Some(v) if v != schemas::SCHEMA_VERSION => {
            return Err(error::LrsError::DatabaseInitializationError(format!(
                "store schema version {} is not supported (expected {})",
                v,
                schemas::SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

/// Executes each DDL statement in order.
pub fn apply_ddl(conn: &Connection, ddl: &[&str]) -> Result<(), error::LrsError> {
    for stmt in ddl {
        conn.execute(stmt, [])?;
    }
    Ok(())
}
