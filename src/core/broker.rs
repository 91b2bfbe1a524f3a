use crate::core::db;
use crate::core::error;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// The DB Broker is the "Thin Waist" for state access.
///
/// Every component reaches SQLite through it. Writes are recorded in an
/// append-only audit log; reads are not. There is deliberately no broker-wide
/// lock: components serialize on their own narrow keys.
#[derive(Debug, Clone)]
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            db_path: store.db_path(),
            audit_log_path: store.config.audit.then(|| store.audit_log_path()),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a read-only closure on a fresh connection.
    pub fn with_read<F, R>(&self, f: F) -> Result<R, error::LrsError>
    where
        F: FnOnce(&Connection) -> Result<R, error::LrsError>,
    {
        let conn = db::db_connect(&self.db_path)?;
        f(&conn)
    }

    /// Execute a mutating closure and record the outcome in the audit log.
    pub fn with_write<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, error::LrsError>
    where
        F: FnOnce(&mut Connection) -> Result<R, error::LrsError>,
    {
        let mut conn = db::db_connect(&self.db_path)?;
        let result = f(&mut conn);

        let status = if result.is_ok() { "success" } else { "error" };
        // `f` has already committed or rolled back by now.
        if let Err(err) = self.log_event(actor, op_name, status) {
            tracing::warn!(op = op_name, error = %err, "audit log append failed");
        }

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), error::LrsError> {
        let Some(path) = &self.audit_log_path else {
            return Ok(());
        };

        let ev = BrokerEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: self
                .db_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            status: status.to_string(),
        };

        let line = serde_json::to_string(&ev)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(error::LrsError::IoError)?;
        writeln!(f, "{}", line).map_err(error::LrsError::IoError)?;
        Ok(())
    }
}

/// Reads the audit log, oldest first. A store without a log has no events.
pub fn read_audit_log(store: &Store) -> Result<Vec<BrokerEvent>, error::LrsError> {
    let path = store.audit_log_path();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let f = fs::File::open(&path).map_err(error::LrsError::IoError)?;
    let mut out = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.map_err(error::LrsError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "State mutation broker (The Thin Waist)",
        "commands": [
            { "name": "audit", "description": "Show the mutation audit log" }
        ],
        "storage": ["broker.events.jsonl"]
    })
}
