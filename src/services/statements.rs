//! Statement Store: append-only, idempotent xAPI statement ingestion.
//!
//! Rows are never updated or deleted. `seq` (AUTOINCREMENT) is the logical
//! clock that orders statements; the `stored` timestamp is informational and is
//! clamped so it never precedes the previous row. Voiding is derived on read.

use crate::core::broker::DbBroker;
use crate::core::config::LrsConfig;
use crate::core::db;
use crate::core::error::LrsError;
use crate::core::locks::KeyedLocks;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::services::actors::ActorRegistry;
use crate::xapi::model::{Agent, Statement, canonical_registration};
use crate::xapi::validate::StatementValidator;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredReceipt {
    pub statement_id: String,
    pub actor_id: String,
    pub seq: i64,
    pub stored: String,
}

/// Outcome of [`StatementRepository::append`]. A duplicate is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "receipt", rename_all = "snake_case")]
pub enum Ingested {
    Stored(StoredReceipt),
    Duplicate(StoredReceipt),
}

impl Ingested {
    pub fn receipt(&self) -> &StoredReceipt {
        match self {
            Ingested::Stored(r) | Ingested::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Ingested::Duplicate(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredStatement {
    pub seq: i64,
    pub actor_id: String,
    pub voided: bool,
    pub statement: Statement,
}

pub trait StatementRepository: Send + Sync {
    fn append(&self, statement: Statement) -> Result<Ingested, LrsError>;

    fn get(&self, statement_id: &str) -> Result<StoredStatement, LrsError>;

    /// Statements about `activity_id` for one actor and registration, in `seq` order.
    /// `None` selects statements sent without a registration.
    fn list_for_activity(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<StoredStatement>, LrsError>;

    /// Every statement for one actor and registration, in `seq` order.
    fn list_for_registration(
        &self,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<StoredStatement>, LrsError>;

    /// Up to `limit` statements with `seq > after_seq`, for tailing the store.
    fn list_after(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredStatement>, LrsError>;

    fn count(&self) -> Result<i64, LrsError>;
}

pub fn initialize_statements_db(store: &Store) -> Result<(), LrsError> {
    let conn = db::db_connect(&store.db_path())?;
    db::ensure_meta(&conn)?;
    db::apply_ddl(
        &conn,
        &[
            schemas::STATEMENTS_SCHEMA,
            schemas::STATEMENTS_INDEX_TRIPLE,
            schemas::STATEMENTS_INDEX_VOIDS,
        ],
    )
}

/// SHA-256 of the statement JSON, taken after id and registration are normalised.
pub fn content_hash(statement: &Statement) -> Result<String, LrsError> {
    let canonical = serde_json::to_vec(statement)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

const SELECT_COLUMNS: &str = "SELECT s.seq, s.actor_id, s.body,
        EXISTS(SELECT 1 FROM statements v WHERE v.voids_statement_id = s.id) AS voided
     FROM statements s";

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode(rows: Vec<(i64, String, String, bool)>) -> Result<Vec<StoredStatement>, LrsError> {
    rows.into_iter()
        .map(|(seq, actor_id, body, voided)| {
            Ok(StoredStatement {
                seq,
                actor_id,
                voided,
                statement: serde_json::from_str(&body)?,
            })
        })
        .collect()
}

pub struct SqliteStatementStore {
    broker: DbBroker,
    actors: Arc<dyn ActorRegistry>,
    validator: StatementValidator,
    authority: Agent,
    version: String,
    locks: KeyedLocks,
}

impl SqliteStatementStore {
    pub fn new(store: &Store, actors: Arc<dyn ActorRegistry>) -> Self {
        Self::with_config(store, &store.config, actors)
    }

    pub fn with_config(store: &Store, config: &LrsConfig, actors: Arc<dyn ActorRegistry>) -> Self {
        Self {
            broker: DbBroker::new(store),
            actors,
            validator: StatementValidator::new(config.max_clock_skew_secs),
            authority: Agent::with_account(&config.actor_homepage, "lrs").named("cmi5-lrs"),
            version: config.xapi_version.clone(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn validator(&self) -> &StatementValidator {
        &self.validator
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<StoredStatement>, LrsError> {
        let rows = self.broker.with_read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(args, row_to_stored)?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            Ok(out)
        })?;
        decode(rows)
    }
}

impl StatementRepository for SqliteStatementStore {
    fn append(&self, statement: Statement) -> Result<Ingested, LrsError> {
        let warnings = self
            .validator
            .validate(&statement, time::now())
            .into_result()?;
        for warning in &warnings {
            tracing::warn!(statement_id = ?statement.id, warning = ?warning, "statement accepted with warning");
        }

        let actor_id = self.actors.resolve_agent(&statement.actor)?;
        let statement_id = statement
            .id
            .as_deref()
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_lowercase);
        let mut statement = statement;
        statement.id = Some(statement_id.clone());
        if let Some(context) = statement.context.as_mut() {
            context.registration = context.registration.as_deref().map(canonical_registration);
        }
        let hash = content_hash(&statement)?;

        self.locks.with_lock(&statement_id, || {
            self.broker.with_write(&actor_id, "statements.append", |conn| {
                db::with_immediate_tx(conn, |tx| {
                    let existing: Option<(i64, String, String, String)> = tx
                        .query_row(
                            "SELECT seq, actor_id, stored, content_hash FROM statements WHERE id = ?1",
                            params![statement_id],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                        )
                        .optional()?;
                    if let Some((seq, stored_actor, stored, stored_hash)) = existing {
                        if stored_hash != hash {
                            return Err(LrsError::conflict(format!(
                                "statement '{}' already exists with different content",
                                statement_id
                            )));
                        }
                        tracing::debug!(statement_id = %statement_id, seq, "duplicate statement ignored");
                        return Ok(Ingested::Duplicate(StoredReceipt {
                            statement_id: statement_id.clone(),
                            actor_id: stored_actor,
                            seq,
                            stored,
                        }));
                    }

                    let voids = statement.voided_target().map(str::to_lowercase);
                    if let Some(target) = &voids {
                        let target_voids: Option<Option<String>> = tx
                            .query_row(
                                "SELECT voids_statement_id FROM statements WHERE id = ?1",
                                params![target],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if matches!(target_voids, Some(Some(_))) {
                            return Err(LrsError::validation(format!(
                                "statement '{}' is itself a voiding statement and cannot be voided",
                                target
                            )));
                        }
                    }

                    let last_stored: Option<String> = tx
                        .query_row(
                            "SELECT stored FROM statements ORDER BY seq DESC LIMIT 1",
                            [],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let mut stored_at = time::now();
                    if let Some(prev) = last_stored.as_deref().and_then(time::parse_timestamp) {
                        stored_at = stored_at.max(prev);
                    }
                    let stored = time::to_rfc3339(&stored_at);

                    let mut record = statement.clone();
                    record.id = Some(statement_id.clone());
                    record.timestamp = Some(record.timestamp.take().unwrap_or_else(|| stored.clone()));
                    record.stored = Some(stored.clone());
                    record.authority = Some(self.authority.clone());
                    record.version = Some(self.version.clone());
                    let body = serde_json::to_string(&record)?;

                    tx.execute(
                        "INSERT INTO statements(id, actor_id, verb_id, object_id, registration, voids_statement_id, timestamp, stored, content_hash, body)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            statement_id,
                            actor_id,
                            record.verb.id,
                            record.object.id,
                            record.registration().unwrap_or(""),
                            voids,
                            record.timestamp,
                            stored,
                            hash,
                            body
                        ],
                    )?;
                    let seq = tx.last_insert_rowid();
                    tracing::debug!(statement_id = %statement_id, seq, verb = %record.verb.id, "statement stored");
                    Ok(Ingested::Stored(StoredReceipt {
                        statement_id: statement_id.clone(),
                        actor_id: actor_id.clone(),
                        seq,
                        stored,
                    }))
                })
            })
        })
    }

    fn get(&self, statement_id: &str) -> Result<StoredStatement, LrsError> {
        let sql = format!("{} WHERE s.id = ?1", SELECT_COLUMNS);
        let id = statement_id.to_lowercase();
        self.query(&sql, params![id])?
            .pop()
            .ok_or_else(|| LrsError::not_found(format!("statement '{}'", statement_id)))
    }

    fn list_for_activity(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<StoredStatement>, LrsError> {
        let sql = format!(
            "{} WHERE s.actor_id = ?1 AND s.registration = ?2 AND s.object_id = ?3 ORDER BY s.seq",
            SELECT_COLUMNS
        );
        let registration = registration.map(canonical_registration).unwrap_or_default();
        self.query(&sql, params![actor_id, registration, activity_id])
    }

    fn list_for_registration(
        &self,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<StoredStatement>, LrsError> {
        let sql = format!(
            "{} WHERE s.actor_id = ?1 AND s.registration = ?2 ORDER BY s.seq",
            SELECT_COLUMNS
        );
        let registration = registration.map(canonical_registration).unwrap_or_default();
        self.query(&sql, params![actor_id, registration])
    }

    fn list_after(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredStatement>, LrsError> {
        let sql = format!("{} WHERE s.seq > ?1 ORDER BY s.seq LIMIT ?2", SELECT_COLUMNS);
        let limit = limit as i64;
        self.query(&sql, params![after_seq, limit])
    }

    fn count(&self) -> Result<i64, LrsError> {
        self.broker.with_read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))?)
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "statements",
        "version": "0.1.0",
        "description": "Append-only xAPI statement store with idempotent ingestion",
        "commands": [
            { "name": "statement submit", "parameters": ["--file"] },
            { "name": "statement get", "parameters": ["statement_id"] },
            { "name": "statement list", "parameters": ["--after", "--limit"] },
            { "name": "statement validate", "parameters": ["--file", "--cmi5"] }
        ],
        "ordering": "seq (logical clock)",
        "storage": ["lrs.db#statements"]
    })
}
