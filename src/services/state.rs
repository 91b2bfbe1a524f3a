//! Activity State Store: versioned resumption documents.
//!
//! Documents are keyed by (activity, actor, registration, state id). Every write
//! bumps the version; a write carrying `expected_version` is a compare-and-set
//! and fails with a conflict on mismatch. Omitting it is an explicit
//! last-write-wins overwrite.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::LrsError;
use crate::core::locks::KeyedLocks;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::xapi::model::canonical_registration;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StateKey {
    pub activity_id: String,
    pub actor_id: String,
    pub registration: Option<String>,
    pub state_id: String,
}

impl StateKey {
    pub fn new(activity_id: &str, actor_id: &str, registration: Option<&str>, state_id: &str) -> Self {
        Self {
            activity_id: activity_id.to_string(),
            actor_id: actor_id.to_string(),
            registration: registration.map(canonical_registration),
            state_id: state_id.to_string(),
        }
    }

    fn registration_column(&self) -> &str {
        self.registration.as_deref().unwrap_or("")
    }

    fn lock_key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.activity_id,
            self.actor_id,
            self.registration_column(),
            self.state_id
        )
    }

    fn check(&self) -> Result<(), LrsError> {
        if self.activity_id.trim().is_empty() || self.state_id.trim().is_empty() {
            return Err(LrsError::validation(
                "state key requires an activity id and a state id",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateDocument {
    pub key: StateKey,
    pub content_type: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub version: i64,
    pub etag: String,
    pub created_at: String,
    pub updated_at: String,
}

impl StateDocument {
    pub fn payload_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

pub trait StateRepository: Send + Sync {
    /// Writes `payload` and returns the new version.
    /// `expected_version` of `Some(0)` means "must not exist yet".
    fn put_state(
        &self,
        key: &StateKey,
        payload: &[u8],
        content_type: &str,
        expected_version: Option<i64>,
    ) -> Result<i64, LrsError>;

    fn get_state(&self, key: &StateKey) -> Result<StateDocument, LrsError>;

    /// Removes the document; `Ok(false)` when it did not exist.
    fn delete_state(&self, key: &StateKey, expected_version: Option<i64>) -> Result<bool, LrsError>;

    fn list_state_ids(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<String>, LrsError>;

    /// Clears every document for an activity attempt. Returns the number removed.
    fn delete_all_states(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<usize, LrsError>;
}

pub fn initialize_state_db(store: &Store) -> Result<(), LrsError> {
    let conn = db::db_connect(&store.db_path())?;
    db::ensure_meta(&conn)?;
    db::apply_ddl(&conn, &[schemas::ACTIVITY_STATE_SCHEMA])
}

fn etag(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

pub struct SqliteStateStore {
    broker: DbBroker,
    locks: KeyedLocks,
}

impl SqliteStateStore {
    pub fn new(store: &Store) -> Self {
        Self {
            broker: DbBroker::new(store),
            locks: KeyedLocks::new(),
        }
    }

    /// Highest version ever written for the key and whether the document is live.
    /// Deleted documents keep their row so a later write continues the numbering.
    fn current_version(tx: &rusqlite::Connection, key: &StateKey) -> Result<Option<(i64, bool)>, LrsError> {
        Ok(tx
            .query_row(
                "SELECT version, deleted FROM activity_state
                 WHERE activity_id = ?1 AND actor_id = ?2 AND registration = ?3 AND state_id = ?4",
                params![
                    key.activity_id,
                    key.actor_id,
                    key.registration_column(),
                    key.state_id
                ],
                |row| Ok((row.get(0)?, !row.get::<_, bool>(1)?)),
            )
            .optional()?)
    }
}

fn live_version(row: Option<(i64, bool)>) -> Option<i64> {
    row.and_then(|(version, live)| live.then_some(version))
}

fn check_expected(key: &StateKey, current: Option<i64>, expected: Option<i64>) -> Result<(), LrsError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = current.unwrap_or(0);
    if actual != expected {
        return Err(LrsError::conflict(format!(
            "state '{}' for activity '{}' is at version {}, expected {}",
            key.state_id, key.activity_id, actual, expected
        )));
    }
    Ok(())
}

impl StateRepository for SqliteStateStore {
    fn put_state(
        &self,
        key: &StateKey,
        payload: &[u8],
        content_type: &str,
        expected_version: Option<i64>,
    ) -> Result<i64, LrsError> {
        key.check()?;
        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        let tag = etag(payload);

        self.locks.with_lock(&key.lock_key(), || {
            self.broker.with_write(&key.actor_id, "state.put", |conn| {
                db::with_immediate_tx(conn, |tx| {
                    let row = Self::current_version(tx, key)?;
                    check_expected(key, live_version(row), expected_version)?;
                    let now = time::now_rfc3339();
                    let next = row.map_or(0, |(version, _)| version) + 1;
                    tx.execute(
                        "INSERT INTO activity_state(activity_id, actor_id, registration, state_id, content_type, payload, version, etag, deleted, created_at, updated_at)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)
                         ON CONFLICT(activity_id, actor_id, registration, state_id) DO UPDATE SET
                            content_type = excluded.content_type,
                            payload = excluded.payload,
                            version = excluded.version,
                            etag = excluded.etag,
                            created_at = CASE WHEN activity_state.deleted = 1
                                THEN excluded.created_at ELSE activity_state.created_at END,
                            deleted = 0,
                            updated_at = excluded.updated_at",
                        params![
                            key.activity_id,
                            key.actor_id,
                            key.registration_column(),
                            key.state_id,
                            content_type,
                            payload,
                            next,
                            tag,
                            now
                        ],
                    )?;
                    tracing::debug!(state_id = %key.state_id, activity_id = %key.activity_id, version = next, "state written");
                    Ok(next)
                })
            })
        })
    }

    fn get_state(&self, key: &StateKey) -> Result<StateDocument, LrsError> {
        self.broker.with_read(|conn| {
            conn.query_row(
                "SELECT content_type, payload, version, etag, created_at, updated_at FROM activity_state
                 WHERE activity_id = ?1 AND actor_id = ?2 AND registration = ?3 AND state_id = ?4
                   AND deleted = 0",
                params![
                    key.activity_id,
                    key.actor_id,
                    key.registration_column(),
                    key.state_id
                ],
                |row| {
                    Ok(StateDocument {
                        key: key.clone(),
                        content_type: row.get(0)?,
                        payload: row.get(1)?,
                        version: row.get(2)?,
                        etag: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                LrsError::not_found(format!(
                    "state '{}' for activity '{}'",
                    key.state_id, key.activity_id
                ))
            })
        })
    }

    fn delete_state(&self, key: &StateKey, expected_version: Option<i64>) -> Result<bool, LrsError> {
        key.check()?;
        self.locks.with_lock(&key.lock_key(), || {
            self.broker.with_write(&key.actor_id, "state.delete", |conn| {
                db::with_immediate_tx(conn, |tx| {
                    let current = live_version(Self::current_version(tx, key)?);
                    check_expected(key, current, expected_version)?;
                    if current.is_none() {
                        return Ok(false);
                    }
                    tx.execute(
                        "UPDATE activity_state SET deleted = 1, payload = x'', etag = '', updated_at = ?5
                         WHERE activity_id = ?1 AND actor_id = ?2 AND registration = ?3 AND state_id = ?4",
                        params![
                            key.activity_id,
                            key.actor_id,
                            key.registration_column(),
                            key.state_id,
                            time::now_rfc3339()
                        ],
                    )?;
                    Ok(true)
                })
            })
        })
    }

    fn list_state_ids(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<Vec<String>, LrsError> {
        self.broker.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT state_id FROM activity_state
                 WHERE activity_id = ?1 AND actor_id = ?2 AND registration = ?3 AND deleted = 0
                 ORDER BY state_id",
            )?;
            let rows = stmt.query_map(
                params![
                    activity_id,
                    actor_id,
                    registration.map(canonical_registration).unwrap_or_default()
                ],
                |row| row.get(0),
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn delete_all_states(
        &self,
        activity_id: &str,
        actor_id: &str,
        registration: Option<&str>,
    ) -> Result<usize, LrsError> {
        // Per-document writers are not excluded here; a concurrent put simply
        // survives or is removed depending on commit order.
        self.broker.with_write(actor_id, "state.delete_all", |conn| {
            db::with_immediate_tx(conn, |tx| {
                Ok(tx.execute(
                    "UPDATE activity_state SET deleted = 1, payload = x'', etag = '', updated_at = ?4
                     WHERE activity_id = ?1 AND actor_id = ?2 AND registration = ?3 AND deleted = 0",
                    params![
                        activity_id,
                        actor_id,
                        registration.map(canonical_registration).unwrap_or_default(),
                        time::now_rfc3339()
                    ],
                )?)
            })
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "state",
        "version": "0.1.0",
        "description": "Versioned activity state documents with compare-and-set writes",
        "commands": [
            { "name": "state get", "parameters": ["--activity", "--state-id", "--registration"] },
            { "name": "state put", "parameters": ["--activity", "--state-id", "--registration", "--expected-version", "--data"] },
            { "name": "state delete", "parameters": ["--activity", "--state-id", "--registration", "--expected-version", "--all"] }
        ],
        "storage": ["lrs.db#activity_state"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StateKey {
        StateKey::new("urn:au:1", "A_1", Some("reg"), "suspend_data")
    }

    #[test]
    fn expected_version_semantics() {
        let k = key();
        assert!(check_expected(&k, None, None).is_ok());
        assert!(check_expected(&k, None, Some(0)).is_ok());
        assert!(check_expected(&k, Some(3), Some(3)).is_ok());
        assert!(matches!(
            check_expected(&k, Some(3), Some(2)),
            Err(LrsError::Conflict(_))
        ));
        assert!(matches!(
            check_expected(&k, Some(1), Some(0)),
            Err(LrsError::Conflict(_))
        ));
    }

    #[test]
    fn empty_key_parts_are_rejected() {
        let k = StateKey::new("", "A_1", None, "s");
        assert!(k.check().is_err());
        assert_eq!(key().registration_column(), "reg");
        assert_eq!(StateKey::new("a", "b", None, "c").registration_column(), "");
    }
}
