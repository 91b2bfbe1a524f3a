//! Actor Registry: stable internal ids for learner identities.
//!
//! An identity is exactly one identifying property (mailbox or account). The
//! registry never deletes or merges actors; the first resolution of a property
//! creates the record and every later resolution returns the same id.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::LrsError;
use crate::core::locks::KeyedLocks;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::xapi::model::Agent;
use crate::xapi::validate::{ValidationReport, validate_actor};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentifyingProperty {
    Mailbox(String),
    Account { home_page: String, name: String },
}

impl IdentifyingProperty {
    /// Extracts and normalizes the identifying property of an xAPI agent.
    pub fn from_agent(agent: &Agent) -> Result<Self, LrsError> {
        let mut report = ValidationReport::default();
        validate_actor(agent, &mut report);
        report.into_result()?;

        if let Some(mbox) = &agent.mbox {
            return Ok(IdentifyingProperty::Mailbox(mbox.trim().to_lowercase()));
        }
        match &agent.account {
            Some(account) => Ok(IdentifyingProperty::Account {
                home_page: account.home_page.trim().trim_end_matches('/').to_string(),
                name: account.name.trim().to_string(),
            }),
            None => Err(LrsError::validation(
                "actor must have an identifier (mbox or account)",
            )),
        }
    }

    /// Unique key stored in `actors.identity_key`.
    pub fn identity_key(&self) -> String {
        match self {
            IdentifyingProperty::Mailbox(mbox) => format!("mbox:{}", mbox),
            IdentifyingProperty::Account { home_page, name } => {
                format!("account:{}|{}", home_page, name)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub id: String,
    pub object_type: String,
    pub name: Option<String>,
    pub identity: IdentifyingProperty,
    pub created_at: String,
}

impl Actor {
    /// xAPI agent representation of this actor.
    pub fn to_agent(&self) -> Agent {
        let agent = match &self.identity {
            IdentifyingProperty::Mailbox(mbox) => Agent::with_mbox(mbox),
            IdentifyingProperty::Account { home_page, name } => {
                Agent::with_account(home_page, name)
            }
        };
        match &self.name {
            Some(name) => agent.named(name),
            None => agent,
        }
    }
}

pub trait ActorRegistry: Send + Sync {
    /// Returns the internal id for `property`, creating the actor on first sight.
    fn resolve(&self, property: &IdentifyingProperty, name: Option<&str>)
    -> Result<String, LrsError>;

    /// Returns the internal id for `property` without creating anything.
    fn lookup(&self, property: &IdentifyingProperty) -> Result<Option<String>, LrsError>;

    fn get(&self, actor_id: &str) -> Result<Actor, LrsError>;

    fn resolve_agent(&self, agent: &Agent) -> Result<String, LrsError> {
        let property = IdentifyingProperty::from_agent(agent)?;
        self.resolve(&property, agent.name.as_deref())
    }

    fn lookup_agent(&self, agent: &Agent) -> Result<Option<String>, LrsError> {
        let property = IdentifyingProperty::from_agent(agent)?;
        self.lookup(&property)
    }
}

pub fn initialize_actors_db(store: &Store) -> Result<(), LrsError> {
    let conn = db::db_connect(&store.db_path())?;
    db::ensure_meta(&conn)?;
    db::apply_ddl(&conn, &[schemas::ACTORS_SCHEMA])
}

pub struct SqliteActorRegistry {
    broker: DbBroker,
    locks: KeyedLocks,
}

impl SqliteActorRegistry {
    pub fn new(store: &Store) -> Self {
        Self {
            broker: DbBroker::new(store),
            locks: KeyedLocks::new(),
        }
    }

    fn select_id(
        conn: &rusqlite::Connection,
        identity_key: &str,
    ) -> Result<Option<String>, LrsError> {
        Ok(conn
            .query_row(
                "SELECT id FROM actors WHERE identity_key = ?1",
                params![identity_key],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl ActorRegistry for SqliteActorRegistry {
    fn resolve(
        &self,
        property: &IdentifyingProperty,
        name: Option<&str>,
    ) -> Result<String, LrsError> {
        let key = property.identity_key();
        self.locks.with_lock(&key, || {
            if let Some(id) = self
                .broker
                .with_read(|conn| Self::select_id(conn, &key))?
            {
                return Ok(id);
            }

            self.broker.with_write("actors", "actors.resolve", |conn| {
                db::with_immediate_tx(conn, |tx| {
                    // Another process may have won the race since the read.
                    if let Some(id) = Self::select_id(tx, &key)? {
                        return Ok(id);
                    }
                    let id = format!("A_{}", Ulid::new());
                    let (mbox, account_name, account_homepage) = match property {
                        IdentifyingProperty::Mailbox(mbox) => (Some(mbox.as_str()), None, None),
                        IdentifyingProperty::Account { home_page, name } => {
                            (None, Some(name.as_str()), Some(home_page.as_str()))
                        }
                    };
                    tx.execute(
                        "INSERT INTO actors(id, identity_key, object_type, name, mbox, account_name, account_homepage, created_at)
                         VALUES(?1, ?2, 'Agent', ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            key,
                            name,
                            mbox,
                            account_name,
                            account_homepage,
                            time::now_rfc3339()
                        ],
                    )?;
                    tracing::info!(actor_id = %id, identity = %key, "registered new actor");
                    Ok(id)
                })
            })
        })
    }

    fn lookup(&self, property: &IdentifyingProperty) -> Result<Option<String>, LrsError> {
        let key = property.identity_key();
        self.broker.with_read(|conn| Self::select_id(conn, &key))
    }

    fn get(&self, actor_id: &str) -> Result<Actor, LrsError> {
        self.broker.with_read(|conn| {
            conn.query_row(
                "SELECT id, object_type, name, mbox, account_name, account_homepage, created_at
                 FROM actors WHERE id = ?1",
                params![actor_id],
                |row| {
                    let mbox: Option<String> = row.get(3)?;
                    let account_name: Option<String> = row.get(4)?;
                    let account_homepage: Option<String> = row.get(5)?;
                    let identity = match mbox {
                        Some(mbox) => IdentifyingProperty::Mailbox(mbox),
                        None => IdentifyingProperty::Account {
                            home_page: account_homepage.unwrap_or_default(),
                            name: account_name.unwrap_or_default(),
                        },
                    };
                    Ok(Actor {
                        id: row.get(0)?,
                        object_type: row.get(1)?,
                        name: row.get(2)?,
                        identity,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LrsError::not_found(format!("actor '{}'", actor_id)))
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "actors",
        "version": "0.1.0",
        "description": "Learner identity registry (mbox or account, never deleted)",
        "commands": [
            { "name": "actor resolve", "parameters": ["--mbox", "--account-home-page", "--account-name", "--name"] }
        ],
        "storage": ["lrs.db#actors"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_properties() {
        let a = IdentifyingProperty::from_agent(&Agent::with_mbox("mailto:Jane@Example.COM")).unwrap();
        assert_eq!(a.identity_key(), "mbox:mailto:jane@example.com");

        let b = IdentifyingProperty::from_agent(&Agent::with_account(
            "https://lms.example.com/",
            "u-1",
        ))
        .unwrap();
        assert_eq!(b.identity_key(), "account:https://lms.example.com|u-1");
    }

    #[test]
    fn rejects_malformed_agents() {
        assert!(IdentifyingProperty::from_agent(&Agent::default()).is_err());
        assert!(IdentifyingProperty::from_agent(&Agent::with_mbox("jane@example.com")).is_err());
        let group = Agent {
            object_type: Some("Group".into()),
            mbox: Some("mailto:team@example.com".into()),
            ..Default::default()
        };
        assert!(IdentifyingProperty::from_agent(&group).is_err());
    }
}
