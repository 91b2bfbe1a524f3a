//! Query/Launch API: the boundary used by the content renderer and clients.
//!
//! `Lrs` owns no state of its own beyond per-triple ingestion locks; every
//! operation routes to the component traits it was constructed with.

use crate::core::config::LrsConfig;
use crate::core::error::LrsError;
use crate::core::locks::KeyedLocks;
use crate::core::store::Store;
use crate::core::time;
use crate::services::actors::{ActorRegistry, IdentifyingProperty, SqliteActorRegistry};
use crate::services::manifest::{
    Activity, LaunchMethod, ManifestRepository, MoveOn, PackageManifest, SqliteManifestRepository,
};
use crate::services::progress::{CourseProgress, ProgressAggregator};
use crate::services::session::SessionSummary;
use crate::services::state::{SqliteStateStore, StateDocument, StateKey, StateRepository};
use crate::services::statements::{Ingested, SqliteStatementStore, StatementRepository};
use crate::xapi::model::{Agent, Statement, canonical_registration};
use crate::xapi::validate::is_uuid;
use serde::Serialize;
use std::sync::Arc;

/// Query keys reserved by the cmi5 launch convention.
pub const RESERVED_LAUNCH_KEYS: &[&str] = &["endpoint", "fetch", "auth", "actor", "registration", "activityId"];

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub package_id: String,
    pub activity_id: String,
    pub actor: Agent,
    pub registration: Option<String>,
    /// Client-supplied parameters (locale, display name, return URL, ...) copied verbatim.
    pub launch_parameters: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    pub registration: String,
    pub launch_url: String,
    pub launch_parameters: Vec<(String, String)>,
    pub actor_id: String,
    pub launch_method: LaunchMethod,
    pub move_on: MoveOn,
    pub mastery_score: Option<f64>,
}

pub struct Lrs {
    actors: Arc<dyn ActorRegistry>,
    manifests: Arc<dyn ManifestRepository>,
    statements: Arc<dyn StatementRepository>,
    states: Arc<dyn StateRepository>,
    progress: ProgressAggregator,
    config: LrsConfig,
    triples: KeyedLocks,
}

impl Lrs {
    pub fn new(
        actors: Arc<dyn ActorRegistry>,
        manifests: Arc<dyn ManifestRepository>,
        statements: Arc<dyn StatementRepository>,
        states: Arc<dyn StateRepository>,
        config: LrsConfig,
    ) -> Self {
        let progress = ProgressAggregator::new(Arc::clone(&statements), config.abandon_after_secs);
        Self {
            actors,
            manifests,
            statements,
            states,
            progress,
            config,
            triples: KeyedLocks::new(),
        }
    }

    /// Wires the SQLite-backed components of `store`.
    pub fn open(store: &Store) -> Self {
        let actors: Arc<dyn ActorRegistry> = Arc::new(SqliteActorRegistry::new(store));
        let manifests = Arc::new(SqliteManifestRepository::new(store));
        let statements = Arc::new(SqliteStatementStore::new(store, Arc::clone(&actors)));
        let states = Arc::new(SqliteStateStore::new(store));
        Self::new(actors, manifests, statements, states, store.config.clone())
    }

    pub fn config(&self) -> &LrsConfig {
        &self.config
    }

    pub fn actors(&self) -> &dyn ActorRegistry {
        self.actors.as_ref()
    }

    pub fn manifests(&self) -> &dyn ManifestRepository {
        self.manifests.as_ref()
    }

    pub fn statements(&self) -> &dyn StatementRepository {
        self.statements.as_ref()
    }

    pub fn register_package(&self, manifest: &PackageManifest) -> Result<String, LrsError> {
        self.manifests.register_package(manifest)
    }

    /// Builds a launch URL. Launching records nothing beyond the actor, so a
    /// retried launch with the same registration yields the same URL.
    pub fn launch(&self, request: &LaunchRequest) -> Result<LaunchResponse, LrsError> {
        let tree = self.manifests.package(&request.package_id)?;
        let activity = tree.find_activity(&request.activity_id).ok_or_else(|| {
            LrsError::not_found(format!(
                "activity '{}' in package '{}'",
                request.activity_id, request.package_id
            ))
        })?;

        let registration = match &request.registration {
            Some(r) if !is_uuid(r) => {
                return Err(LrsError::validation(format!(
                    "registration '{}' must be a UUID",
                    r
                )));
            }
            Some(r) => canonical_registration(r),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if let Some((key, _)) = request
            .launch_parameters
            .iter()
            .find(|(k, _)| RESERVED_LAUNCH_KEYS.contains(&k.as_str()))
        {
            return Err(LrsError::validation(format!(
                "launch parameter '{}' is reserved",
                key
            )));
        }

        let actor_id = self.actors.resolve_agent(&request.actor)?;
        let agent = self.actors.get(&actor_id)?.to_agent();
        let actor_json = serde_json::to_string(&agent)?;

        let mut url = tree.resolve_launch_url(activity)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("endpoint", &self.config.endpoint);
            if let Some(fetch) = &self.config.fetch_url {
                query.append_pair("fetch", fetch);
            }
            if !self.config.auth_token.is_empty() {
                query.append_pair("auth", &self.config.auth_token);
            }
            query.append_pair("actor", &actor_json);
            query.append_pair("registration", &registration);
            query.append_pair("activityId", &activity.id);
            for (key, value) in &request.launch_parameters {
                query.append_pair(key, value);
            }
        }
        let launch_parameters: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        tracing::info!(
            package_id = %request.package_id,
            activity_id = %activity.id,
            actor_id = %actor_id,
            registration = %registration,
            "launch issued"
        );

        Ok(LaunchResponse {
            registration,
            launch_url: url.to_string(),
            launch_parameters,
            actor_id,
            launch_method: activity.launch_method,
            move_on: activity.move_on,
            mastery_score: activity.mastery_score,
        })
    }

    /// Ingests one statement. Submissions for the same (actor, activity,
    /// registration) are serialized so they enter the log in arrival order.
    pub fn submit_statement(&self, statement: Statement) -> Result<Ingested, LrsError> {
        let identity = IdentifyingProperty::from_agent(&statement.actor)
            .map(|p| p.identity_key())
            .unwrap_or_default();
        let triple = format!(
            "{}\u{1f}{}\u{1f}{}",
            identity,
            statement.object.id,
            statement
                .registration()
                .map(canonical_registration)
                .unwrap_or_default()
        );
        let ingested = self
            .triples
            .with_lock(&triple, || self.statements.append(statement))?;
        tracing::info!(
            statement_id = %ingested.receipt().statement_id,
            seq = ingested.receipt().seq,
            duplicate = ingested.is_duplicate(),
            "statement ingested"
        );
        Ok(ingested)
    }

    fn existing_actor(&self, actor: &Agent) -> Result<String, LrsError> {
        self.actors
            .lookup_agent(actor)?
            .ok_or_else(|| LrsError::not_found("actor is not known to this LRS"))
    }

    pub fn get_state(
        &self,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
        state_id: &str,
    ) -> Result<StateDocument, LrsError> {
        let actor_id = self.existing_actor(actor)?;
        self.states
            .get_state(&StateKey::new(activity_id, &actor_id, registration, state_id))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_state(
        &self,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
        state_id: &str,
        payload: &[u8],
        content_type: &str,
        expected_version: Option<i64>,
    ) -> Result<i64, LrsError> {
        let actor_id = self.actors.resolve_agent(actor)?;
        self.states.put_state(
            &StateKey::new(activity_id, &actor_id, registration, state_id),
            payload,
            content_type,
            expected_version,
        )
    }

    pub fn delete_state(
        &self,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
        state_id: &str,
        expected_version: Option<i64>,
    ) -> Result<bool, LrsError> {
        let Some(actor_id) = self.actors.lookup_agent(actor)? else {
            return Ok(false);
        };
        self.states.delete_state(
            &StateKey::new(activity_id, &actor_id, registration, state_id),
            expected_version,
        )
    }

    pub fn clear_state(
        &self,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
    ) -> Result<usize, LrsError> {
        let Some(actor_id) = self.actors.lookup_agent(actor)? else {
            return Ok(0);
        };
        self.states
            .delete_all_states(activity_id, &actor_id, registration)
    }

    pub fn list_state_ids(
        &self,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
    ) -> Result<Vec<String>, LrsError> {
        let Some(actor_id) = self.actors.lookup_agent(actor)? else {
            return Ok(Vec::new());
        };
        self.states.list_state_ids(activity_id, &actor_id, registration)
    }

    pub fn get_progress(
        &self,
        package_id: &str,
        actor: &Agent,
        registration: Option<&str>,
    ) -> Result<CourseProgress, LrsError> {
        let tree = self.manifests.package(package_id)?;
        let actor_id = self.actors.lookup_agent(actor)?;
        let registration = registration.map(canonical_registration);
        self.progress.course_progress(
            &tree,
            actor_id.as_deref(),
            registration.as_deref(),
            time::now(),
        )
    }

    pub fn session(
        &self,
        package_id: &str,
        activity_id: &str,
        actor: &Agent,
        registration: Option<&str>,
    ) -> Result<(Activity, SessionSummary), LrsError> {
        let activity = self.manifests.find_activity(package_id, activity_id)?;
        let actor_id = self.actors.lookup_agent(actor)?;
        let registration = registration.map(canonical_registration);
        let summary = self.progress.activity_session(
            &activity,
            actor_id.as_deref(),
            registration.as_deref(),
            time::now(),
        )?;
        Ok((activity, summary))
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "api",
        "version": "0.1.0",
        "description": "Launch, statement, state and progress boundary",
        "operations": ["launch", "submit_statement", "get_state", "put_state", "delete_state", "get_progress", "session"],
        "launch_query_keys": RESERVED_LAUNCH_KEYS,
    })
}
