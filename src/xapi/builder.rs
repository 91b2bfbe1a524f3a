//! Fluent construction of cmi5-shaped statements.

use crate::core::error::LrsError;
use crate::xapi::model::{
    ActivityDefinition, Agent, CMI5_CATEGORY, CMI5_PROGRESS_EXTENSION, Context, ContextActivities,
    Score, Statement, StatementObject, StatementResult, Verb,
};
use crate::xapi::verbs::VerbKind;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    id: Option<String>,
    actor: Option<Agent>,
    verb: Option<Verb>,
    object: Option<StatementObject>,
    result: StatementResult,
    registration: Option<String>,
    parent: Option<String>,
    timestamp: Option<String>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Assigns a fresh v4 UUID as the statement id.
    pub fn with_new_id(mut self) -> Self {
        self.id = Some(uuid::Uuid::new_v4().to_string());
        self
    }

    pub fn actor(mut self, actor: Agent) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    pub fn verb_kind(mut self, kind: VerbKind) -> Self {
        self.verb = kind.verb();
        self
    }

    pub fn activity(mut self, id: &str, name: Option<&str>) -> Self {
        let mut object = StatementObject::activity(id);
        if let Some(name) = name {
            let mut names = BTreeMap::new();
            names.insert("en-US".to_string(), name.to_string());
            object.definition = Some(ActivityDefinition {
                name: Some(names),
                ..Default::default()
            });
        }
        self.object = Some(object);
        self
    }

    pub fn statement_ref(mut self, target_id: &str) -> Self {
        self.object = Some(StatementObject::statement_ref(target_id));
        self
    }

    pub fn registration(mut self, registration: &str) -> Self {
        self.registration = Some(registration.to_string());
        self
    }

    /// Adds a `contextActivities.parent` entry, typically the course or block.
    pub fn parent(mut self, activity_id: &str) -> Self {
        self.parent = Some(activity_id.to_string());
        self
    }

    pub fn timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }

    pub fn scaled_score(mut self, scaled: f64) -> Self {
        self.result.score.get_or_insert_with(Score::default).scaled = Some(scaled);
        self
    }

    pub fn raw_score(mut self, raw: f64, min: f64, max: f64) -> Self {
        let score = self.result.score.get_or_insert_with(Score::default);
        score.raw = Some(raw);
        score.min = Some(min);
        score.max = Some(max);
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.result.success = Some(success);
        self
    }

    pub fn completion(mut self, completion: bool) -> Self {
        self.result.completion = Some(completion);
        self
    }

    pub fn duration(mut self, duration: &str) -> Self {
        self.result.duration = Some(duration.to_string());
        self
    }

    pub fn response(mut self, response: &str) -> Self {
        self.result.response = Some(response.to_string());
        self
    }

    /// Sets the cmi5 progress extension (0-100).
    pub fn progress(mut self, percent: u8) -> Self {
        self.result
            .extensions
            .get_or_insert_with(Map::new)
            .insert(CMI5_PROGRESS_EXTENSION.to_string(), JsonValue::from(percent.min(100)));
        self
    }

    pub fn build(self) -> Result<Statement, LrsError> {
        let actor = self
            .actor
            .ok_or_else(|| LrsError::validation("statement requires an actor"))?;
        let verb = self
            .verb
            .ok_or_else(|| LrsError::validation("statement requires a known verb"))?;
        let object = self
            .object
            .ok_or_else(|| LrsError::validation("statement requires an object"))?;

        let result = (self.result != StatementResult::default()).then_some(self.result);

        let context = if self.registration.is_some() || self.parent.is_some() {
            let category = self
                .registration
                .is_some()
                .then(|| vec![StatementObject::activity(CMI5_CATEGORY)]);
            let parent = self
                .parent
                .as_deref()
                .map(|p| vec![StatementObject::activity(p)]);
            Some(Context {
                registration: self.registration,
                context_activities: Some(ContextActivities {
                    parent,
                    category,
                    ..Default::default()
                }),
                ..Default::default()
            })
        } else {
            None
        };

        Ok(Statement {
            id: self.id,
            actor,
            verb,
            object,
            result,
            context,
            timestamp: self.timestamp,
            stored: None,
            authority: None,
            version: None,
        })
    }
}

fn cmi5(kind: VerbKind, actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    StatementBuilder::new()
        .with_new_id()
        .actor(actor.clone())
        .verb_kind(kind)
        .activity(activity_id, None)
        .registration(registration)
}

pub fn launched(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Launched, actor, activity_id, registration)
}

pub fn initialized(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Initialized, actor, activity_id, registration)
}

pub fn progressed(
    actor: &Agent,
    activity_id: &str,
    registration: &str,
    percent: u8,
) -> StatementBuilder {
    cmi5(VerbKind::Progressed, actor, activity_id, registration).progress(percent)
}

pub fn completed(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Completed, actor, activity_id, registration)
        .completion(true)
        .progress(100)
}

pub fn passed(actor: &Agent, activity_id: &str, registration: &str, scaled: f64) -> StatementBuilder {
    cmi5(VerbKind::Passed, actor, activity_id, registration)
        .success(true)
        .scaled_score(scaled)
}

pub fn failed(actor: &Agent, activity_id: &str, registration: &str, scaled: f64) -> StatementBuilder {
    cmi5(VerbKind::Failed, actor, activity_id, registration)
        .success(false)
        .scaled_score(scaled)
}

pub fn scored(actor: &Agent, activity_id: &str, registration: &str, scaled: f64) -> StatementBuilder {
    cmi5(VerbKind::Scored, actor, activity_id, registration).scaled_score(scaled)
}

pub fn terminated(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Terminated, actor, activity_id, registration)
}

pub fn abandoned(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Abandoned, actor, activity_id, registration)
}

pub fn waived(actor: &Agent, activity_id: &str, registration: &str) -> StatementBuilder {
    cmi5(VerbKind::Waived, actor, activity_id, registration)
}

/// A statement voiding `target_id`. Voiding statements carry no registration.
pub fn voided(actor: &Agent, target_id: &str) -> StatementBuilder {
    StatementBuilder::new()
        .with_new_id()
        .actor(actor.clone())
        .verb_kind(VerbKind::Voided)
        .statement_ref(target_id)
}
