//! xAPI 1.0.3 statement wire model.
//!
//! Field names follow the xAPI JSON (camelCase). Optional members are omitted on
//! output so a stored statement serializes back to the shape it arrived in.

use crate::xapi::verbs::{self, VerbKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Language map, e.g. `{"en-US": "completed"}`.
pub type LanguageMap = BTreeMap<String, String>;

pub const CMI5_CATEGORY: &str = "https://w3id.org/xapi/cmi5/context/categories/cmi5";
pub const CMI5_PROGRESS_EXTENSION: &str = "https://w3id.org/xapi/cmi5/result/extensions/progress";
pub const OBJECT_TYPE_ACTIVITY: &str = "Activity";
pub const OBJECT_TYPE_STATEMENT_REF: &str = "StatementRef";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub home_page: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbox: Option<String>,
    #[serde(
        default,
        rename = "mbox_sha1sum",
        skip_serializing_if = "Option::is_none"
    )]
    pub mbox_sha1sum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl Agent {
    pub fn with_mbox(mbox: &str) -> Self {
        Self {
            object_type: Some("Agent".to_string()),
            mbox: Some(mbox.to_string()),
            ..Default::default()
        }
    }

    pub fn with_account(home_page: &str, name: &str) -> Self {
        Self {
            object_type: Some("Agent".to_string()),
            account: Some(Account {
                name: name.to_string(),
                home_page: home_page.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Verb {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display: LanguageMap,
}

impl Verb {
    pub fn kind(&self) -> VerbKind {
        VerbKind::from_iri(&self.id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<LanguageMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LanguageMap>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, JsonValue>>,
}

/// Statement object. Only activities and statement references are accepted;
/// `objectType` distinguishes them and defaults to `Activity`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatementObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ActivityDefinition>,
}

impl StatementObject {
    pub fn activity(id: &str) -> Self {
        Self {
            object_type: Some(OBJECT_TYPE_ACTIVITY.to_string()),
            id: id.to_string(),
            definition: None,
        }
    }

    pub fn statement_ref(id: &str) -> Self {
        Self {
            object_type: Some(OBJECT_TYPE_STATEMENT_REF.to_string()),
            id: id.to_string(),
            definition: None,
        }
    }

    pub fn object_type(&self) -> &str {
        self.object_type.as_deref().unwrap_or(OBJECT_TYPE_ACTIVITY)
    }

    pub fn is_activity(&self) -> bool {
        self.object_type() == OBJECT_TYPE_ACTIVITY
    }

    pub fn is_statement_ref(&self) -> bool {
        self.object_type() == OBJECT_TYPE_STATEMENT_REF
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Score {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StatementResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, JsonValue>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ContextActivities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Vec<StatementObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Vec<StatementObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Vec<StatementObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<Vec<StatementObject>>,
}

impl ContextActivities {
    pub fn all(&self) -> impl Iterator<Item = &StatementObject> {
        [&self.parent, &self.grouping, &self.category, &self.other]
            .into_iter()
            .flatten()
            .flatten()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_activities: Option<ContextActivities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, JsonValue>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub actor: Agent,
    pub verb: Verb,
    pub object: StatementObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StatementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Registrations are UUIDs and compare case-insensitively. Everything that
/// stores or looks up a registration uses this form.
pub fn canonical_registration(raw: &str) -> String {
    raw.to_ascii_lowercase()
}

impl Statement {
    pub fn verb_kind(&self) -> VerbKind {
        self.verb.kind()
    }

    pub fn registration(&self) -> Option<&str> {
        self.context.as_ref()?.registration.as_deref()
    }

    /// Target statement id when this statement voids another.
    pub fn voided_target(&self) -> Option<&str> {
        (self.verb.id == verbs::VOIDED && self.object.is_statement_ref())
            .then_some(self.object.id.as_str())
    }

    pub fn scaled_score(&self) -> Option<f64> {
        self.result.as_ref()?.score.as_ref()?.scaled
    }

    pub fn completion(&self) -> Option<bool> {
        self.result.as_ref()?.completion
    }

    pub fn success(&self) -> Option<bool> {
        self.result.as_ref()?.success
    }

    pub fn duration(&self) -> Option<&str> {
        self.result.as_ref()?.duration.as_deref()
    }

    /// cmi5 progress extension (0-100), when present and numeric.
    pub fn progress_extension(&self) -> Option<f64> {
        self.result
            .as_ref()?
            .extensions
            .as_ref()?
            .get(CMI5_PROGRESS_EXTENSION)?
            .as_f64()
    }

    pub fn has_cmi5_category(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|c| c.context_activities.as_ref())
            .and_then(|ca| ca.category.as_ref())
            .is_some_and(|cats| cats.iter().any(|a| a.id == CMI5_CATEGORY))
    }
}
