//! Statement shape validation.
//!
//! Errors reject a statement before anything is persisted; warnings are
//! reported but do not block ingestion.

use crate::core::error::LrsError;
use crate::core::time;
use crate::xapi::model::{Agent, Score, Statement, StatementObject, StatementResult};
use crate::xapi::verbs::{self, VerbKind};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static IRI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:[^\s]+$").expect("iri pattern"));
static IRL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[\w\-._~:/?#\[\]@!$&'()*+,;=%]+$").expect("irl pattern")
});
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern")
});
static LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").expect("language pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingActorIdentifier,
    MultipleActorIdentifiers,
    UnsupportedActorIdentifier,
    GroupActorUnsupported,
    InvalidMboxFormat,
    InvalidAccountHomePage,
    EmptyAccountName,
    InvalidVerbIri,
    InvalidActivityIri,
    InvalidActivityType,
    UnsupportedObjectType,
    VoidingRequiresStatementRef,
    InvalidScaledScore,
    InvalidRawScore,
    InvalidMinMaxScore,
    InvalidDurationFormat,
    InvalidLanguageCode,
    InvalidRegistration,
    InvalidStatementId,
    InvalidTimestamp,
    FutureTimestamp,
    MissingCmi5Registration,
    MissingCmi5Category,
    InvalidCmi5Verb,
}

impl ValidationIssue {
    pub fn message(self) -> &'static str {
        match self {
            ValidationIssue::MissingActorIdentifier => "actor must have an identifier (mbox or account)",
            ValidationIssue::MultipleActorIdentifiers => "actor must have exactly one identifier",
            ValidationIssue::UnsupportedActorIdentifier => {
                "actor identifier must be mbox or account (mbox_sha1sum and openid are not accepted)"
            }
            ValidationIssue::GroupActorUnsupported => "group actors are not supported",
            ValidationIssue::InvalidMboxFormat => "mbox must be in mailto: format",
            ValidationIssue::InvalidAccountHomePage => "account homePage must be an http(s) IRL",
            ValidationIssue::EmptyAccountName => "account name must not be empty",
            ValidationIssue::InvalidVerbIri => "verb id must be a valid IRI",
            ValidationIssue::InvalidActivityIri => "activity id must be a valid IRI",
            ValidationIssue::InvalidActivityType => "activity type must be a valid IRI",
            ValidationIssue::UnsupportedObjectType => "object must be an Activity or a StatementRef",
            ValidationIssue::VoidingRequiresStatementRef => "voiding statement object must be a StatementRef",
            ValidationIssue::InvalidScaledScore => "scaled score must be between -1.0 and 1.0",
            ValidationIssue::InvalidRawScore => "raw score must be between min and max",
            ValidationIssue::InvalidMinMaxScore => "min score must be less than max score",
            ValidationIssue::InvalidDurationFormat => "duration must be in ISO 8601 format",
            ValidationIssue::InvalidLanguageCode => "language must be a valid language tag",
            ValidationIssue::InvalidRegistration => "registration must be a UUID",
            ValidationIssue::InvalidStatementId => "statement id must be a UUID",
            ValidationIssue::InvalidTimestamp => "timestamp must be an ISO 8601 date-time",
            ValidationIssue::FutureTimestamp => "timestamp is too far in the future",
            ValidationIssue::MissingCmi5Registration => "cmi5 statements must have a registration",
            ValidationIssue::MissingCmi5Category => "cmi5 statements must carry the cmi5 category",
            ValidationIssue::InvalidCmi5Verb => "verb is not defined by cmi5",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationWarning {
    MissingVerbDisplay,
    MissingActivityDefinition,
    MissingResultDuration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the report into `Ok(warnings)` or a `ValidationError` naming every issue.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, LrsError> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        let joined = self
            .errors
            .iter()
            .map(|e| e.message())
            .collect::<Vec<_>>()
            .join("; ");
        Err(LrsError::ValidationError(joined))
    }

    fn error(&mut self, issue: ValidationIssue) {
        if !self.errors.contains(&issue) {
            self.errors.push(issue);
        }
    }

    fn warn(&mut self, warning: ValidationWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

pub fn is_iri(raw: &str) -> bool {
    IRI.is_match(raw)
}

pub fn is_uuid(raw: &str) -> bool {
    UUID.is_match(raw)
}

#[derive(Debug, Clone)]
pub struct StatementValidator {
    max_clock_skew: Duration,
}

impl Default for StatementValidator {
    fn default() -> Self {
        Self::new(300)
    }
}

impl StatementValidator {
    pub fn new(max_clock_skew_secs: i64) -> Self {
        Self {
            max_clock_skew: Duration::seconds(max_clock_skew_secs),
        }
    }

    pub fn validate(&self, statement: &Statement, now: DateTime<Utc>) -> ValidationReport {
        let mut report = ValidationReport::default();

        validate_actor(&statement.actor, &mut report);

        if !is_iri(&statement.verb.id) {
            report.error(ValidationIssue::InvalidVerbIri);
        }
        if statement.verb.display.is_empty() {
            report.warn(ValidationWarning::MissingVerbDisplay);
        }

        validate_object(&statement.object, &mut report);
        if statement.verb.id == verbs::VOIDED && !statement.object.is_statement_ref() {
            report.error(ValidationIssue::VoidingRequiresStatementRef);
        }

        if let Some(result) = &statement.result {
            validate_result(result, &mut report);
        }

        if let Some(context) = &statement.context {
            if let Some(registration) = &context.registration {
                if !is_uuid(registration) {
                    report.error(ValidationIssue::InvalidRegistration);
                }
            }
            if let Some(language) = &context.language {
                if !LANGUAGE.is_match(language) {
                    report.error(ValidationIssue::InvalidLanguageCode);
                }
            }
            if let Some(activities) = &context.context_activities {
                for activity in activities.all() {
                    validate_activity(activity, &mut report);
                }
            }
        }

        if let Some(id) = &statement.id {
            if !is_uuid(id) {
                report.error(ValidationIssue::InvalidStatementId);
            }
        }

        if let Some(raw) = &statement.timestamp {
            match time::parse_timestamp(raw) {
                None => report.error(ValidationIssue::InvalidTimestamp),
                Some(ts) if ts > now + self.max_clock_skew => {
                    report.error(ValidationIssue::FutureTimestamp)
                }
                Some(_) => {}
            }
        }

        if statement.verb_kind() == VerbKind::Completed
            && statement.result.as_ref().and_then(|r| r.duration.as_ref()).is_none()
        {
            report.warn(ValidationWarning::MissingResultDuration);
        }

        report
    }

    /// Adds the cmi5 profile rules on top of [`StatementValidator::validate`].
    pub fn validate_cmi5(&self, statement: &Statement, now: DateTime<Utc>) -> ValidationReport {
        let mut report = self.validate(statement, now);
        if statement.registration().is_none() {
            report.error(ValidationIssue::MissingCmi5Registration);
        }
        if !statement.has_cmi5_category() {
            report.error(ValidationIssue::MissingCmi5Category);
        }
        if !statement.verb_kind().is_cmi5_defined() {
            report.error(ValidationIssue::InvalidCmi5Verb);
        }
        report
    }
}

/// Actor rules shared by statements and the State API.
pub fn validate_actor(actor: &Agent, report: &mut ValidationReport) {
    if actor.object_type.as_deref() == Some("Group") {
        report.error(ValidationIssue::GroupActorUnsupported);
        return;
    }

    let present = [
        actor.mbox.is_some(),
        actor.mbox_sha1sum.is_some(),
        actor.openid.is_some(),
        actor.account.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();

    match present {
        0 => report.error(ValidationIssue::MissingActorIdentifier),
        1 => {}
        _ => report.error(ValidationIssue::MultipleActorIdentifiers),
    }
    if actor.mbox_sha1sum.is_some() || actor.openid.is_some() {
        report.error(ValidationIssue::UnsupportedActorIdentifier);
    }

    if let Some(mbox) = &actor.mbox {
        let address = mbox.strip_prefix("mailto:").unwrap_or("");
        let well_formed = address
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !well_formed {
            report.error(ValidationIssue::InvalidMboxFormat);
        }
    }

    if let Some(account) = &actor.account {
        if !IRL.is_match(&account.home_page) {
            report.error(ValidationIssue::InvalidAccountHomePage);
        }
        if account.name.trim().is_empty() {
            report.error(ValidationIssue::EmptyAccountName);
        }
    }
}

fn validate_object(object: &StatementObject, report: &mut ValidationReport) {
    if object.is_activity() {
        validate_activity(object, report);
        let named = object
            .definition
            .as_ref()
            .and_then(|d| d.name.as_ref())
            .is_some_and(|n| !n.is_empty());
        if !named {
            report.warn(ValidationWarning::MissingActivityDefinition);
        }
    } else if object.is_statement_ref() {
        if !is_uuid(&object.id) {
            report.error(ValidationIssue::InvalidStatementId);
        }
    } else {
        report.error(ValidationIssue::UnsupportedObjectType);
    }
}

fn validate_activity(activity: &StatementObject, report: &mut ValidationReport) {
    if !is_iri(&activity.id) {
        report.error(ValidationIssue::InvalidActivityIri);
    }
    let kind = activity.definition.as_ref().and_then(|d| d.activity_type.as_ref());
    if kind.is_some_and(|k| !is_iri(k)) {
        report.error(ValidationIssue::InvalidActivityType);
    }
}

fn validate_result(result: &StatementResult, report: &mut ValidationReport) {
    if let Some(score) = &result.score {
        validate_score(score, report);
    }
    if let Some(duration) = &result.duration {
        if !time::is_iso8601_duration(duration) {
            report.error(ValidationIssue::InvalidDurationFormat);
        }
    }
}

fn validate_score(score: &Score, report: &mut ValidationReport) {
    if let Some(scaled) = score.scaled {
        if !(-1.0..=1.0).contains(&scaled) {
            report.error(ValidationIssue::InvalidScaledScore);
        }
    }
    if let Some(raw) = score.raw {
        if score.min.is_some_and(|min| raw < min) || score.max.is_some_and(|max| raw > max) {
            report.error(ValidationIssue::InvalidRawScore);
        }
    }
    if let (Some(min), Some(max)) = (score.min, score.max) {
        if min >= max {
            report.error(ValidationIssue::InvalidMinMaxScore);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xapi::builder::StatementBuilder;

    const REG: &str = "0b1f6a3e-2f43-4c9c-8f8e-1f5e6f7c8d9a";

    fn base() -> StatementBuilder {
        StatementBuilder::new()
            .actor(Agent::with_account("https://lms.example.com", "u-1"))
            .verb_kind(VerbKind::Completed)
            .activity("https://example.com/au/1", Some("Lesson 1"))
            .registration(REG)
            .timestamp("2025-01-11T10:00:00.000Z")
    }

    fn now() -> DateTime<Utc> {
        time::parse_timestamp("2025-01-11T12:00:00.000Z").unwrap()
    }

    #[test]
    fn well_formed_statement_passes() {
        let st = base().duration("PT30S").completion(true).build().unwrap();
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn completed_without_duration_warns_only() {
        let st = base().completion(true).build().unwrap();
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.is_valid());
        assert!(report.warnings.contains(&ValidationWarning::MissingResultDuration));
    }

    #[test]
    fn actor_identifier_rules() {
        let mut st = base().build().unwrap();
        st.actor = Agent::default();
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::MissingActorIdentifier));

        st.actor = Agent::with_mbox("mailto:a@example.com");
        st.actor.account = Some(crate::xapi::model::Account {
            name: "x".into(),
            home_page: "https://lms.example.com".into(),
        });
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::MultipleActorIdentifiers));

        st.actor = Agent::with_mbox("a@example.com");
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::InvalidMboxFormat));

        st.actor = Agent {
            openid: Some("https://id.example.com/a".into()),
            ..Default::default()
        };
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::UnsupportedActorIdentifier));
    }

    #[test]
    fn score_rules() {
        let st = base().scaled_score(1.5).build().unwrap();
        let report = StatementValidator::default().validate(&st, now());
        assert_eq!(report.errors, vec![ValidationIssue::InvalidScaledScore]);

        let mut st = base().build().unwrap();
        st.result = Some(StatementResult {
            score: Some(Score {
                scaled: None,
                raw: Some(120.0),
                min: Some(0.0),
                max: Some(100.0),
            }),
            ..Default::default()
        });
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::InvalidRawScore));
    }

    #[test]
    fn timestamp_rules() {
        let st = base().timestamp("2025-01-11T12:04:00.000Z").build().unwrap();
        assert!(StatementValidator::new(300).validate(&st, now()).is_valid());
        let report = StatementValidator::new(60).validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::FutureTimestamp));

        let st = base().timestamp("11/01/2025").build().unwrap();
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::InvalidTimestamp));
    }

    #[test]
    fn registration_and_language_rules() {
        let mut st = base().registration("not-a-uuid").build().unwrap();
        if let Some(ctx) = st.context.as_mut() {
            ctx.language = Some("english".into());
        }
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::InvalidRegistration));
        assert!(report.errors.contains(&ValidationIssue::InvalidLanguageCode));
    }

    #[test]
    fn voiding_needs_statement_ref() {
        let mut st = base().verb_kind(VerbKind::Voided).build().unwrap();
        let report = StatementValidator::default().validate(&st, now());
        assert!(report.errors.contains(&ValidationIssue::VoidingRequiresStatementRef));

        st.object = StatementObject::statement_ref("11111111-1111-4111-8111-111111111111");
        assert!(StatementValidator::default().validate(&st, now()).is_valid());
    }

    #[test]
    fn cmi5_profile_rules() {
        let st = base().completion(true).duration("PT1S").build().unwrap();
        assert!(StatementValidator::default().validate_cmi5(&st, now()).is_valid());

        let st = StatementBuilder::new()
            .actor(Agent::with_mbox("mailto:a@example.com"))
            .verb_kind(VerbKind::Progressed)
            .activity("https://example.com/au/1", None)
            .build()
            .unwrap();
        let report = StatementValidator::default().validate_cmi5(&st, now());
        assert!(report.errors.contains(&ValidationIssue::MissingCmi5Registration));
        assert!(report.errors.contains(&ValidationIssue::MissingCmi5Category));
        assert!(report.errors.contains(&ValidationIssue::InvalidCmi5Verb));
    }

    #[test]
    fn into_result_names_every_issue() {
        let mut st = base().scaled_score(2.0).build().unwrap();
        st.verb.id = "completed".into();
        let err = StatementValidator::default()
            .validate(&st, now())
            .into_result()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("scaled score"));
        assert!(msg.contains("verb id"));
    }
}
