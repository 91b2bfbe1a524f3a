//! Verb IRIs the LRS understands and their classification.

use crate::xapi::model::Verb;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ADL_VERBS: &str = "http://adlnet.gov/expapi/verbs/";
/// Namespace cmi5 uses for LMS-issued verbs (abandoned, waived, satisfied).
pub const ADL_W3ID_VERBS: &str = "https://w3id.org/xapi/adl/verbs/";

pub const LAUNCHED: &str = "http://adlnet.gov/expapi/verbs/launched";
pub const INITIALIZED: &str = "http://adlnet.gov/expapi/verbs/initialized";
pub const PROGRESSED: &str = "http://adlnet.gov/expapi/verbs/progressed";
pub const COMPLETED: &str = "http://adlnet.gov/expapi/verbs/completed";
pub const PASSED: &str = "http://adlnet.gov/expapi/verbs/passed";
pub const FAILED: &str = "http://adlnet.gov/expapi/verbs/failed";
pub const SCORED: &str = "http://adlnet.gov/expapi/verbs/scored";
pub const TERMINATED: &str = "http://adlnet.gov/expapi/verbs/terminated";
pub const SUSPENDED: &str = "http://adlnet.gov/expapi/verbs/suspended";
pub const RESUMED: &str = "http://adlnet.gov/expapi/verbs/resumed";
pub const ABANDONED: &str = "https://w3id.org/xapi/adl/verbs/abandoned";
pub const WAIVED: &str = "https://w3id.org/xapi/adl/verbs/waived";
pub const SATISFIED: &str = "https://w3id.org/xapi/adl/verbs/satisfied";
pub const VOIDED: &str = "http://adlnet.gov/expapi/verbs/voided";

/// Closed classification of verb IRIs used by session replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbKind {
    Launched,
    Initialized,
    Progressed,
    Completed,
    Passed,
    Failed,
    Scored,
    Terminated,
    Suspended,
    Resumed,
    Abandoned,
    Waived,
    Satisfied,
    Voided,
    /// Any other interaction verb (answered, experienced, attempted, ...).
    Other,
}

impl VerbKind {
    pub fn from_iri(iri: &str) -> Self {
        let Some(segment) = iri
            .strip_prefix(ADL_VERBS)
            .or_else(|| iri.strip_prefix(ADL_W3ID_VERBS))
        else {
            return VerbKind::Other;
        };
        match segment {
            "launched" => VerbKind::Launched,
            "initialized" => VerbKind::Initialized,
            "progressed" => VerbKind::Progressed,
            "completed" => VerbKind::Completed,
            "passed" => VerbKind::Passed,
            "failed" => VerbKind::Failed,
            "scored" => VerbKind::Scored,
            "terminated" => VerbKind::Terminated,
            "suspended" => VerbKind::Suspended,
            "resumed" => VerbKind::Resumed,
            "abandoned" => VerbKind::Abandoned,
            "waived" => VerbKind::Waived,
            "satisfied" => VerbKind::Satisfied,
            "voided" => VerbKind::Voided,
            _ => VerbKind::Other,
        }
    }

    pub fn iri(self) -> Option<&'static str> {
        Some(match self {
            VerbKind::Launched => LAUNCHED,
            VerbKind::Initialized => INITIALIZED,
            VerbKind::Progressed => PROGRESSED,
            VerbKind::Completed => COMPLETED,
            VerbKind::Passed => PASSED,
            VerbKind::Failed => FAILED,
            VerbKind::Scored => SCORED,
            VerbKind::Terminated => TERMINATED,
            VerbKind::Suspended => SUSPENDED,
            VerbKind::Resumed => RESUMED,
            VerbKind::Abandoned => ABANDONED,
            VerbKind::Waived => WAIVED,
            VerbKind::Satisfied => SATISFIED,
            VerbKind::Voided => VOIDED,
            VerbKind::Other => return None,
        })
    }

    /// Verbs the cmi5 profile allows content or the LMS to send.
    pub fn is_cmi5_defined(self) -> bool {
        matches!(
            self,
            VerbKind::Launched
                | VerbKind::Initialized
                | VerbKind::Completed
                | VerbKind::Passed
                | VerbKind::Failed
                | VerbKind::Abandoned
                | VerbKind::Waived
                | VerbKind::Terminated
                | VerbKind::Satisfied
        )
    }

    fn display_name(self) -> &'static str {
        match self {
            VerbKind::Launched => "launched",
            VerbKind::Initialized => "initialized",
            VerbKind::Progressed => "progressed",
            VerbKind::Completed => "completed",
            VerbKind::Passed => "passed",
            VerbKind::Failed => "failed",
            VerbKind::Scored => "scored",
            VerbKind::Terminated => "terminated",
            VerbKind::Suspended => "suspended",
            VerbKind::Resumed => "resumed",
            VerbKind::Abandoned => "abandoned",
            VerbKind::Waived => "waived",
            VerbKind::Satisfied => "satisfied",
            VerbKind::Voided => "voided",
            VerbKind::Other => "other",
        }
    }

    /// A `Verb` with an `en-US` display, or `None` for [`VerbKind::Other`].
    pub fn verb(self) -> Option<Verb> {
        let iri = self.iri()?;
        let mut display = BTreeMap::new();
        display.insert("en-US".to_string(), self.display_name().to_string());
        Some(Verb {
            id: iri.to_string(),
            display,
        })
    }
}
