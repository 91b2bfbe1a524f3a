//! Launch Session State Machine.
//!
//! A session is never stored. It is recomputed by replaying the statements of
//! one (actor, activity, registration) triple in logical-clock order, skipping
//! voided rows. Replay is a pure function of its input: the only time it reads
//! is the optional read-time abandonment check, which takes `now` as a parameter.

use crate::core::time;
use crate::services::manifest::{Activity, MoveOn};
use crate::services::statements::StoredStatement;
use crate::xapi::model::Statement;
use crate::xapi::verbs::VerbKind;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    NotStarted,
    Launched,
    Initialized,
    InProgress,
    Completed,
    Passed,
    Failed,
    Terminated,
    Abandoned,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::NotStarted => "NotStarted",
            SessionState::Launched => "Launched",
            SessionState::Initialized => "Initialized",
            SessionState::InProgress => "InProgress",
            SessionState::Completed => "Completed",
            SessionState::Passed => "Passed",
            SessionState::Failed => "Failed",
            SessionState::Terminated => "Terminated",
            SessionState::Abandoned => "Abandoned",
        };
        f.write_str(s)
    }
}

/// Completion policy of the replayed activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub move_on: MoveOn,
    pub mastery_score: Option<f64>,
}

impl From<&Activity> for Policy {
    fn from(activity: &Activity) -> Self {
        Self {
            move_on: activity.move_on,
            mastery_score: activity.mastery_score,
        }
    }
}

/// Read-time staleness rule: an unterminated span whose last statement is
/// older than `after` at `now` counts as abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Staleness {
    pub now: DateTime<Utc>,
    pub after: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub state: SessionState,
    pub score: Option<f64>,
    pub progress_percent: u8,
    pub elapsed_seconds: f64,
    pub satisfied: bool,
    pub completed: bool,
    pub passed: bool,
    pub failed: bool,
    pub waived: bool,
    pub first_launched_at: Option<String>,
    pub last_launched_at: Option<String>,
    pub completed_at: Option<String>,
    pub launch_count: u32,
    pub abandoned_spans: u32,
    pub statement_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: DateTime<Utc>,
    initialized: bool,
}

#[derive(Debug, Default)]
struct Replay {
    lifecycle: Option<SessionState>,
    span: Option<Span>,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    passed: bool,
    failed: bool,
    waived: bool,
    best_score: Option<f64>,
    progress: f64,
    elapsed: f64,
    first_launched: Option<DateTime<Utc>>,
    last_launched: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    launch_count: u32,
    abandoned_spans: u32,
    statement_count: u32,
}

fn statement_time(statement: &Statement) -> Option<DateTime<Utc>> {
    statement
        .timestamp
        .as_deref()
        .or(statement.stored.as_deref())
        .and_then(time::parse_timestamp)
}

impl Replay {
    fn open_span(&mut self, at: DateTime<Utc>, initialized: bool) {
        if self.span.take().is_some() {
            self.abandoned_spans += 1;
        }
        self.span = Some(Span {
            start: at,
            initialized,
        });
        self.first_launched.get_or_insert(at);
        self.last_launched = Some(at);
    }

    /// Opens an implicit span for content that reports without launching first.
    fn ensure_span(&mut self, at: DateTime<Utc>) {
        if self.span.is_none() {
            self.open_span(at, true);
        }
    }

    fn apply(&mut self, statement: &Statement) {
        let Some(at) = statement_time(statement) else {
            return;
        };
        self.statement_count += 1;
        self.last_seen = Some(at);

        if let Some(scaled) = statement.scaled_score() {
            self.best_score = Some(self.best_score.map_or(scaled, |best| best.max(scaled)));
        }
        if let Some(progress) = statement.progress_extension() {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }

        match statement.verb_kind() {
            VerbKind::Launched => {
                self.open_span(at, false);
                self.launch_count += 1;
                self.lifecycle = Some(SessionState::Launched);
            }
            VerbKind::Initialized => {
                match self.span {
                    Some(span) if !span.initialized => {
                        self.span = Some(Span {
                            initialized: true,
                            ..span
                        });
                    }
                    _ => self.open_span(at, true),
                }
                self.lifecycle = Some(SessionState::Initialized);
            }
            // Completion itself comes from `result.completion`, checked below.
            VerbKind::Completed => {
                self.ensure_span(at);
                self.lifecycle = Some(SessionState::InProgress);
            }
            VerbKind::Passed => {
                self.ensure_span(at);
                self.passed = true;
                self.lifecycle = Some(SessionState::InProgress);
            }
            VerbKind::Failed => {
                self.ensure_span(at);
                self.failed = true;
                self.lifecycle = Some(SessionState::InProgress);
            }
            VerbKind::Waived => {
                self.waived = true;
            }
            VerbKind::Terminated => {
                if let Some(span) = self.span.take() {
                    let seconds = statement
                        .duration()
                        .and_then(time::parse_duration_secs)
                        .unwrap_or_else(|| {
                            (at - span.start).num_milliseconds().max(0) as f64 / 1000.0
                        });
                    self.elapsed += seconds;
                }
                self.lifecycle = Some(SessionState::Terminated);
            }
            VerbKind::Abandoned => {
                if self.span.take().is_some() {
                    self.abandoned_spans += 1;
                }
                self.lifecycle = Some(SessionState::Abandoned);
            }
            VerbKind::Satisfied | VerbKind::Voided => {}
            VerbKind::Progressed
            | VerbKind::Scored
            | VerbKind::Suspended
            | VerbKind::Resumed
            | VerbKind::Other => {
                self.ensure_span(at);
                self.lifecycle = Some(SessionState::InProgress);
            }
        }

        if statement.completion() == Some(true) {
            self.mark_completed(at);
        }
    }

    fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_at.get_or_insert(at);
    }

    fn derive_mastery(&mut self, policy: Policy) {
        let (Some(mastery), Some(best)) = (policy.mastery_score, self.best_score) else {
            return;
        };
        if !policy.move_on.involves_passed() {
            return;
        }
        if best >= mastery {
            self.passed = true;
        } else {
            self.failed = true;
        }
    }

    fn apply_staleness(&mut self, staleness: Option<Staleness>) {
        let (Some(rule), Some(_), Some(last)) = (staleness, self.span, self.last_seen) else {
            return;
        };
        if rule.now - last > rule.after {
            self.span = None;
            self.abandoned_spans += 1;
            self.lifecycle = Some(SessionState::Abandoned);
        }
    }

    fn verdict(&self) -> Option<SessionState> {
        if self.passed {
            Some(SessionState::Passed)
        } else if self.failed {
            Some(SessionState::Failed)
        } else if self.completed {
            Some(SessionState::Completed)
        } else {
            None
        }
    }

    fn final_state(&self) -> SessionState {
        match self.lifecycle {
            None => SessionState::NotStarted,
            Some(s @ (SessionState::Terminated | SessionState::Abandoned)) => s,
            Some(s) => self.verdict().unwrap_or(s),
        }
    }
}

/// Whether the observed flags satisfy `move_on`.
pub fn is_satisfied(move_on: MoveOn, completed: bool, passed: bool, any_statement: bool) -> bool {
    match move_on {
        MoveOn::Passed => passed,
        MoveOn::Completed => completed,
        MoveOn::CompletedAndPassed => completed && passed,
        MoveOn::CompletedOrPassed => completed || passed,
        MoveOn::NotApplicable => any_statement,
    }
}

/// Replays `statements` (already in `seq` order) for one activity attempt.
pub fn replay(policy: Policy, statements: &[StoredStatement]) -> SessionSummary {
    replay_with(policy, statements, None)
}

pub fn replay_with(
    policy: Policy,
    statements: &[StoredStatement],
    staleness: Option<Staleness>,
) -> SessionSummary {
    let mut state = Replay::default();
    for stored in statements.iter().filter(|s| !s.voided) {
        state.apply(&stored.statement);
    }
    state.derive_mastery(policy);
    state.apply_staleness(staleness);

    let satisfied = state.waived
        || is_satisfied(
            policy.move_on,
            state.completed,
            state.passed,
            state.statement_count > 0,
        );
    let progress_percent = if state.completed {
        100
    } else {
        state.progress.round() as u8
    };

    SessionSummary {
        state: state.final_state(),
        score: state.best_score,
        progress_percent,
        elapsed_seconds: state.elapsed,
        satisfied,
        completed: state.completed,
        passed: state.passed,
        failed: state.failed && !state.passed,
        waived: state.waived,
        first_launched_at: state.first_launched.as_ref().map(time::to_rfc3339),
        last_launched_at: state.last_launched.as_ref().map(time::to_rfc3339),
        completed_at: state.completed_at.as_ref().map(time::to_rfc3339),
        launch_count: state.launch_count,
        abandoned_spans: state.abandoned_spans,
        statement_count: state.statement_count,
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "session",
        "version": "0.1.0",
        "description": "Launch session state derived by replaying stored statements",
        "commands": [
            { "name": "session", "parameters": ["package_id", "activity_id", "--mbox|--account-*", "--registration"] }
        ],
        "states": ["NotStarted", "Launched", "Initialized", "InProgress", "Completed", "Passed", "Failed", "Terminated", "Abandoned"]
    })
}
