//! Progress Aggregator: rolls activity verdicts up the manifest tree.
//!
//! Progress is pulled, never stored. One query fetches every statement for the
//! actor and registration; leaves are replayed in parallel and blocks combine
//! their children with AND.

use crate::core::error::LrsError;
use crate::services::manifest::{Activity, ManifestTree, MoveOn};
use crate::services::session::{self, Policy, SessionSummary, Staleness};
use crate::services::statements::{StatementRepository, StoredStatement};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CourseVerdict {
    NotStarted,
    InProgress,
    Satisfied,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProgress {
    pub activity_id: String,
    pub title: String,
    pub block_id: String,
    pub move_on: MoveOn,
    pub session: SessionSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProgress {
    pub block_id: String,
    pub title: String,
    pub satisfied: bool,
    pub satisfied_activities: usize,
    pub total_activities: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub package_id: String,
    pub registration: Option<String>,
    pub completed_activities: usize,
    pub total_activities: usize,
    pub percent: f64,
    pub overall_verdict: CourseVerdict,
    pub activities: Vec<ActivityProgress>,
    pub blocks: Vec<BlockProgress>,
}

impl CourseProgress {
    pub fn activity(&self, activity_id: &str) -> Option<&ActivityProgress> {
        self.activities.iter().find(|a| a.activity_id == activity_id)
    }

    pub fn block(&self, block_id: &str) -> Option<&BlockProgress> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }
}

/// Computes course progress from the full statement history of one attempt.
/// `statements` may cover any objects; only those naming a leaf activity count.
pub fn aggregate(
    tree: &ManifestTree,
    registration: Option<&str>,
    statements: &[StoredStatement],
    staleness: Option<Staleness>,
) -> CourseProgress {
    let mut by_object: FxHashMap<&str, Vec<StoredStatement>> = FxHashMap::default();
    for stored in statements {
        by_object
            .entry(stored.statement.object.id.as_str())
            .or_default()
            .push(stored.clone());
    }

    let leaves = tree.leaves();
    let activities: Vec<ActivityProgress> = leaves
        .par_iter()
        .map(|activity: &&Activity| {
            let history = by_object
                .get(activity.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            ActivityProgress {
                activity_id: activity.id.clone(),
                title: activity.title.clone(),
                block_id: activity.block_id.clone(),
                move_on: activity.move_on,
                session: session::replay_with(Policy::from(*activity), history, staleness),
            }
        })
        .collect();

    let satisfied: FxHashMap<&str, bool> = activities
        .iter()
        .map(|a| (a.activity_id.as_str(), a.session.satisfied))
        .collect();

    let mut blocks = Vec::with_capacity(tree.blocks().len());
    let root_satisfied = roll_up(tree, 0, &satisfied, &mut blocks);

    let total = activities.len();
    let completed = activities.iter().filter(|a| a.session.satisfied).count();
    let percent = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };
    let any_activity = activities.iter().any(|a| a.session.statement_count > 0);
    let overall_verdict = if root_satisfied {
        CourseVerdict::Satisfied
    } else if any_activity {
        CourseVerdict::InProgress
    } else {
        CourseVerdict::NotStarted
    };

    CourseProgress {
        package_id: tree.package_id.clone(),
        registration: registration.map(str::to_string),
        completed_activities: completed,
        total_activities: total,
        percent,
        overall_verdict,
        activities,
        blocks,
    }
}

/// AND over a block's activities and child blocks. Appends one entry per block
/// in pre-order and returns the block's own satisfaction.
fn roll_up(
    tree: &ManifestTree,
    node: usize,
    satisfied: &FxHashMap<&str, bool>,
    out: &mut Vec<BlockProgress>,
) -> bool {
    let Some(block) = tree.block(node) else {
        return false;
    };
    let slot = out.len();
    out.push(BlockProgress {
        block_id: block.id.clone(),
        title: block.title.clone(),
        satisfied: false,
        satisfied_activities: 0,
        total_activities: 0,
    });

    let mut all = true;
    let mut done = 0;
    let mut total = block.activities.len();
    for activity in block.activities.iter().filter_map(|s| tree.activity_at(*s)) {
        if satisfied.get(activity.id.as_str()).copied().unwrap_or(false) {
            done += 1;
        } else {
            all = false;
        }
    }
    for child in &block.blocks {
        let child_slot = out.len();
        if !roll_up(tree, *child, satisfied, out) {
            all = false;
        }
        done += out[child_slot].satisfied_activities;
        total += out[child_slot].total_activities;
    }

    out[slot].satisfied = all;
    out[slot].satisfied_activities = done;
    out[slot].total_activities = total;
    all
}

pub struct ProgressAggregator {
    statements: Arc<dyn StatementRepository>,
    abandon_after: Option<Duration>,
}

impl ProgressAggregator {
    pub fn new(statements: Arc<dyn StatementRepository>, abandon_after_secs: Option<u64>) -> Self {
        Self {
            statements,
            abandon_after: abandon_after_secs
                .and_then(|s| i64::try_from(s).ok())
                .map(Duration::seconds),
        }
    }

    fn staleness(&self, now: DateTime<Utc>) -> Option<Staleness> {
        self.abandon_after.map(|after| Staleness { now, after })
    }

    /// Course progress for an attempt. An actor never seen by the LRS has no
    /// statements, so `actor_id = None` yields an untouched course.
    pub fn course_progress(
        &self,
        tree: &ManifestTree,
        actor_id: Option<&str>,
        registration: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CourseProgress, LrsError> {
        let statements = match actor_id {
            Some(actor_id) => self
                .statements
                .list_for_registration(actor_id, registration)?,
            None => Vec::new(),
        };
        let progress = aggregate(tree, registration, &statements, self.staleness(now));
        tracing::debug!(
            package_id = %tree.package_id,
            completed = progress.completed_activities,
            total = progress.total_activities,
            "course progress computed"
        );
        Ok(progress)
    }

    /// Session summary for a single activity attempt.
    pub fn activity_session(
        &self,
        activity: &Activity,
        actor_id: Option<&str>,
        registration: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionSummary, LrsError> {
        let statements = match actor_id {
            Some(actor_id) => self
                .statements
                .list_for_activity(&activity.id, actor_id, registration)?,
            None => Vec::new(),
        };
        Ok(session::replay_with(
            Policy::from(activity),
            &statements,
            self.staleness(now),
        ))
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "progress",
        "version": "0.1.0",
        "description": "Course progress recomputed on demand from the statement store",
        "commands": [
            { "name": "progress", "parameters": ["package_id", "--mbox|--account-*", "--registration"] }
        ],
        "block_rule": "AND over child activities and blocks"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::manifest::{ActivityInput, BlockInput, LaunchMethod, PackageManifest};
    use crate::xapi::builder;
    use crate::xapi::model::Agent;

    const REG: &str = "0b1f6a3e-2f43-4c9c-8f8e-1f5e6f7c8d9a";

    fn au(id: &str, move_on: MoveOn) -> ActivityInput {
        ActivityInput {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            launch_url: "https://cdn.example.com/index.html".to_string(),
            launch_method: LaunchMethod::AnyWindow,
            move_on,
            mastery_score: None,
            activity_type: None,
            duration: None,
        }
    }

    fn tree(blocks: Vec<BlockInput>) -> ManifestTree {
        let m = PackageManifest {
            id: "https://example.com/course".to_string(),
            title: "Course".to_string(),
            version: None,
            content_base_url: None,
            blocks,
            activities: vec![],
        };
        ManifestTree::build("P_1", &m).unwrap()
    }

    fn stored(statements: Vec<crate::xapi::model::Statement>) -> Vec<StoredStatement> {
        statements
            .into_iter()
            .enumerate()
            .map(|(i, statement)| StoredStatement {
                seq: i as i64 + 1,
                actor_id: "A_1".into(),
                voided: false,
                statement,
            })
            .collect()
    }

    #[test]
    fn blocks_are_and_of_children() {
        let t = tree(vec![
            BlockInput {
                id: "b1".into(),
                title: "B1".into(),
                blocks: vec![],
                activities: vec![au("urn:au:1", MoveOn::Completed), au("urn:au:2", MoveOn::Completed)],
            },
            BlockInput {
                id: "b2".into(),
                title: "B2".into(),
                blocks: vec![],
                activities: vec![au("urn:au:3", MoveOn::Completed)],
            },
        ]);
        let a = Agent::with_mbox("mailto:l@example.com");
        let rows = stored(vec![
            builder::completed(&a, "urn:au:1", REG).timestamp("2025-01-11T10:00:00Z").build().unwrap(),
            builder::completed(&a, "urn:au:3", REG).timestamp("2025-01-11T10:01:00Z").build().unwrap(),
        ]);
        let p = aggregate(&t, Some(REG), &rows, None);
        assert_eq!(p.total_activities, 3);
        assert_eq!(p.completed_activities, 2);
        assert!(!p.block("b1").unwrap().satisfied);
        assert!(p.block("b2").unwrap().satisfied);
        assert_eq!(p.block("b1").unwrap().satisfied_activities, 1);
        assert_eq!(p.overall_verdict, CourseVerdict::InProgress);
        assert!((p.percent - 200.0 / 3.0).abs() < 1e-9);
        let root = &p.blocks[0];
        assert_eq!(root.block_id, "https://example.com/course");
        assert_eq!(root.total_activities, 3);
        assert!(!root.satisfied);
    }

    #[test]
    fn untouched_course_is_not_started() {
        let t = tree(vec![BlockInput {
            id: "b1".into(),
            title: "B1".into(),
            blocks: vec![],
            activities: vec![au("urn:au:1", MoveOn::NotApplicable)],
        }]);
        let p = aggregate(&t, None, &[], None);
        assert_eq!(p.overall_verdict, CourseVerdict::NotStarted);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn percent_ignores_sibling_order() {
        let a = Agent::with_mbox("mailto:l@example.com");
        let b1 = BlockInput {
            id: "b1".into(),
            title: "B1".into(),
            blocks: vec![],
            activities: vec![au("urn:au:1", MoveOn::Completed)],
        };
        let b2 = BlockInput {
            id: "b2".into(),
            title: "B2".into(),
            blocks: vec![],
            activities: vec![au("urn:au:2", MoveOn::Completed), au("urn:au:3", MoveOn::Completed)],
        };
        let rows = stored(vec![
            builder::completed(&a, "urn:au:2", REG).timestamp("2025-01-11T10:00:00Z").build().unwrap(),
        ]);
        let forward = aggregate(&tree(vec![b1.clone(), b2.clone()]), Some(REG), &rows, None);
        let reversed = aggregate(&tree(vec![b2, b1]), Some(REG), &rows, None);
        assert_eq!(forward.percent, reversed.percent);
        assert_eq!(forward.completed_activities, 1);
    }
}
