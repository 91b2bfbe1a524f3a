//! Manifest Model: validated, immutable package trees.
//!
//! A manifest arrives as a nested JSON course (blocks containing blocks and
//! activities). Registration validates the whole tree, flattens it into an
//! arena and persists it in one transaction; a rejected manifest leaves no rows.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::LrsError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::xapi::validate::is_iri;
use rusqlite::{OptionalExtension, params};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, RwLock};
use ulid::Ulid;

pub const DEFAULT_ACTIVITY_TYPE: &str = "http://adlnet.gov/expapi/activities/lesson";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LaunchMethod {
    OwnWindow,
    #[default]
    AnyWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MoveOn {
    Passed,
    Completed,
    CompletedAndPassed,
    #[default]
    CompletedOrPassed,
    NotApplicable,
}

impl MoveOn {
    /// Whether a pass verdict takes part in satisfying this policy.
    pub fn involves_passed(self) -> bool {
        matches!(
            self,
            MoveOn::Passed | MoveOn::CompletedAndPassed | MoveOn::CompletedOrPassed
        )
    }
}

impl fmt::Display for MoveOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoveOn::Passed => "Passed",
            MoveOn::Completed => "Completed",
            MoveOn::CompletedAndPassed => "CompletedAndPassed",
            MoveOn::CompletedOrPassed => "CompletedOrPassed",
            MoveOn::NotApplicable => "NotApplicable",
        };
        f.write_str(s)
    }
}

impl fmt::Display for LaunchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaunchMethod::OwnWindow => "OwnWindow",
            LaunchMethod::AnyWindow => "AnyWindow",
        })
    }
}

// --- Input shape (as supplied by the extraction pipeline) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub launch_url: String,
    #[serde(default)]
    pub launch_method: LaunchMethod,
    #[serde(default)]
    pub move_on: MoveOn,
    #[serde(default)]
    pub mastery_score: Option<f64>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<BlockInput>,
    #[serde(default)]
    pub activities: Vec<ActivityInput>,
}

/// A course manifest. The course itself is the root block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub content_base_url: Option<String>,
    #[serde(default)]
    pub blocks: Vec<BlockInput>,
    #[serde(default)]
    pub activities: Vec<ActivityInput>,
}

impl PackageManifest {
    pub fn from_json(raw: &str) -> Result<Self, LrsError> {
        serde_json::from_str(raw)
            .map_err(|e| LrsError::validation(format!("manifest is not well-formed: {}", e)))
    }

    /// SHA-256 over the canonical JSON form.
    pub fn content_hash(&self) -> Result<String, LrsError> {
        let canonical = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

// --- Arena tree ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub launch_url: String,
    pub launch_method: LaunchMethod,
    pub move_on: MoveOn,
    pub mastery_score: Option<f64>,
    pub activity_type: String,
    pub duration: Option<String>,
    /// Id of the block that directly owns this activity.
    pub block_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockNode {
    pub id: String,
    pub title: String,
    pub parent: Option<usize>,
    pub blocks: Vec<usize>,
    pub activities: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestTree {
    pub package_id: String,
    pub identifier: String,
    pub title: String,
    pub version: Option<String>,
    pub content_base_url: Option<String>,
    blocks: Vec<BlockNode>,
    activities: Vec<Activity>,
    #[serde(skip)]
    index: FxHashMap<String, usize>,
}

impl ManifestTree {
    /// Validates `manifest` and flattens it. Index 0 is the course (root) block.
    pub fn build(package_id: &str, manifest: &PackageManifest) -> Result<Self, LrsError> {
        if manifest.id.trim().is_empty() {
            return Err(LrsError::validation("manifest identifier must not be empty"));
        }
        if manifest.title.trim().is_empty() {
            return Err(LrsError::validation("manifest title must not be empty"));
        }
        if let Some(base) = &manifest.content_base_url {
            url::Url::parse(base).map_err(|e| {
                LrsError::validation(format!("contentBaseUrl '{}' is not a URL: {}", base, e))
            })?;
        }

        let mut tree = ManifestTree {
            package_id: package_id.to_string(),
            identifier: manifest.id.clone(),
            title: manifest.title.clone(),
            version: manifest.version.clone(),
            content_base_url: manifest.content_base_url.clone(),
            blocks: Vec::new(),
            activities: Vec::new(),
            index: FxHashMap::default(),
        };
        let mut block_ids = FxHashSet::default();
        let mut ancestry = Vec::new();
        tree.add_block(
            None,
            &manifest.id,
            &manifest.title,
            &manifest.blocks,
            &manifest.activities,
            &mut block_ids,
            &mut ancestry,
        )?;

        if tree.activities.is_empty() {
            return Err(LrsError::validation("manifest contains no activities"));
        }
        Ok(tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_block(
        &mut self,
        parent: Option<usize>,
        id: &str,
        title: &str,
        blocks: &[BlockInput],
        activities: &[ActivityInput],
        block_ids: &mut FxHashSet<String>,
        ancestry: &mut Vec<String>,
    ) -> Result<usize, LrsError> {
        if id.trim().is_empty() {
            return Err(LrsError::validation("block id must not be empty"));
        }
        if ancestry.iter().any(|a| a == id) {
            return Err(LrsError::validation(format!(
                "block '{}' appears as its own descendant",
                id
            )));
        }
        if !block_ids.insert(id.to_string()) {
            return Err(LrsError::validation(format!("duplicate block id '{}'", id)));
        }

        let node = self.blocks.len();
        self.blocks.push(BlockNode {
            id: id.to_string(),
            title: title.to_string(),
            parent,
            blocks: Vec::new(),
            activities: Vec::new(),
        });

        for input in activities {
            let activity = validate_activity(input, id)?;
            if self.index.contains_key(&activity.id) {
                return Err(LrsError::validation(format!(
                    "duplicate activity id '{}'",
                    activity.id
                )));
            }
            let slot = self.activities.len();
            self.index.insert(activity.id.clone(), slot);
            self.activities.push(activity);
            self.blocks[node].activities.push(slot);
        }

        ancestry.push(id.to_string());
        for child in blocks {
            let child_node = self.add_block(
                Some(node),
                &child.id,
                &child.title,
                &child.blocks,
                &child.activities,
                block_ids,
                ancestry,
            )?;
            self.blocks[node].blocks.push(child_node);
        }
        ancestry.pop();

        Ok(node)
    }

    pub fn root(&self) -> &BlockNode {
        &self.blocks[0]
    }

    pub fn block(&self, node: usize) -> Option<&BlockNode> {
        self.blocks.get(node)
    }

    pub fn blocks(&self) -> &[BlockNode] {
        &self.blocks
    }

    pub fn activity_at(&self, slot: usize) -> Option<&Activity> {
        self.activities.get(slot)
    }

    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    /// Constant-time lookup through the id index.
    pub fn get_activity(&self, activity_id: &str) -> Option<&Activity> {
        self.index.get(activity_id).map(|slot| &self.activities[*slot])
    }

    /// Depth-first search from the root: a block's own activities are visited
    /// before its child blocks, in manifest order.
    pub fn find_activity(&self, activity_id: &str) -> Option<&Activity> {
        self.find_in(0, activity_id)
    }

    fn find_in(&self, node: usize, activity_id: &str) -> Option<&Activity> {
        let block = self.blocks.get(node)?;
        block
            .activities
            .iter()
            .map(|slot| &self.activities[*slot])
            .find(|a| a.id == activity_id)
            .or_else(|| {
                block
                    .blocks
                    .iter()
                    .find_map(|child| self.find_in(*child, activity_id))
            })
    }

    /// All activities in search order.
    pub fn leaves(&self) -> Vec<&Activity> {
        let mut out = Vec::with_capacity(self.activities.len());
        self.collect_leaves(0, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, node: usize, out: &mut Vec<&'a Activity>) {
        let Some(block) = self.blocks.get(node) else {
            return;
        };
        out.extend(block.activities.iter().map(|slot| &self.activities[*slot]));
        for child in &block.blocks {
            self.collect_leaves(*child, out);
        }
    }

    /// Launch URL of `activity`, resolved against the content base URL when relative.
    pub fn resolve_launch_url(&self, activity: &Activity) -> Result<url::Url, LrsError> {
        if let Ok(absolute) = url::Url::parse(&activity.launch_url) {
            return Ok(absolute);
        }
        let base = self.content_base_url.as_deref().ok_or_else(|| {
            LrsError::validation(format!(
                "activity '{}' has a relative launch URL and the package has no contentBaseUrl",
                activity.id
            ))
        })?;
        let base = url::Url::parse(base)
            .map_err(|e| LrsError::validation(format!("invalid contentBaseUrl: {}", e)))?;
        base.join(&activity.launch_url)
            .map_err(|e| LrsError::validation(format!("invalid launch URL: {}", e)))
    }
}

fn validate_activity(input: &ActivityInput, block_id: &str) -> Result<Activity, LrsError> {
    if !is_iri(&input.id) {
        return Err(LrsError::validation(format!(
            "activity id '{}' must be an IRI",
            input.id
        )));
    }
    if input.launch_url.trim().is_empty() {
        return Err(LrsError::validation(format!(
            "activity '{}' has no launch URL",
            input.id
        )));
    }
    if let Some(score) = input.mastery_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(LrsError::validation(format!(
                "activity '{}' mastery score {} is outside [0, 1]",
                input.id, score
            )));
        }
    }
    if let Some(duration) = &input.duration {
        if !time::is_iso8601_duration(duration) {
            return Err(LrsError::validation(format!(
                "activity '{}' duration '{}' is not ISO 8601",
                input.id, duration
            )));
        }
    }
    let activity_type = input
        .activity_type
        .clone()
        .unwrap_or_else(|| DEFAULT_ACTIVITY_TYPE.to_string());
    if !is_iri(&activity_type) {
        return Err(LrsError::validation(format!(
            "activity '{}' type must be an IRI",
            input.id
        )));
    }
    Ok(Activity {
        id: input.id.clone(),
        title: input.title.clone(),
        description: input.description.clone(),
        launch_url: input.launch_url.clone(),
        launch_method: input.launch_method,
        move_on: input.move_on,
        mastery_score: input.mastery_score,
        activity_type,
        duration: input.duration.clone(),
        block_id: block_id.to_string(),
    })
}

// --- Repository ---

#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub package_id: String,
    pub identifier: String,
    pub title: String,
    pub version: Option<String>,
    pub activity_count: i64,
    pub created_at: String,
}

/// Where an activity sits in one registered package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLocation {
    pub package_id: String,
    pub block_id: String,
    pub title: String,
    pub move_on: String,
    pub order_index: i64,
}

pub trait ManifestRepository: Send + Sync {
    /// Validates and stores `manifest`, returning its package id. Re-registering
    /// byte-identical content returns the existing package id.
    fn register_package(&self, manifest: &PackageManifest) -> Result<String, LrsError>;

    fn package(&self, package_id: &str) -> Result<Arc<ManifestTree>, LrsError>;

    fn list_packages(&self) -> Result<Vec<PackageSummary>, LrsError>;

    /// Every package that contains `activity_id`, oldest registration first.
    fn locate_activity(&self, activity_id: &str) -> Result<Vec<ActivityLocation>, LrsError>;

    fn get_activity(&self, package_id: &str, activity_id: &str) -> Result<Activity, LrsError> {
        let tree = self.package(package_id)?;
        tree.get_activity(activity_id).cloned().ok_or_else(|| {
            LrsError::not_found(format!(
                "activity '{}' in package '{}'",
                activity_id, package_id
            ))
        })
    }

    fn find_activity(&self, package_id: &str, activity_id: &str) -> Result<Activity, LrsError> {
        let tree = self.package(package_id)?;
        tree.find_activity(activity_id).cloned().ok_or_else(|| {
            LrsError::not_found(format!(
                "activity '{}' in package '{}'",
                activity_id, package_id
            ))
        })
    }
}

pub fn initialize_packages_db(store: &Store) -> Result<(), LrsError> {
    let conn = db::db_connect(&store.db_path())?;
    db::ensure_meta(&conn)?;
    db::apply_ddl(
        &conn,
        &[
            schemas::PACKAGES_SCHEMA,
            schemas::PACKAGES_INDEX,
            schemas::ACTIVITIES_SCHEMA,
        ],
    )
}

pub struct SqliteManifestRepository {
    broker: DbBroker,
    cache: RwLock<FxHashMap<String, Arc<ManifestTree>>>,
}

impl SqliteManifestRepository {
    pub fn new(store: &Store) -> Self {
        Self {
            broker: DbBroker::new(store),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    fn cached(&self, package_id: &str) -> Option<Arc<ManifestTree>> {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.get(package_id).cloned())
    }

    fn remember(&self, tree: ManifestTree) -> Arc<ManifestTree> {
        let tree = Arc::new(tree);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tree.package_id.clone(), Arc::clone(&tree));
        }
        tree
    }
}

impl ManifestRepository for SqliteManifestRepository {
    fn register_package(&self, manifest: &PackageManifest) -> Result<String, LrsError> {
        let package_id = format!("P_{}", Ulid::new());
        let tree = ManifestTree::build(&package_id, manifest)?;
        let hash = manifest.content_hash()?;
        let body = serde_json::to_string(manifest)?;

        let stored_id = self
            .broker
            .with_write("manifest", "packages.register", |conn| {
                db::with_immediate_tx(conn, |tx| {
                    let existing: Option<String> = tx
                        .query_row(
                            "SELECT id FROM packages WHERE identifier = ?1 AND manifest_hash = ?2",
                            params![manifest.id, hash],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(existing) = existing {
                        return Ok(existing);
                    }

                    tx.execute(
                        "INSERT INTO packages(id, identifier, title, version, content_base_url, manifest, manifest_hash, activity_count, created_at)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            package_id,
                            tree.identifier,
                            tree.title,
                            tree.version,
                            tree.content_base_url,
                            body,
                            hash,
                            tree.activity_count() as i64,
                            time::now_rfc3339()
                        ],
                    )?;
                    let mut insert = tx.prepare(
                        "INSERT INTO activities(package_id, activity_id, block_id, title, launch_url, launch_method, move_on, mastery_score, activity_type, duration, order_index)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )?;
                    for (order, activity) in tree.leaves().into_iter().enumerate() {
                        insert.execute(params![
                            package_id,
                            activity.id,
                            activity.block_id,
                            activity.title,
                            activity.launch_url,
                            activity.launch_method.to_string(),
                            activity.move_on.to_string(),
                            activity.mastery_score,
                            activity.activity_type,
                            activity.duration,
                            order as i64
                        ])?;
                    }
                    Ok(package_id.clone())
                })
            })?;

        if stored_id == package_id {
            tracing::info!(
                package_id = %package_id,
                identifier = %manifest.id,
                activities = tree.activity_count(),
                "registered package"
            );
            self.remember(tree);
        } else {
            tracing::debug!(package_id = %stored_id, "manifest already registered");
        }
        Ok(stored_id)
    }

    fn package(&self, package_id: &str) -> Result<Arc<ManifestTree>, LrsError> {
        if let Some(tree) = self.cached(package_id) {
            return Ok(tree);
        }
        let body: String = self.broker.with_read(|conn| {
            conn.query_row(
                "SELECT manifest FROM packages WHERE id = ?1",
                params![package_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LrsError::not_found(format!("package '{}'", package_id)))
        })?;
        let manifest: PackageManifest = serde_json::from_str(&body)?;
        let tree = ManifestTree::build(package_id, &manifest).map_err(|e| {
            LrsError::DatabaseInitializationError(format!(
                "stored manifest for '{}' no longer validates: {}",
                package_id, e
            ))
        })?;
        Ok(self.remember(tree))
    }

    fn list_packages(&self) -> Result<Vec<PackageSummary>, LrsError> {
        self.broker.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identifier, title, version, activity_count, created_at
                 FROM packages ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(PackageSummary {
                    package_id: row.get(0)?,
                    identifier: row.get(1)?,
                    title: row.get(2)?,
                    version: row.get(3)?,
                    activity_count: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn locate_activity(&self, activity_id: &str) -> Result<Vec<ActivityLocation>, LrsError> {
        self.broker.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.package_id, a.block_id, a.title, a.move_on, a.order_index
                 FROM activities a JOIN packages p ON p.id = a.package_id
                 WHERE a.activity_id = ?1
                 ORDER BY p.created_at, p.id",
            )?;
            let rows = stmt.query_map(params![activity_id], |row| {
                Ok(ActivityLocation {
                    package_id: row.get(0)?,
                    block_id: row.get(1)?,
                    title: row.get(2)?,
                    move_on: row.get(3)?,
                    order_index: row.get(4)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "manifest",
        "version": "0.1.0",
        "description": "Immutable cmi5 package trees (blocks and activities)",
        "commands": [
            { "name": "package register", "parameters": ["--file"] },
            { "name": "package show", "parameters": ["package_id"] },
            { "name": "package find", "parameters": ["package_id", "activity_id"] },
            { "name": "package locate", "parameters": ["activity_id"] }
        ],
        "move_on": ["Passed", "Completed", "CompletedAndPassed", "CompletedOrPassed", "NotApplicable"],
        "storage": ["lrs.db#packages", "lrs.db#activities"]
    })
}
