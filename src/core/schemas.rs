//! Centralized database schema definitions.
//!
//! One SQLite database (`lrs.db` by default) holds four logical collections:
//! 1. actors: identity registry, never deleted.
//! 2. packages + activities: immutable manifests registered atomically.
//! 3. statements: append-only xAPI statements, ordered by a logical clock (`seq`).
//! 4. activity_state: versioned key/value documents for resumption data.
//!
//! Progress is derived on read and has no table.

pub const SCHEMA_VERSION: &str = "1";

pub const META_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- 1. Actors ---
pub const ACTORS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS actors (
        id TEXT PRIMARY KEY,
        identity_key TEXT NOT NULL UNIQUE,
        object_type TEXT NOT NULL DEFAULT 'Agent',
        name TEXT,
        mbox TEXT,
        account_name TEXT,
        account_homepage TEXT,
        created_at TEXT NOT NULL
    )
";

// --- 2. Packages ---
pub const PACKAGES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS packages (
        id TEXT PRIMARY KEY,
        identifier TEXT NOT NULL,
        title TEXT NOT NULL,
        version TEXT,
        content_base_url TEXT,
        manifest TEXT NOT NULL,
        manifest_hash TEXT NOT NULL,
        activity_count INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
";
pub const PACKAGES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_packages_identifier ON packages(identifier)";

pub const ACTIVITIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS activities (
        package_id TEXT NOT NULL,
        activity_id TEXT NOT NULL,
        block_id TEXT NOT NULL,
        title TEXT NOT NULL,
        launch_url TEXT NOT NULL,
        launch_method TEXT NOT NULL,
        move_on TEXT NOT NULL,
        mastery_score REAL,
        activity_type TEXT NOT NULL,
        duration TEXT,
        order_index INTEGER NOT NULL,
        PRIMARY KEY (package_id, activity_id),
        FOREIGN KEY(package_id) REFERENCES packages(id)
    )
";

// --- 3. Statements ---
pub const STATEMENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS statements (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        actor_id TEXT NOT NULL,
        verb_id TEXT NOT NULL,
        object_id TEXT NOT NULL,
        registration TEXT NOT NULL DEFAULT '',
        voids_statement_id TEXT,
        timestamp TEXT NOT NULL,
        stored TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        body TEXT NOT NULL,
        FOREIGN KEY(actor_id) REFERENCES actors(id)
    )
";
pub const STATEMENTS_INDEX_TRIPLE: &str = "CREATE INDEX IF NOT EXISTS idx_statements_triple ON statements(actor_id, registration, object_id, seq)";
pub const STATEMENTS_INDEX_VOIDS: &str = "CREATE INDEX IF NOT EXISTS idx_statements_voids ON statements(voids_statement_id)";

// --- 4. Activity state ---
pub const ACTIVITY_STATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS activity_state (
        activity_id TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        registration TEXT NOT NULL DEFAULT '',
        state_id TEXT NOT NULL,
        content_type TEXT NOT NULL,
        payload BLOB NOT NULL,
        version INTEGER NOT NULL,
        etag TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (activity_id, actor_id, registration, state_id),
        FOREIGN KEY(actor_id) REFERENCES actors(id)
    )
";
