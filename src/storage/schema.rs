/// SQL DDL for the strata store.
///
/// Release and graph bodies are stored as JSON text; the scope columns exist
/// for lookup only.

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS releases (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    stack TEXT NOT NULL,
    workspace TEXT NOT NULL,
    revision INTEGER NOT NULL,
    phase TEXT NOT NULL,
    body_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(project, stack, workspace, revision)
);

CREATE TABLE IF NOT EXISTS graphs (
    project TEXT NOT NULL,
    stack TEXT NOT NULL,
    workspace TEXT NOT NULL,
    body_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project, stack, workspace)
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_releases_scope ON releases(project, stack, workspace, revision);
";
