use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::schema;
use super::{graph_scope, GraphStore, ReleaseStore};
use crate::config::Scope;
use crate::graph::Graph;
use crate::release::Release;

/// SQLite-backed release and graph store for local and single-user use.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the store at `db_path` and make sure the schema exists.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        conn.execute_batch(schema::CREATE_INDEXES_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![schema::SCHEMA_VERSION, Self::now(), "Initial schema"],
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn release_from_body(body: String) -> Result<Release> {
        serde_json::from_str(&body).context("Failed to decode stored release")
    }
}

#[async_trait]
impl ReleaseStore for SqliteStorage {
    async fn create(&self, release: &Release) -> Result<()> {
        let body = serde_json::to_string(release)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO releases (id, project, stack, workspace, revision, phase, body_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                release.id,
                release.project,
                release.stack,
                release.workspace,
                release.revision as i64,
                release.phase.to_string(),
                body,
                release.create_time.to_rfc3339(),
                release.modified_time.to_rfc3339(),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to insert release {} for {}",
                release.revision,
                release.scope()
            )
        })?;
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let body = serde_json::to_string(release)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE releases SET phase = ?1, body_json = ?2, updated_at = ?3
             WHERE project = ?4 AND stack = ?5 AND workspace = ?6 AND revision = ?7",
            params![
                release.phase.to_string(),
                body,
                release.modified_time.to_rfc3339(),
                release.project,
                release.stack,
                release.workspace,
                release.revision as i64,
            ],
        )?;
        if changed == 0 {
            bail!(
                "release {} for {} does not exist",
                release.revision,
                release.scope()
            );
        }
        Ok(())
    }

    async fn get_latest(&self, scope: &Scope) -> Result<Option<Release>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body_json FROM releases
                 WHERE project = ?1 AND stack = ?2 AND workspace = ?3
                 ORDER BY revision DESC LIMIT 1",
                params![scope.project, scope.stack, scope.workspace],
                |row| row.get(0),
            )
            .optional()?;
        body.map(Self::release_from_body).transpose()
    }

    async fn get(&self, scope: &Scope, revision: u64) -> Result<Option<Release>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body_json FROM releases
                 WHERE project = ?1 AND stack = ?2 AND workspace = ?3 AND revision = ?4",
                params![scope.project, scope.stack, scope.workspace, revision as i64],
                |row| row.get(0),
            )
            .optional()?;
        body.map(Self::release_from_body).transpose()
    }
}

#[async_trait]
impl GraphStore for SqliteStorage {
    async fn check_existence(&self, scope: &Scope) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graphs WHERE project = ?1 AND stack = ?2 AND workspace = ?3",
            params![scope.project, scope.stack, scope.workspace],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn get(&self, scope: &Scope) -> Result<Option<Graph>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body_json FROM graphs WHERE project = ?1 AND stack = ?2 AND workspace = ?3",
                params![scope.project, scope.stack, scope.workspace],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).context("Failed to decode stored graph"))
            .transpose()
    }

    async fn create(&self, graph: &Graph) -> Result<()> {
        let body = serde_json::to_string(graph)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO graphs (project, stack, workspace, body_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![graph.project, graph.stack, graph.workspace, body, Self::now()],
        )
        .with_context(|| format!("Failed to insert graph for {}", graph_scope(graph)))?;
        Ok(())
    }

    async fn update(&self, graph: &Graph) -> Result<()> {
        let body = serde_json::to_string(graph)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE graphs SET body_json = ?1, updated_at = ?2
             WHERE project = ?3 AND stack = ?4 AND workspace = ?5",
            params![body, Self::now(), graph.project, graph.stack, graph.workspace],
        )?;
        if changed == 0 {
            bail!("graph for {} does not exist", graph_scope(graph));
        }
        Ok(())
    }
}
