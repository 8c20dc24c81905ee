pub mod memory;
pub mod schema;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Scope;
use crate::graph::Graph;
use crate::release::Release;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Persistence for release records.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Insert a new release. Fails if the revision already exists.
    async fn create(&self, release: &Release) -> Result<()>;

    /// Overwrite an existing release, matched by scope and revision.
    async fn update(&self, release: &Release) -> Result<()>;

    /// The release with the highest revision in `scope`.
    async fn get_latest(&self, scope: &Scope) -> Result<Option<Release>>;

    /// A specific revision.
    async fn get(&self, scope: &Scope, revision: u64) -> Result<Option<Release>>;
}

/// Persistence for the per-scope resource graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn check_existence(&self, scope: &Scope) -> Result<bool>;

    async fn get(&self, scope: &Scope) -> Result<Option<Graph>>;

    async fn create(&self, graph: &Graph) -> Result<()>;

    async fn update(&self, graph: &Graph) -> Result<()>;
}

/// Revision number for the next release in `scope`.
pub async fn next_revision(store: &dyn ReleaseStore, scope: &Scope) -> Result<u64> {
    Ok(store
        .get_latest(scope)
        .await?
        .map(|r| r.revision + 1)
        .unwrap_or(1))
}

pub(crate) fn graph_scope(graph: &Graph) -> Scope {
    Scope::new(&graph.project, &graph.stack, &graph.workspace)
}
