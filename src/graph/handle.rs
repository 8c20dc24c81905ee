use std::sync::Arc;

use tokio::sync::Mutex;

use super::{cloud_resource_id, Graph, ResourceStatus};
use crate::models::Resource;

/// Shared, lock-guarded access to the graph.
///
/// The executor, the progress reporter and the watch reducers all update node
/// status concurrently; every read-modify-write goes through this mutex.
#[derive(Clone)]
pub struct GraphHandle {
    inner: Arc<Mutex<Graph>>,
}

impl GraphHandle {
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Arc::new(Mutex::new(graph)),
        }
    }

    pub async fn snapshot(&self) -> Graph {
        self.inner.lock().await.clone()
    }

    pub async fn status(&self, id: &str) -> Option<ResourceStatus> {
        self.inner.lock().await.get(id).map(|n| n.status)
    }

    pub async fn set_status(&self, id: &str, status: ResourceStatus) -> bool {
        self.inner.lock().await.set_status(id, status)
    }

    /// Swap the status and return the previous one.
    pub async fn replace_status(&self, id: &str, status: ResourceStatus) -> Option<ResourceStatus> {
        let mut graph = self.inner.lock().await;
        let node = graph.get_mut(id)?;
        let prev = node.status;
        node.status = status;
        Some(prev)
    }

    /// Record a successful apply of `live`, the resource as returned by the
    /// runtime.
    pub async fn record_applied(&self, live: &Resource) {
        let mut graph = self.inner.lock().await;
        if let Some(node) = graph.get_mut(&live.id) {
            let cloud_id = cloud_resource_id(live);
            if !cloud_id.is_empty() {
                node.cloud_resource_id = cloud_id;
            }
            node.resource_type = live.kind().to_string();
            node.name = live.name().to_string();
            node.status = ResourceStatus::ApplySucceed;
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    pub async fn with<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let mut graph = self.inner.lock().await;
        f(&mut graph)
    }
}
