pub mod registry;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::Resource;

pub use registry::RuntimeRegistry;

/// A backend that can realize resources of one `ResourceType`.
///
/// Adapters are written outside this crate and registered in a
/// [`RuntimeRegistry`].
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Read-only discovery before preview, such as checking that an external
    /// tool is installed.
    async fn prepare(&self, _resource: &Resource) -> Result<()> {
        Ok(())
    }

    /// Create or update `request.planned`, returning the live resource.
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse>;

    /// Fetch the live resource, or `None` if it does not exist.
    async fn read(&self, request: ReadRequest) -> Result<Option<Resource>>;

    async fn delete(&self, request: DeleteRequest) -> Result<()>;

    /// Open event streams for a freshly applied resource.
    async fn watch(&self, request: WatchRequest) -> Result<WatchResponse>;
}

#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub prior: Option<Resource>,
    pub planned: Resource,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct ApplyResponse {
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub prior: Option<Resource>,
    pub planned: Option<Resource>,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub resource: Resource,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub resource: Resource,
}

/// Kind of change reported by a Kubernetes watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl fmt::Display for KubeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KubeEventType::Added => "ADDED",
            KubeEventType::Modified => "MODIFIED",
            KubeEventType::Deleted => "DELETED",
            KubeEventType::Bookmark => "BOOKMARK",
            KubeEventType::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct KubeEvent {
    pub event_type: KubeEventType,
    pub object: Value,
}

impl KubeEvent {
    pub fn new(event_type: KubeEventType, object: Value) -> Self {
        Self { event_type, object }
    }
}

/// One stream per watched object. `ids[i]` names the object behind
/// `watchers[i]`, in `apiVersion:kind[:namespace]:name` form.
#[derive(Debug)]
pub struct SequentialWatchers {
    pub ids: Vec<String>,
    pub watchers: Vec<mpsc::Receiver<KubeEvent>>,
}

/// Progress reported by a Terraform watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TfEvent {
    Applying,
    Succeeded,
    Failed(String),
}

impl TfEvent {
    pub fn label(&self) -> &'static str {
        match self {
            TfEvent::Applying => "Applying",
            TfEvent::Succeeded => "Succeeded",
            TfEvent::Failed(_) => "Failed",
        }
    }
}

#[derive(Debug)]
pub struct TerraformWatcher {
    pub events: mpsc::Receiver<TfEvent>,
}

/// Streams returned by [`Runtime::watch`]. Both empty means the resource has
/// no watchable representation.
#[derive(Debug, Default)]
pub struct WatchResponse {
    pub kubernetes: Option<SequentialWatchers>,
    pub terraform: Option<TerraformWatcher>,
}

impl WatchResponse {
    pub fn is_empty(&self) -> bool {
        let no_kube = self
            .kubernetes
            .as_ref()
            .map(|k| k.watchers.is_empty())
            .unwrap_or(true);
        no_kube && self.terraform.is_none()
    }
}
