#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use strata::config::{EngineSettings, Scope};
use strata::models::{Resource, ResourceType};
use strata::operation::{Engine, PortForwarder};
use strata::planner::ChangeOrder;
use strata::runtime::{
    ApplyRequest, ApplyResponse, DeleteRequest, KubeEvent, KubeEventType, ReadRequest, Runtime,
    RuntimeRegistry, SequentialWatchers, TerraformWatcher, TfEvent, WatchRequest, WatchResponse,
};
use strata::storage::{GraphStore, MemoryStorage, ReleaseStore};

pub fn scope() -> Scope {
    Scope::new("shop", "dev", "default")
}

pub fn kube(id: &str) -> Resource {
    Resource::new(id, ResourceType::Kubernetes, json!({ "data": { "key": "value" } }))
}

pub fn terraform(id: &str) -> Resource {
    Resource::new(id, ResourceType::Terraform, json!({ "size": "small" }))
}

/// Settings with short cleanup grace and watching off.
pub fn settings() -> EngineSettings {
    EngineSettings {
        watch: false,
        cleanup_grace_secs: 1,
        quiet: true,
        ..EngineSettings::default()
    }
}

/// How [`FakeRuntime::watch`] answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchMode {
    /// No watchable representation.
    Nothing,
    /// One ADDED event for the object named by the resource id.
    KubeAdded,
    /// Applying, then Succeeded.
    TerraformSucceeded,
    /// A stream that never produces an event.
    Hang,
}

/// In-process runtime recording every call it receives.
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    delay: Option<Duration>,
    watch_mode: WatchMode,
    held: Mutex<Vec<mpsc::Sender<KubeEvent>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            delay: None,
            watch_mode: WatchMode::Nothing,
            held: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    /// Applies of `id` never return.
    pub fn hanging(mut self, id: &str) -> Self {
        self.hanging.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_watch(mut self, mode: WatchMode) -> Self {
        self.watch_mode = mode;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of apply calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn apply(&self, request: ApplyRequest) -> anyhow::Result<ApplyResponse> {
        self.record(format!("apply:{}", request.planned.id));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if self.hanging.contains(&request.planned.id) {
            std::future::pending::<()>().await;
        }
        self.pause().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&request.planned.id) {
            bail!("injected failure for {}", request.planned.id);
        }
        Ok(ApplyResponse {
            resource: request.planned,
        })
    }

    async fn read(&self, request: ReadRequest) -> anyhow::Result<Option<Resource>> {
        Ok(request.prior)
    }

    async fn delete(&self, request: DeleteRequest) -> anyhow::Result<()> {
        self.record(format!("delete:{}", request.resource.id));
        self.pause().await;
        if self.failing.contains(&request.resource.id) {
            bail!("injected failure for {}", request.resource.id);
        }
        Ok(())
    }

    async fn watch(&self, request: WatchRequest) -> anyhow::Result<WatchResponse> {
        let resource = request.resource;
        match self.watch_mode {
            WatchMode::Nothing => Ok(WatchResponse::default()),
            WatchMode::KubeAdded => {
                let (tx, rx) = mpsc::channel(4);
                tx.send(KubeEvent::new(KubeEventType::Added, object_for(&resource)))
                    .await?;
                Ok(WatchResponse {
                    kubernetes: Some(SequentialWatchers {
                        ids: vec![resource.id.clone()],
                        watchers: vec![rx],
                    }),
                    terraform: None,
                })
            }
            WatchMode::TerraformSucceeded => {
                let (tx, rx) = mpsc::channel(4);
                tx.send(TfEvent::Applying).await?;
                tx.send(TfEvent::Succeeded).await?;
                Ok(WatchResponse {
                    kubernetes: None,
                    terraform: Some(TerraformWatcher { events: rx }),
                })
            }
            WatchMode::Hang => {
                let (tx, rx) = mpsc::channel(4);
                self.held.lock().unwrap().push(tx);
                Ok(WatchResponse {
                    kubernetes: Some(SequentialWatchers {
                        ids: vec![resource.id.clone()],
                        watchers: vec![rx],
                    }),
                    terraform: None,
                })
            }
        }
    }
}

/// Live manifest for a Kubernetes resource id, with the resource attributes
/// merged in.
pub fn object_for(resource: &Resource) -> Value {
    let parts: Vec<&str> = resource.id.split(':').collect();
    let (api_version, kind, namespace, name) = match parts.as_slice() {
        [api, kind, ns, name] => (*api, *kind, Some(*ns), *name),
        [api, kind, name] => (*api, *kind, None, *name),
        _ => ("v1", "Unknown", None, resource.id.as_str()),
    };
    let mut object = match &resource.attributes {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    object.insert("apiVersion".into(), json!(api_version));
    object.insert("kind".into(), json!(kind));
    let metadata = match namespace {
        Some(ns) => json!({ "name": name, "namespace": ns }),
        None => json!({ "name": name }),
    };
    object.insert("metadata".into(), metadata);
    Value::Object(object)
}

/// Forwarder that blocks until told to stop.
#[derive(Default)]
pub struct FakeForwarder {
    pub started: AtomicBool,
    pub stopped: AtomicBool,
}

#[async_trait]
impl PortForwarder for FakeForwarder {
    async fn forward(&self, _order: &ChangeOrder, stop: CancellationToken) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        stop.cancelled().await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn registry(runtime: Arc<FakeRuntime>) -> RuntimeRegistry {
    RuntimeRegistry::new()
        .register(ResourceType::Kubernetes, runtime.clone())
        .register(ResourceType::Terraform, runtime)
}

pub fn engine(
    runtime: Arc<FakeRuntime>,
    store: Arc<MemoryStorage>,
    settings: EngineSettings,
) -> Engine {
    let releases: Arc<dyn ReleaseStore> = store.clone();
    let graphs: Arc<dyn GraphStore> = store;
    Engine::new(registry(runtime), releases, graphs, settings)
}
