mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{kube, scope, settings, terraform, FakeRuntime, WatchMode};
use strata::config::EngineSettings;
use strata::error::EngineError;
use strata::graph::{Graph, GraphHandle, ResourceStatus};
use strata::models::{Resource, ResourceType, Spec, HEALTH_POLICY_EXTENSION};
use strata::planner::{ActionType, ChangeOrder, ChangeStep};
use strata::runtime::{
    ApplyRequest, ApplyResponse, DeleteRequest, KubeEvent, KubeEventType, ReadRequest, Runtime,
    RuntimeRegistry, SequentialWatchers, WatchRequest, WatchResponse,
};
use strata::watch::Watcher;

fn created(resources: &[Resource]) -> ChangeOrder {
    let mut order = ChangeOrder::new();
    for r in resources {
        order.push(ChangeStep::new(&r.id, ActionType::Create, None, Some(r.clone())));
    }
    order
}

async fn applied_graph(resources: &[Resource]) -> GraphHandle {
    let mut graph = Graph::new(&scope());
    graph.merge_spec(&Spec::new(resources.to_vec()));
    let handle = GraphHandle::new(graph);
    for r in resources {
        handle.set_status(&r.id, ResourceStatus::ApplySucceed).await;
    }
    handle
}

fn watch_settings() -> EngineSettings {
    EngineSettings {
        watch: true,
        watch_timeout_secs: 1,
        ..settings()
    }
}

/// Replays a fixed event script per object, one stream per object.
struct ScriptedRuntime {
    script: Mutex<Vec<(String, Vec<KubeEvent>)>>,
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn apply(&self, request: ApplyRequest) -> anyhow::Result<ApplyResponse> {
        Ok(ApplyResponse {
            resource: request.planned,
        })
    }

    async fn read(&self, _request: ReadRequest) -> anyhow::Result<Option<Resource>> {
        Ok(None)
    }

    async fn delete(&self, _request: DeleteRequest) -> anyhow::Result<()> {
        Ok(())
    }

    async fn watch(&self, _request: WatchRequest) -> anyhow::Result<WatchResponse> {
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        let mut ids = Vec::new();
        let mut watchers = Vec::new();
        for (id, events) in script {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                for event in events {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                // Hold the stream open like a real watch would.
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
            ids.push(id);
            watchers.push(rx);
        }
        Ok(WatchResponse {
            kubernetes: Some(SequentialWatchers { ids, watchers }),
            terraform: None,
        })
    }
}

fn pod(name: &str, phase: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": "shop" },
        "status": { "phase": phase }
    })
}

#[tokio::test]
async fn test_kubernetes_streams_fan_in_with_health_policy() {
    let script = vec![
        (
            "v1:Pod:shop:web-0".to_string(),
            vec![
                KubeEvent::new(KubeEventType::Added, pod("web-0", "Pending")),
                KubeEvent::new(KubeEventType::Bookmark, json!({})),
                KubeEvent::new(KubeEventType::Modified, pod("web-0", "Running")),
            ],
        ),
        (
            "v1:Pod:shop:web-1".to_string(),
            vec![KubeEvent::new(KubeEventType::Added, pod("web-1", "Running"))],
        ),
    ];
    let runtime = Arc::new(ScriptedRuntime {
        script: Mutex::new(script),
    });
    let registry = RuntimeRegistry::new().register(ResourceType::Kubernetes, runtime);

    let resource = Resource::new("apps/v1:StatefulSet:shop:web", ResourceType::Kubernetes, json!({}))
        .with_extension(HEALTH_POLICY_EXTENSION, json!("status.phase == 'Running'"));
    let graph = applied_graph(std::slice::from_ref(&resource)).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    watcher
        .watch(&created(&[resource.clone()]), &graph, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(graph.status(&resource.id).await, Some(ResourceStatus::Reconciled));
    let board = watcher.board();
    let board = board.lock().await;
    let table = board.get(&resource.id).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.all_completed());
    let row = table.get("v1:Pod:shop:web-0").unwrap();
    assert_eq!(row.event_type, "MODIFIED");
    assert!(row.detail.contains("Health policy satisfied"));
}

#[tokio::test]
async fn test_malformed_terraform_id_fails_before_any_row() {
    let runtime = Arc::new(FakeRuntime::new().with_watch(WatchMode::TerraformSucceeded));
    let registry = common::registry(runtime);
    let resource = terraform("hashicorp:aws:aws_instance");
    let graph = applied_graph(std::slice::from_ref(&resource)).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    let err = watcher
        .watch(&created(&[resource.clone()]), &graph, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)), "unexpected error: {err}");
    assert!(watcher.board().lock().await.is_empty());
    assert_eq!(graph.status(&resource.id).await, Some(ResourceStatus::ReconcileFail));
}

#[tokio::test]
async fn test_terraform_watch_reconciles() {
    let runtime = Arc::new(FakeRuntime::new().with_watch(WatchMode::TerraformSucceeded));
    let registry = common::registry(runtime);
    let resource = terraform("hashicorp:aws:aws_instance:web");
    let graph = applied_graph(std::slice::from_ref(&resource)).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    watcher
        .watch(&created(&[resource.clone()]), &graph, CancellationToken::new())
        .await
        .unwrap();

    let board = watcher.board();
    let board = board.lock().await;
    let row = board.get(&resource.id).unwrap().get(&resource.id).unwrap().clone();
    assert!(row.ready);
    assert_eq!(row.kind, "aws_instance");
    assert_eq!(row.name, "web");
    assert_eq!(graph.status(&resource.id).await, Some(ResourceStatus::Reconciled));
}

#[tokio::test]
async fn test_timeout_on_one_resource_leaves_siblings_running() {
    let runtime = Arc::new(FakeRuntime::new().with_watch(WatchMode::Hang));
    let registry = common::registry(runtime);
    let stuck = kube("v1:ConfigMap:default:stuck");

    let quick_runtime = Arc::new(FakeRuntime::new().with_watch(WatchMode::TerraformSucceeded));
    let registry = registry.register(ResourceType::Terraform, quick_runtime);
    let quick = terraform("hashicorp:aws:aws_instance:web");

    let resources = vec![stuck.clone(), quick.clone()];
    let graph = applied_graph(&resources).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    let err = watcher
        .watch(&created(&resources), &graph, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert_eq!(graph.status(&stuck.id).await, Some(ResourceStatus::ReconcileFail));
    assert_eq!(graph.status(&quick.id).await, Some(ResourceStatus::Reconciled));
}

#[tokio::test]
async fn test_unwatchable_resource_keeps_apply_status() {
    let runtime = Arc::new(FakeRuntime::new());
    let registry = common::registry(runtime);
    let resource = kube("v1:ConfigMap:default:plain");
    let graph = applied_graph(std::slice::from_ref(&resource)).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    watcher
        .watch(&created(&[resource.clone()]), &graph, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(graph.status(&resource.id).await, Some(ResourceStatus::ApplySucceed));
    assert!(watcher.board().lock().await.is_empty());
}

#[tokio::test]
async fn test_deleted_event_without_namespace_completes_its_row() {
    let script = vec![(
        "apps/v1:Deployment:default:web".to_string(),
        vec![KubeEvent::new(
            KubeEventType::Deleted,
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": "web" }
            }),
        )],
    )];
    let runtime = Arc::new(ScriptedRuntime {
        script: Mutex::new(script),
    });
    let registry = RuntimeRegistry::new().register(ResourceType::Kubernetes, runtime);
    let resource = kube("apps/v1:Deployment:default:web");
    let graph = applied_graph(std::slice::from_ref(&resource)).await;
    let watcher = Watcher::new(&registry, &watch_settings());

    watcher
        .watch(&created(&[resource.clone()]), &graph, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(graph.status(&resource.id).await, Some(ResourceStatus::Reconciled));
    let board = watcher.board();
    let board = board.lock().await;
    let row = board.get(&resource.id).unwrap().get(&resource.id).unwrap().clone();
    assert!(row.ready);
    assert_eq!(row.event_type, "DELETED");
    assert_eq!(row.detail, "Deleted");
}
