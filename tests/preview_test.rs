mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use common::{kube, scope, terraform, FakeRuntime};
use strata::error::EngineError;
use strata::models::{SecretStore, Spec, State};
use strata::planner::{ActionType, Previewer};
use strata::runtime::RuntimeRegistry;

fn previewer_registry() -> RuntimeRegistry {
    common::registry(Arc::new(FakeRuntime::new()))
}

#[tokio::test]
async fn test_create_update_delete_ordering() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let a = kube("v1:ConfigMap:default:a");
    let b_old = kube("v1:ConfigMap:default:b");
    let b_new = kube("v1:ConfigMap:default:b")
        .with_depends_on(&["v1:ConfigMap:default:a"]);
    let gone = terraform("hashicorp:aws:aws_s3_bucket:old");

    let spec = Spec::new(vec![b_new, a]);
    let prior = State::new(vec![b_old, gone]);
    let order = previewer.preview(&spec, &prior, &scope()).await.unwrap();

    assert_eq!(
        order.step_keys,
        vec![
            "v1:ConfigMap:default:a",
            "v1:ConfigMap:default:b",
            "hashicorp:aws:aws_s3_bucket:old",
        ]
    );
    assert_eq!(order.get("v1:ConfigMap:default:a").unwrap().action, ActionType::Create);
    assert_eq!(order.get("v1:ConfigMap:default:b").unwrap().action, ActionType::Update);
    assert_eq!(
        order.get("hashicorp:aws:aws_s3_bucket:old").unwrap().action,
        ActionType::Delete
    );
}

#[tokio::test]
async fn test_step_keys_match_change_steps() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let spec = Spec::new(vec![
        kube("v1:Namespace:shop"),
        kube("v1:ConfigMap:shop:cfg").with_depends_on(&["v1:Namespace:shop"]),
        kube("apps/v1:Deployment:shop:web")
            .with_depends_on(&["v1:ConfigMap:shop:cfg", "v1:Namespace:shop"]),
    ]);
    let prior = State::new(vec![kube("v1:Secret:shop:stale")]);
    let order = previewer.preview(&spec, &prior, &scope()).await.unwrap();

    let keys: BTreeSet<&String> = order.step_keys.iter().collect();
    let steps: BTreeSet<&String> = order.change_steps.keys().collect();
    assert_eq!(keys, steps);
    assert_eq!(order.step_keys.len(), 4);
    assert_eq!(order.step_keys[0], "v1:Namespace:shop");
    assert_eq!(order.step_keys[2], "apps/v1:Deployment:shop:web");
}

#[tokio::test]
async fn test_preview_is_idempotent_against_own_state() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let spec = Spec::new(vec![
        kube("v1:ConfigMap:default:a"),
        terraform("hashicorp:aws:aws_instance:web"),
    ]);
    let prior = State::new(spec.resources.clone());
    let order = previewer.preview(&spec, &prior, &scope()).await.unwrap();

    assert!(!order.has_changes());
    assert!(order.steps().all(|s| s.action == ActionType::UnChanged));
    assert_eq!(order.summary().unchanged, 2);
}

#[tokio::test]
async fn test_ignore_fields_mask_differences() {
    let registry = previewer_registry();
    let ignore = vec!["metadata.generation".to_string()];
    let previewer = Previewer::new(&registry, &ignore);

    let mut recorded = kube("v1:ConfigMap:default:a");
    recorded.attributes = json!({ "metadata": { "generation": 3 }, "data": { "k": "v" } });
    let mut desired = recorded.clone();
    desired.attributes = json!({ "metadata": { "generation": 7 }, "data": { "k": "v" } });

    let order = previewer
        .preview(&Spec::new(vec![desired]), &State::new(vec![recorded]), &scope())
        .await
        .unwrap();
    assert_eq!(order.get("v1:ConfigMap:default:a").unwrap().action, ActionType::UnChanged);
}

#[tokio::test]
async fn test_empty_spec_is_rejected() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let err = previewer
        .preview(&Spec::default(), &State::default(), &scope())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_secret_reference_requires_store() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let mut secret = kube("v1:Secret:default:db");
    secret.attributes = json!({ "stringData": { "password": "ref://vault/db#password" } });
    let mut spec = Spec::new(vec![secret]);

    let err = previewer
        .preview(&spec, &State::default(), &scope())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().contains("stringData.password"));

    spec.secret_store = Some(SecretStore {
        provider: "vault".to_string(),
        config: Default::default(),
    });
    let order = previewer.preview(&spec, &State::default(), &scope()).await.unwrap();
    assert_eq!(order.len(), 1);
}

#[tokio::test]
async fn test_dependency_errors_are_planning_errors() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let unknown = Spec::new(vec![kube("v1:ConfigMap:default:a").with_depends_on(&["v1:ConfigMap:default:missing"])]);
    let err = previewer.preview(&unknown, &State::default(), &scope()).await.unwrap_err();
    assert!(matches!(err, EngineError::Planning { .. }));

    let cyclic = Spec::new(vec![
        kube("v1:ConfigMap:default:a").with_depends_on(&["v1:ConfigMap:default:b"]),
        kube("v1:ConfigMap:default:b").with_depends_on(&["v1:ConfigMap:default:a"]),
    ]);
    let err = previewer.preview(&cyclic, &State::default(), &scope()).await.unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let spec = Spec::new(vec![kube("v1:ConfigMap:default:a"), kube("v1:ConfigMap:default:a")]);
    let err = previewer.preview(&spec, &State::default(), &scope()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_destroy_preview_deletes_dependents_first() {
    let registry = previewer_registry();
    let previewer = Previewer::new(&registry, &[]);

    let prior = State::new(vec![
        kube("v1:Namespace:shop"),
        kube("v1:ConfigMap:shop:cfg").with_depends_on(&["v1:Namespace:shop"]),
        kube("apps/v1:Deployment:shop:web").with_depends_on(&["v1:ConfigMap:shop:cfg"]),
    ]);
    let order = previewer.preview_destroy(&prior, &scope()).await.unwrap();

    assert_eq!(
        order.step_keys,
        vec![
            "apps/v1:Deployment:shop:web",
            "v1:ConfigMap:shop:cfg",
            "v1:Namespace:shop",
        ]
    );
    assert!(order.steps().all(|s| s.action == ActionType::Delete));
    assert_eq!(order.summary().to_string(), "Plan: 0 to create, 0 to update, 3 to delete, 0 unchanged.");
}
